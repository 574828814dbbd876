use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("invalid options:\n{0}")]
    Validation(String),

    #[error("simulation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl SimError {
    pub fn to_string_with_backtrace<S: AsRef<str>>(&self, msg: S) -> String {
        match self {
            SimError::Any(err) => format!("{}: {err}\n{}", msg.as_ref(), err.backtrace()),
            _ => format!("{}: {self}", msg.as_ref()),
        }
    }

    pub fn report_with_backtrace<S: AsRef<str>>(&self, msg: S) {
        eprintln!("{}", self.to_string_with_backtrace(msg));
    }
}

macro_rules! simerr {
    ($($arg:tt)*) => {
        $crate::test::types::SimError::Any(::anyhow::anyhow!($($arg)*))
    };
}

pub(crate) use simerr;

pub type Result<T, E = SimError> = std::result::Result<T, E>;
