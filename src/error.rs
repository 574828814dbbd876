use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error returned by [`LazyCache`](crate::LazyCache) and [`SingleFlightGate`](crate::gate::SingleFlightGate)
/// operations.
///
/// A key that doesn't exist in the backing store is not an error: keyed lookups report it as `Ok(None)`.
///
/// The loader error is kept behind an `Arc` because one failed population is reported to every task that was waiting
/// on it. For the same reason the type is `Clone` no matter whether `E` is.
#[derive(Error)]
pub enum CacheError<E>
where
    E: Display + Debug,
{
    /// The loader failed to fetch data from the backing store.
    #[error("loader failed: {0}")]
    Load(Arc<E>),

    /// A follower gave up waiting for the population led by another task. The leader is not affected.
    #[error("timed out after {0:?} waiting for cache population")]
    Timeout(Duration),

    /// The previous population attempt failed recently and the cache is configured to hold off new attempts.
    #[error("cache population is cooling down after a failure, {remaining:?} left")]
    CoolingDown { remaining: Duration },
}

impl<E> CacheError<E>
where
    E: Display + Debug,
{
    pub fn load(err: E) -> Self {
        Self::Load(Arc::new(err))
    }

    /// The loader error, if this is a load failure.
    pub fn loader_error(&self) -> Option<&E> {
        match self {
            Self::Load(err) => Some(err),
            _ => None,
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl<E> Clone for CacheError<E>
where
    E: Display + Debug,
{
    fn clone(&self) -> Self {
        match self {
            Self::Load(err) => Self::Load(Arc::clone(err)),
            Self::Timeout(d) => Self::Timeout(*d),
            Self::CoolingDown { remaining } => Self::CoolingDown { remaining: *remaining },
        }
    }
}

impl<E> Debug for CacheError<E>
where
    E: Display + Debug,
{
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(e) => fmt.debug_tuple("CacheError::Load").field(e).finish(),
            Self::Timeout(d) => fmt.debug_tuple("CacheError::Timeout").field(d).finish(),
            Self::CoolingDown { remaining } => fmt
                .debug_struct("CacheError::CoolingDown")
                .field("remaining", remaining)
                .finish(),
        }
    }
}
