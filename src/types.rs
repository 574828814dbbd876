use std::fmt::Display;

/// Observable population state of a [`LazyCache`](crate::LazyCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// No usable snapshot. The next read starts a population.
    Empty,
    /// A leader is loading data; readers arriving now wait for its outcome.
    Populating,
    /// A snapshot is published; reads are served from it without waiting.
    Populated,
}

impl Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheState::Empty => write!(f, "empty"),
            CacheState::Populating => write!(f, "populating"),
            CacheState::Populated => write!(f, "populated"),
        }
    }
}

/// How a keyed lookup populates the cache on a miss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LoadStrategy {
    /// Load the whole data set with [`Loader::load_all`](crate::Loader::load_all) and cache it.
    #[default]
    Bulk,
    /// Load only the requested key with [`Loader::load_one`](crate::Loader::load_one) and add it to the cached
    /// snapshot.
    ///
    /// Every added key publishes a new copy of the snapshot, so filling it with N keys one by one costs O(N²) copying.
    /// Keys reported missing are remembered until the next invalidation or bulk load, so a stream of lookups for
    /// distinct absent keys grows the snapshot without bound. Prefer `Bulk` for large data sets or untrusted keys.
    PerKey,
}

/// Counters of a single-flight gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    /// Operations actually executed, i.e. the number of times a task became the leader.
    pub flights:   u64,
    /// Tasks that waited for another task's flight instead of running their own.
    pub followers: u64,
    /// Followers that gave up waiting.
    pub timeouts:  u64,
}
