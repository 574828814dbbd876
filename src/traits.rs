use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;

use crate::types::CacheState;

// For types that are in charge of reading records from the backing store.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    /// The key type to be used with [`LazyCache::get()`](crate::LazyCache::get).
    type Key: Debug + Hash + Eq + Clone + Send + Sync + 'static;
    type Value: Debug + Send + Sync + 'static;
    type Error: Display + Debug + Send + Sync + 'static;

    /// Fetch the complete data set.
    ///
    /// The cache calls this method at most once per cold period no matter how many tasks are asking for data at the
    /// same time. It may still be called again after a failure or an invalidation, so it must be safe to repeat.
    async fn load_all(&self) -> Result<Vec<(Self::Key, Self::Value)>, Self::Error>;

    /// Fetch a single record. `Ok(None)` means the backing store has no such key.
    ///
    /// Only used by caches configured with [`LoadStrategy::PerKey`](crate::types::LoadStrategy::PerKey). The default
    /// implementation picks the record out of a full load, which is correct but not what you want for large data sets.
    async fn load_one(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .rev()
            .find_map(|(k, v)| (&k == key).then_some(v)))
    }
}

/// Type-erased control over a cache's population state.
///
/// A hosting layer can keep a list of `Arc<dyn InvalidationControl>` and reset caches of unrelated loader types
/// together.
pub trait InvalidationControl: Send + Sync {
    /// Drop the current snapshot and make the next read populate the cache anew.
    fn invalidate(&self);

    fn state(&self) -> CacheState;

    fn name(&self) -> String;
}
