use std::fmt::Debug;

/// A single cached record.
///
/// Entries are immutable. The cache hands them out as `Arc<CacheEntry<K, V>>` so a reader keeps its copy valid for
/// as long as it needs it, even after the cache has moved on to a newer snapshot.
pub struct CacheEntry<K, V> {
    key:   K,
    value: V,
}

impl<K, V> CacheEntry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }
}

impl<K, V> Debug for CacheEntry<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

impl<K, V> PartialEq for CacheEntry<K, V>
where
    K: PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}
