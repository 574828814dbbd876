use crate::entry::CacheEntry;
use std::{
    collections::{hash_map, HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};

/// Result of looking a key up in a snapshot.
pub(crate) enum Lookup<'a, K, V> {
    Found(&'a Arc<CacheEntry<K, V>>),
    // The snapshot knows for sure there is no such key.
    Missing,
    // A partial snapshot that has never been asked about this key.
    Unknown,
}

/// Immutable view of the cached data set.
///
/// A snapshot is built once from a loader result and never changes afterwards. A cache replaces its snapshot by
/// swapping the `Arc` it holds, so any reader that obtained a snapshot keeps a consistent view no matter what happens
/// to the cache later.
///
/// Entries keep the order in which the loader returned them. If a load yields the same key more than once, the later
/// value wins and takes the position of the first occurrence.
///
/// Snapshots produced by a bulk load are *complete*: a key not found in them doesn't exist in the backing store.
/// Caches using [`LoadStrategy::PerKey`](crate::types::LoadStrategy::PerKey) grow *partial* snapshots one key at a time,
/// also remembering keys the loader reported as missing.
pub struct CacheSnapshot<K, V> {
    entries:    Vec<Arc<CacheEntry<K, V>>>,
    index:      HashMap<K, usize>,
    missing:    HashSet<K>,
    complete:   bool,
    created_at: Instant,
}

impl<K, V> CacheSnapshot<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Build a complete snapshot from a loader's bulk result.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let records = records.into_iter();
        let mut entries: Vec<Arc<CacheEntry<K, V>>> = Vec::with_capacity(records.size_hint().0);
        let mut index = HashMap::with_capacity(entries.capacity());

        for (key, value) in records {
            match index.entry(key.clone()) {
                hash_map::Entry::Occupied(slot) => {
                    entries[*slot.get()] = Arc::new(CacheEntry::new(key, value));
                }
                hash_map::Entry::Vacant(slot) => {
                    slot.insert(entries.len());
                    entries.push(Arc::new(CacheEntry::new(key, value)));
                }
            }
        }

        Self {
            entries,
            index,
            missing: HashSet::new(),
            complete: true,
            created_at: Instant::now(),
        }
    }

    /// An empty partial snapshot, the starting point of per-key population.
    pub(crate) fn partial() -> Self {
        Self {
            entries:    Vec::new(),
            index:      HashMap::new(),
            missing:    HashSet::new(),
            complete:   false,
            created_at: Instant::now(),
        }
    }

    /// Copy of this snapshot extended with the outcome of a single key load: `Some` entry to add or replace, `None` to
    /// remember the key as missing. The creation time is preserved so that the age of a partial snapshot counts from the
    /// start of its population cycle.
    ///
    /// Linear in the size of the snapshot.
    pub(crate) fn with_lookup(&self, key: &K, entry: Option<Arc<CacheEntry<K, V>>>) -> Self {
        let mut entries = self.entries.clone();
        let mut index = self.index.clone();
        let mut missing = self.missing.clone();

        match entry {
            Some(entry) => {
                missing.remove(key);
                match index.entry(key.clone()) {
                    hash_map::Entry::Occupied(slot) => entries[*slot.get()] = entry,
                    hash_map::Entry::Vacant(slot) => {
                        slot.insert(entries.len());
                        entries.push(entry);
                    }
                }
            }
            None => {
                if let Some(pos) = index.remove(key) {
                    entries.remove(pos);
                    for idx in index.values_mut() {
                        if *idx > pos {
                            *idx -= 1;
                        }
                    }
                }
                missing.insert(key.clone());
            }
        }

        Self {
            entries,
            index,
            missing,
            complete: self.complete,
            created_at: self.created_at,
        }
    }

    pub(crate) fn lookup(&self, key: &K) -> Lookup<'_, K, V> {
        if let Some(&pos) = self.index.get(key) {
            Lookup::Found(&self.entries[pos])
        }
        else if self.complete || self.missing.contains(key) {
            Lookup::Missing
        }
        else {
            Lookup::Unknown
        }
    }

    pub fn get(&self, key: &K) -> Option<&Arc<CacheEntry<K, V>>> {
        self.index.get(key).map(|&pos| &self.entries[pos])
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }
}

impl<K, V> CacheSnapshot<K, V> {
    /// All entries in load order.
    pub fn entries(&self) -> &[Arc<CacheEntry<K, V>>] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<CacheEntry<K, V>>> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|e| e.key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if the snapshot holds the full data set as returned by a bulk load.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        ttl.is_none_or(|ttl| self.age() < ttl)
    }
}

impl<'a, K, V> IntoIterator for &'a CacheSnapshot<K, V> {
    type IntoIter = std::slice::Iter<'a, Arc<CacheEntry<K, V>>>;
    type Item = &'a Arc<CacheEntry<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K, V> Debug for CacheSnapshot<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSnapshot")
            .field("len", &self.entries.len())
            .field("missing", &self.missing.len())
            .field("complete", &self.complete)
            .field("age", &self.age())
            .finish()
    }
}
