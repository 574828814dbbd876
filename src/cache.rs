use crate::{
    gate::{SingleFlightGate, SingleFlightGroup},
    prelude::*,
    snapshot::Lookup,
};
use fieldx_plus::fx_plus;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, instrument, warn};

pub type Snapshot<L> = CacheSnapshot<<L as Loader>::Key, <L as Loader>::Value>;
pub type Entry<L> = CacheEntry<<L as Loader>::Key, <L as Loader>::Value>;
pub type CacheResult<T, L> = Result<T, CacheError<<L as Loader>::Error>>;

/// Gate type guarding bulk population of a [`LazyCache`]. Pass one wrapped in `Arc` to
/// [`LazyCacheBuilder::gate()`] of several caches to make them share their population flights.
pub type BulkGate<L> = SingleFlightGate<Arc<Snapshot<L>>, <L as Loader>::Error>;

type KeyFlights<L> = SingleFlightGroup<<L as Loader>::Key, Option<Arc<Entry<L>>>, <L as Loader>::Error>;

// The only mutable state of a cache. The lock is held just long enough to clone or swap an `Arc`.
//
// Whether a population is in progress is not recorded here: the gates know it, and they forget a flight as soon as
// its leader is done or dropped.
struct Slot<K, V> {
    snapshot:    Option<Arc<CacheSnapshot<K, V>>>,
    // Bumped by every invalidation. A population that started under an older epoch must not publish its result.
    epoch:       u64,
    // Last failed bulk load. Cools down every cold-path call.
    failed_at:   Option<Instant>,
    // Last failed single-key loads. Each one cools down lookups of its own key only.
    failed_keys: HashMap<K, Instant>,
}

impl<K, V> Slot<K, V> {
    fn new() -> Self {
        Self {
            snapshot:    None,
            epoch:       0,
            failed_at:   None,
            failed_keys: HashMap::new(),
        }
    }

    fn snapshot(&self) -> Option<&Arc<CacheSnapshot<K, V>>> {
        self.snapshot.as_ref()
    }
}

/// Lazily populated cache with single-flight population.
///
/// ```ignore
/// let cache = LazyCache::builder()
///     .loader(MyLoader::new(pool))
///     .name("lookups")
///     .follower_timeout(Duration::from_secs(5))
///     .build()?;
///
/// // First call loads the data; concurrent callers wait for that one load.
/// let all = cache.get_all().await?;
/// // Served from the published snapshot, no waiting.
/// let one = cache.get(&key).await?;
/// ```
///
/// Reads of a populated cache never wait for anything but a brief `Arc` clone. Only the transition from cold to
/// populated goes through the gate, and only one loader call is made for it no matter how many tasks are asking.
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`LazyCache`].", "", "See [`LazyCache::builder()`] method."),
        method_doc("Implement builder pattern for [`LazyCache`]."),
    )
)]
pub struct LazyCache<L>
where
    L: Loader,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required, into), get(clone))]
    loader: Arc<L>,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(optional, get(off))]
    name: &'static str,

    /// How [`get()`](Self::get) populates a cold cache.
    #[fieldx(get(copy), default(LoadStrategy::Bulk))]
    load_strategy: LoadStrategy,

    /// The longest time a task waits for somebody else's population before giving up with
    /// [`CacheError::Timeout`]. Unlimited by default.
    #[fieldx(optional, get(copy))]
    follower_timeout: Duration,

    /// Snapshots older than this are considered cold and get reloaded on next access. No expiry by default.
    #[fieldx(optional, get(copy))]
    ttl: Duration,

    /// After a failed population, refuse new attempts for this long with [`CacheError::CoolingDown`].
    #[fieldx(optional, get(copy))]
    failure_cooldown: Duration,

    #[fieldx(get(clone), builder(into), default(Arc::new(SingleFlightGate::new())))]
    gate: Arc<BulkGate<L>>,

    #[fieldx(get(off), builder(off), default(SingleFlightGroup::new()))]
    key_flights: KeyFlights<L>,

    #[fieldx(get(off), builder(off), default(RwLock::new(Slot::new())))]
    slot: RwLock<Slot<L::Key, L::Value>>,
}

impl<L> LazyCache<L>
where
    L: Loader,
{
    #[inline]
    pub fn name(&self) -> String {
        self.name.unwrap_or_else(|| std::any::type_name::<L>()).to_string()
    }

    /// The published snapshot if it is still fresh. Never waits for a population.
    #[inline]
    fn current(&self) -> Option<Arc<Snapshot<L>>> {
        let ttl = self.ttl();
        self.slot.read().snapshot().filter(|s| s.is_fresh(ttl)).cloned()
    }

    fn current_complete(&self) -> Option<Arc<Snapshot<L>>> {
        self.current().filter(|s| s.is_complete())
    }

    /// Return the complete data set, loading it if the cache is cold.
    pub async fn get_all(&self) -> CacheResult<Arc<Snapshot<L>>, L> {
        if let Some(snapshot) = self.current_complete() {
            return Ok(snapshot);
        }
        self.populate().await
    }

    /// Look up a single key. `Ok(None)` means the key doesn't exist in the backing store.
    ///
    /// With [`LoadStrategy::Bulk`] a miss on a cold cache loads the whole data set; with [`LoadStrategy::PerKey`] only
    /// the requested key is loaded and added to the snapshot.
    pub async fn get(&self, key: &L::Key) -> CacheResult<Option<Arc<Entry<L>>>, L> {
        if let Some(snapshot) = self.current() {
            match snapshot.lookup(key) {
                Lookup::Found(entry) => return Ok(Some(Arc::clone(entry))),
                Lookup::Missing => return Ok(None),
                Lookup::Unknown => (),
            }
        }

        match self.load_strategy() {
            LoadStrategy::Bulk => Ok(self.populate().await?.get(key).cloned()),
            LoadStrategy::PerKey => self.populate_key(key).await,
        }
    }

    /// Current snapshot, if any, without triggering a load. May be partial for per-key caches.
    pub fn peek(&self) -> Option<Arc<Snapshot<L>>> {
        self.current()
    }

    /// A fresh snapshot makes the cache `Populated`, even if more keys are being loaded into it. Without one, the cache
    /// is `Populating` for as long as any population flight is on its way.
    pub fn state(&self) -> CacheState {
        if self.current().is_some() {
            CacheState::Populated
        }
        else if self.gate.is_in_flight() || self.key_flights.in_flight_count() > 0 {
            CacheState::Populating
        }
        else {
            CacheState::Empty
        }
    }

    #[inline]
    pub fn is_populated(&self) -> bool {
        self.state() == CacheState::Populated
    }

    /// Drop the current snapshot. The next read starts a fresh population.
    ///
    /// Readers already holding the old snapshot keep using it. A population that is in flight right now still answers
    /// its own callers but its result won't be installed.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        slot.epoch += 1;
        slot.snapshot = None;
        slot.failed_at = None;
        slot.failed_keys.clear();
        // Under the slot lock, so nobody reading the new epoch can still join a flight started under the old one.
        self.gate.forget();
        self.key_flights.forget_all();
        debug!(cache = %self.name(), epoch = slot.epoch, "invalidated");
    }

    /// Statistics of the bulk population gate.
    pub fn stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// Statistics of per-key population.
    pub fn key_stats(&self) -> GateStats {
        self.key_flights.stats()
    }

    // Returns the epoch a new population attempt would run under. A bulk failure cools down everything, a single-key
    // failure only lookups of that key.
    fn check_cooldown(&self, key: Option<&L::Key>) -> CacheResult<u64, L> {
        let slot = self.slot.read();
        if let Some(cooldown) = self.failure_cooldown() {
            let key_failed_at = key.and_then(|key| slot.failed_keys.get(key).copied());
            if let Some(failed_at) = slot.failed_at.max(key_failed_at) {
                let remaining = cooldown.saturating_sub(failed_at.elapsed());
                if !remaining.is_zero() {
                    debug!(cache = %self.name(), ?remaining, "population refused, cooling down");
                    return Err(CacheError::CoolingDown { remaining });
                }
            }
        }
        Ok(slot.epoch)
    }

    #[inline]
    fn epoch(&self) -> u64 {
        self.slot.read().epoch
    }

    fn population_failed(&self, epoch: u64, key: Option<&L::Key>) {
        let mut slot = self.slot.write();
        if slot.epoch != epoch {
            return;
        }
        match key {
            None => slot.failed_at = Some(Instant::now()),
            Some(key) => {
                if let Some(cooldown) = self.failure_cooldown() {
                    slot.failed_keys.retain(|_, failed_at| failed_at.elapsed() < cooldown);
                    slot.failed_keys.insert(key.clone(), Instant::now());
                }
            }
        }
    }

    // Returns false if the cache has been invalidated since `epoch`.
    fn install(&self, epoch: u64, snapshot: &Arc<Snapshot<L>>) -> bool {
        let mut slot = self.slot.write();
        if slot.epoch != epoch {
            return false;
        }
        slot.snapshot = Some(Arc::clone(snapshot));
        slot.failed_at = None;
        slot.failed_keys.clear();
        true
    }

    #[instrument(level = "debug", skip_all, fields(cache = %self.name()))]
    async fn populate(&self) -> CacheResult<Arc<Snapshot<L>>, L> {
        let epoch = self.check_cooldown(None)?;
        let loader = self.loader();

        let outcome = self
            .gate
            .execute_with_timeout(self.follower_timeout(), move || async move {
                // Somebody may have populated the cache between our fast-path check and getting the lead.
                if let Some(snapshot) = self.current_complete() {
                    return Ok(snapshot);
                }

                let epoch = self.epoch();
                debug!("loading all records");

                match loader.load_all().await {
                    Ok(records) => {
                        let snapshot = Arc::new(CacheSnapshot::from_records(records));
                        if self.install(epoch, &snapshot) {
                            debug!(entries = snapshot.len(), "snapshot installed");
                        }
                        else {
                            debug!("cache invalidated during load, snapshot not installed");
                        }
                        Ok(snapshot)
                    }
                    Err(err) => {
                        warn!(error = %err, "load failed");
                        self.population_failed(epoch, None);
                        Err(CacheError::load(err))
                    }
                }
            })
            .await;

        // With a gate shared between caches the leader may have been another instance.
        if let Ok(snapshot) = &outcome {
            if self.current_complete().is_none() {
                self.install(epoch, snapshot);
            }
        }

        outcome
    }

    #[instrument(level = "debug", skip_all, fields(cache = %self.name(), key = ?key))]
    async fn populate_key(&self, key: &L::Key) -> CacheResult<Option<Arc<Entry<L>>>, L> {
        self.check_cooldown(Some(key))?;
        let loader = self.loader();

        self.key_flights
            .execute_with_timeout(key, self.follower_timeout(), move || async move {
                if let Some(snapshot) = self.current() {
                    match snapshot.lookup(key) {
                        Lookup::Found(entry) => return Ok(Some(Arc::clone(entry))),
                        Lookup::Missing => return Ok(None),
                        Lookup::Unknown => (),
                    }
                }

                let epoch = self.epoch();
                let started = Instant::now();
                debug!("loading record");

                match loader.load_one(key).await {
                    Ok(value) => {
                        let entry = value.map(|v| Arc::new(CacheEntry::new(key.clone(), v)));
                        self.merge(epoch, started, key, entry.clone());
                        Ok(entry)
                    }
                    Err(err) => {
                        warn!(error = %err, "load failed");
                        self.population_failed(epoch, Some(key));
                        Err(CacheError::load(err))
                    }
                }
            })
            .await
    }

    // Publish a copy of the current snapshot extended with one key. The copy is built outside of the lock; if another
    // task publishes in the meantime, start over from its snapshot.
    //
    // A complete snapshot created after the key load had started already carries a newer answer for the key.
    fn merge(&self, epoch: u64, started: Instant, key: &L::Key, entry: Option<Arc<Entry<L>>>) {
        let ttl = self.ttl();
        loop {
            let base = {
                let slot = self.slot.read();
                if slot.epoch != epoch {
                    debug!("cache invalidated during load, record not installed");
                    return;
                }
                slot.snapshot().filter(|s| s.is_fresh(ttl)).cloned()
            };

            if base.as_ref().is_some_and(|b| b.is_complete() && b.created_at() >= started) {
                debug!("newer bulk snapshot in place, record not merged");
                return;
            }

            let extended = Arc::new(match &base {
                Some(base) => base.with_lookup(key, entry.clone()),
                None => CacheSnapshot::partial().with_lookup(key, entry.clone()),
            });

            let mut slot = self.slot.write();
            if slot.epoch != epoch {
                debug!("cache invalidated during load, record not installed");
                return;
            }

            let current = slot.snapshot().filter(|s| s.is_fresh(ttl));
            let unchanged = match (&base, current) {
                (Some(base), Some(current)) => Arc::ptr_eq(base, current),
                (None, None) => true,
                _ => false,
            };

            if unchanged {
                slot.snapshot = Some(extended);
                slot.failed_at = None;
                slot.failed_keys.remove(key);
                return;
            }
        }
    }
}

impl<L> InvalidationControl for LazyCache<L>
where
    L: Loader,
{
    fn invalidate(&self) {
        LazyCache::invalidate(self)
    }

    fn state(&self) -> CacheState {
        LazyCache::state(self)
    }

    fn name(&self) -> String {
        LazyCache::name(self)
    }
}

impl<L> Debug for LazyCache<L>
where
    L: Loader,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyCache")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("load_strategy", &self.load_strategy())
            .finish()
    }
}
