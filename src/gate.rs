//! Single-flight coordination.
//!
//! When a number of tasks want the same expensive operation done at the same time, only the first of them (the
//! *leader*) actually runs it. Everybody arriving while the operation is in flight becomes a *follower*: it waits for
//! the leader to finish and gets a clone of the leader's outcome, be it a value or an error.
//!
//! Nothing is remembered after a flight lands. The next call, successful or not, starts a new flight. Keeping results
//! around is the job of [`LazyCache`](crate::LazyCache).
//!
//! The outcome is handed over through a [`tokio::sync::watch`] channel. Whatever the leader did before publishing the
//! outcome (like installing a new cache snapshot) is visible to a follower once it has received the outcome.

use crate::error::CacheError;
use crate::types::GateStats;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::{Debug, Display},
    future::Future,
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, warn};

type Outcome<V, E> = Option<Result<V, CacheError<E>>>;

enum Role<V, E>
where
    E: Display + Debug,
{
    Leader(u64, watch::Sender<Outcome<V, E>>),
    Follower(watch::Receiver<Outcome<V, E>>),
}

/// Removes the flight record when the leader is done or its future gets dropped halfway.
struct FlightGuard<'a, K, V, E>
where
    K: Hash + Eq,
    E: Display + Debug,
{
    group: &'a SingleFlightGroup<K, V, E>,
    key:   &'a K,
    id:    u64,
}

impl<K, V, E> Drop for FlightGuard<'_, K, V, E>
where
    K: Hash + Eq,
    E: Display + Debug,
{
    fn drop(&mut self) {
        let mut flights = self.group.flights.lock();
        if flights.get(self.key).is_some_and(|(id, _)| *id == self.id) {
            flights.remove(self.key);
        }
    }
}

/// Keyed single-flight: one independent flight per key.
///
/// Calls for the same key collapse into a single execution; calls for different keys never wait for each other.
pub struct SingleFlightGroup<K, V, E>
where
    E: Display + Debug,
{
    flights:   Mutex<HashMap<K, (u64, watch::Receiver<Outcome<V, E>>)>>,
    led:       AtomicU64,
    followed:  AtomicU64,
    timed_out: AtomicU64,
}

impl<K, V, E> SingleFlightGroup<K, V, E>
where
    K: Debug + Hash + Eq + Clone,
    V: Clone,
    E: Display + Debug,
{
    pub fn new() -> Self {
        Self {
            flights:   Mutex::new(HashMap::new()),
            led:       AtomicU64::new(0),
            followed:  AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Run `operation` for `key` unless a flight for the same key is already on its way, in which case wait for it
    /// and return its outcome.
    pub async fn execute<F, Fut>(&self, key: &K, operation: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError<E>>>,
    {
        self.execute_with_timeout(key, None, operation).await
    }

    /// Same as [`execute`](Self::execute), but a follower waits no longer than `timeout` and then fails with
    /// [`CacheError::Timeout`]. The leader is never limited.
    ///
    /// If the leader's future is dropped before it lands, its followers start over: one of them becomes the new
    /// leader and runs its own `operation`.
    pub async fn execute_with_timeout<F, Fut>(
        &self,
        key: &K,
        timeout: Option<Duration>,
        operation: F,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError<E>>>,
    {
        let deadline = timeout.map(|t| (Instant::now() + t, t));

        let (id, sender) = loop {
            match self.join(key) {
                Role::Leader(id, sender) => break (id, sender),
                Role::Follower(receiver) => {
                    if let Some(outcome) = self.follow(key, receiver, deadline).await {
                        return outcome;
                    }
                    debug!(?key, "leader abandoned its flight, rejoining");
                }
            }
        };

        debug!(?key, flight = id, "leading flight");
        let guard = FlightGuard { group: self, key, id };
        let outcome = operation().await;
        // Unregister first so that tasks arriving from now on start a fresh flight instead of picking up this outcome.
        drop(guard);
        sender.send_replace(Some(outcome.clone()));
        outcome
    }

    fn join(&self, key: &K) -> Role<V, E> {
        let mut flights = self.flights.lock();

        if let Some((_, receiver)) = flights.get(key) {
            // A closed channel means the leader is gone without an outcome; its record is stale.
            if receiver.has_changed().is_ok() {
                self.followed.fetch_add(1, Ordering::Relaxed);
                return Role::Follower(receiver.clone());
            }
        }

        let id = self.led.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = watch::channel(None);
        flights.insert(key.clone(), (id, receiver));
        Role::Leader(id, sender)
    }

    // `None` means the leader vanished without publishing anything.
    async fn follow(
        &self,
        key: &K,
        mut receiver: watch::Receiver<Outcome<V, E>>,
        deadline: Option<(Instant, Duration)>,
    ) -> Option<Result<V, CacheError<E>>> {
        let landed = if let Some((deadline, timeout)) = deadline {
            match tokio::time::timeout_at(deadline, receiver.wait_for(|outcome| outcome.is_some())).await {
                Ok(landed) => landed.map(|outcome| Option::clone(&outcome)),
                Err(_) => {
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(?key, ?timeout, "gave up waiting for the flight leader");
                    return Some(Err(CacheError::Timeout(timeout)));
                }
            }
        }
        else {
            receiver
                .wait_for(|outcome| outcome.is_some())
                .await
                .map(|outcome| Option::clone(&outcome))
        };

        landed.ok().flatten()
    }

    /// Detach the flight for `key`, if any. Its leader and current followers still get its outcome, but tasks
    /// arriving from now on start a new flight.
    pub fn forget(&self, key: &K) {
        if self.flights.lock().remove(key).is_some() {
            debug!(?key, "flight detached");
        }
    }

    /// Detach all flights in progress.
    pub fn forget_all(&self) {
        self.flights.lock().clear();
    }

    /// `true` while a flight for `key` is in progress.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights
            .lock()
            .get(key)
            .is_some_and(|(_, receiver)| receiver.has_changed().is_ok())
    }

    /// Number of flights currently in progress.
    pub fn in_flight_count(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            flights:   self.led.load(Ordering::Relaxed),
            followers: self.followed.load(Ordering::Relaxed),
            timeouts:  self.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl<K, V, E> Default for SingleFlightGroup<K, V, E>
where
    K: Debug + Hash + Eq + Clone,
    V: Clone,
    E: Display + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Debug for SingleFlightGroup<K, V, E>
where
    E: Display + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightGroup")
            .field("in_flight", &self.flights.lock().len())
            .field("led", &self.led.load(Ordering::Relaxed))
            .finish()
    }
}

/// Unkeyed single-flight gate guarding one logical operation.
///
/// A gate belongs to whoever constructs it. To make several caches share their population flights, build one gate,
/// wrap it into an `Arc` and hand it to each of them.
pub struct SingleFlightGate<V, E>
where
    E: Display + Debug,
{
    group: SingleFlightGroup<(), V, E>,
}

impl<V, E> SingleFlightGate<V, E>
where
    V: Clone,
    E: Display + Debug,
{
    pub fn new() -> Self {
        Self {
            group: SingleFlightGroup::new(),
        }
    }

    pub async fn execute<F, Fut>(&self, operation: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError<E>>>,
    {
        self.group.execute_with_timeout(&(), None, operation).await
    }

    pub async fn execute_with_timeout<F, Fut>(&self, timeout: Option<Duration>, operation: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError<E>>>,
    {
        self.group.execute_with_timeout(&(), timeout, operation).await
    }

    /// Detach the operation in flight: whoever is already waiting for it gets its outcome, newcomers start over.
    pub fn forget(&self) {
        self.group.forget(&())
    }

    pub fn is_in_flight(&self) -> bool {
        self.group.is_in_flight(&())
    }

    pub fn stats(&self) -> GateStats {
        self.group.stats()
    }
}

impl<V, E> Default for SingleFlightGate<V, E>
where
    V: Clone,
    E: Display + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Debug for SingleFlightGate<V, E>
where
    E: Display + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightGate")
            .field("in_flight", &(self.group.flights.lock().len() > 0))
            .finish()
    }
}
