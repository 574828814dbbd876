//! # sf-cache
//!
//! Lazily populated in-process cache that loads its data at most once per cold period, no matter how many tasks are
//! asking for it at the same time.
//!
//! # The Problem
//!
//! A cache in front of a slow backend is usually empty when a service starts, right after it has been invalidated, or
//! when its data has expired. If a hundred requests arrive at that moment, a naive implementation lets every one of
//! them notice the empty cache and go to the backend. This is the *thundering herd*: the backend receives a hundred
//! identical queries exactly when it is least prepared for them.
//!
//! The common fix, wrapping the whole lookup into a lock, trades the herd for a convoy: every read, including those
//! served from a perfectly warm cache, is serialized forever.
//!
//! # The Basics
//!
//! The cache operates on the following principles:
//!
//! - It is backend-agnostic. Data comes from a user-provided [`Loader`].
//! - It is key and value agnostic.
//! - A populated cache is read without waiting: the data lives in an immutable [`CacheSnapshot`] published through an
//!   `Arc`, and a reader only needs to clone the `Arc`.
//! - A cold cache is populated through a [`SingleFlightGate`](gate::SingleFlightGate). The first task to arrive
//!   becomes the *leader* and calls the loader; everybody arriving while it works becomes a *follower* and receives
//!   the leader's outcome. The loader is called once, the result is shared.
//! - Failures are shared the same way but are not remembered: the next call after a failure makes a new attempt.
//! - Fully async.
//! - As an in-process cache, it doesn't support distributed caching.
//!
//! The state of a cache follows a simple cycle:
//!
//! ```text
//! Empty --(first reader enters the gate)--> Populating --(load succeeds)--> Populated --(invalidate)--> Empty
//!                                               |
//!                                               +--(load fails)--> Empty
//! ```
//!
//! # Loaders
//!
//! A [`Loader`] defines the key, value and error types of a cache and knows how to fetch either the complete data set
//! or a single record. Which of the two a keyed lookup uses on a miss is decided by the cache's
//! [`LoadStrategy`](types::LoadStrategy):
//!
//! - `Bulk` loads the complete data set once and answers every lookup from it, including "no such key".
//! - `PerKey` loads just the requested record and grows the snapshot one key at a time, remembering missing keys too.
//!   Lookups of different keys populate independently of each other.
//!
//! # Options
//!
//! Caches are created with [`LazyCache::builder()`]. Besides the loader, the builder accepts a follower timeout, a TTL
//! for snapshots, a cooldown period after failures, and a gate to share with other caches representing the same data.

pub mod cache;
pub mod entry;
pub mod error;
pub mod gate;
pub mod snapshot;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::LazyCache;
#[doc(inline)]
pub use entry::CacheEntry;
#[doc(inline)]
pub use snapshot::CacheSnapshot;
#[doc(inline)]
pub use traits::Loader;

pub mod prelude {
    pub use crate::cache::LazyCache;
    pub use crate::entry::CacheEntry;
    pub use crate::error::CacheError;
    pub use crate::snapshot::CacheSnapshot;
    pub use crate::traits::InvalidationControl;
    pub use crate::traits::Loader;
    pub use crate::types::*;
}
