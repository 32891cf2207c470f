//! Reservation timers
//!
//! Every granted reservation gets one timer. When it fires, the timer
//! re-reads the book under the store lock and settles the reservation via
//! [`Store::settle`]: no-op if that exact reservation is gone, cancel if the
//! deadline passed, borrow if the holder's claim landed first.
//!
//! Timers are tracked per reservation (book, holder, deadline). An explicit
//! borrow or removal cancels exactly the timer of the reservation it ended,
//! never one started for a later reservation of the same book. Shutdown
//! cancels them all.
//!
//! # Claim simulation
//!
//! A timer fires after `min(claim delay, time left until the deadline)`. The
//! claim delay models the holder picking the book up:
//!
//! - `never`: always wait out the deadline, so every timer expires
//! - `after`: fixed delay
//! - `random`: uniform in `[0, max)`

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{BookId, Reservation, Resolution};
use crate::store::Store;

// =============================================================================
// Claim policy
// =============================================================================

/// How long a reservation holder takes to claim the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// Holder never claims; reservations always expire
    Never,
    /// Holder claims after a fixed delay
    After(Duration),
    /// Holder claims after a random delay below `max`
    Random { max: Duration },
}

impl ClaimPolicy {
    /// Draw the claim delay for one reservation
    pub fn claim_delay(&self) -> Option<Duration> {
        match self {
            ClaimPolicy::Never => None,
            ClaimPolicy::After(delay) => Some(*delay),
            ClaimPolicy::Random { max } => {
                let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                if max_ms == 0 {
                    return Some(Duration::ZERO);
                }
                let ms = rand::thread_rng().gen_range(0..max_ms);
                Some(Duration::from_millis(ms))
            }
        }
    }
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        ClaimPolicy::Random {
            max: Duration::from_secs(8),
        }
    }
}

/// Claim mode names as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimMode {
    Never,
    After,
    Random,
}

impl fmt::Display for ClaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimMode::Never => write!(f, "never"),
            ClaimMode::After => write!(f, "after"),
            ClaimMode::Random => write!(f, "random"),
        }
    }
}

impl FromStr for ClaimMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "never" | "none" => Ok(ClaimMode::Never),
            "after" | "fixed" => Ok(ClaimMode::After),
            "random" => Ok(ClaimMode::Random),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid claim mode '{}'. Expected: never, after, random",
                s
            ))),
        }
    }
}

// =============================================================================
// Timer registry
// =============================================================================

/// Counters kept by the timers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    /// Timers waiting to fire
    pub outstanding: usize,
    pub expired: u64,
    pub auto_borrowed: u64,
    pub stale: u64,
    /// Timers cancelled before firing
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    expired: AtomicU64,
    auto_borrowed: AtomicU64,
    stale: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Default)]
struct Registry {
    timers: HashMap<Reservation, JoinHandle<()>>,
    closed: bool,
}

/// Spawns, tracks and cancels reservation timers
#[derive(Clone)]
pub struct ExpiryTimers {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    claim: ClaimPolicy,
    registry: Arc<Mutex<Registry>>,
    counters: Arc<Counters>,
}

impl fmt::Debug for ExpiryTimers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryTimers")
            .field("claim", &self.claim)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl ExpiryTimers {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, claim: ClaimPolicy) -> Self {
        Self {
            store,
            clock,
            claim,
            registry: Arc::new(Mutex::new(Registry::default())),
            counters: Arc::new(Counters::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        self.claim
    }

    /// Number of timers that have not fired or been cancelled
    pub fn outstanding(&self) -> usize {
        self.registry().timers.len()
    }

    /// Check whether any timer is pending for `book`
    pub fn is_pending(&self, book: BookId) -> bool {
        self.registry().timers.keys().any(|r| r.book_id == book)
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            outstanding: self.outstanding(),
            expired: self.counters.expired.load(Ordering::Relaxed),
            auto_borrowed: self.counters.auto_borrowed.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// How long the timer for `reservation` should sleep
    pub fn delay_for(&self, reservation: &Reservation) -> Duration {
        let until_deadline = (reservation.reserved_until - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        match self.claim.claim_delay() {
            Some(claim) => claim.min(until_deadline),
            None => until_deadline,
        }
    }

    /// Start the timer for a freshly granted reservation
    ///
    /// Must be called from within a tokio runtime. Returns `false` once the
    /// timers have been shut down, or when this reservation already has a
    /// timer. Timers of other reservations are never touched.
    pub fn schedule(&self, reservation: Reservation) -> bool {
        let delay = self.delay_for(&reservation);

        let mut registry = self.registry();
        if registry.closed {
            tracing::debug!(
                book = reservation.book_id,
                member = reservation.member_id,
                "timers shut down, reservation left to be settled manually"
            );
            return false;
        }
        if registry.timers.contains_key(&reservation) {
            return false;
        }

        // spawned under the registry lock so the entry exists before the
        // timer can try to remove it
        let timers = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.fire(reservation);
        });
        registry.timers.insert(reservation, handle);

        tracing::debug!(
            book = reservation.book_id,
            member = reservation.member_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reservation timer scheduled"
        );
        true
    }

    fn fire(&self, reservation: Reservation) {
        let Reservation {
            book_id, member_id, ..
        } = reservation;
        let resolution = self.store.settle(&reservation, self.clock.now());

        self.registry().timers.remove(&reservation);

        match resolution {
            Resolution::Expired => {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    book = book_id,
                    member = member_id,
                    "reservation expired and was cancelled"
                );
            }
            Resolution::Borrowed => {
                self.counters.auto_borrowed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    book = book_id,
                    member = member_id,
                    "reservation claimed, book borrowed"
                );
            }
            Resolution::Stale => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    book = book_id,
                    member = member_id,
                    "reservation already settled"
                );
            }
        }
    }

    /// Cancel the timer of `reservation`, if it is still pending
    pub fn cancel(&self, reservation: &Reservation) -> bool {
        let Some(handle) = self.registry().timers.remove(reservation) else {
            return false;
        };
        handle.abort();
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            book = reservation.book_id,
            member = reservation.member_id,
            "reservation timer cancelled"
        );
        true
    }

    /// Cancel every pending timer and refuse new ones
    ///
    /// Returns how many timers were cancelled. Waits until the cancelled
    /// tasks have actually stopped.
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = {
            let mut registry = self.registry();
            registry.closed = true;
            registry.timers.drain().map(|(_, handle)| handle).collect()
        };

        let count = handles.len();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            // a cancelled task reports a JoinError; that is the expected outcome
            let _ = handle.await;
        }

        self.counters
            .cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::info!(cancelled = count, "reservation timers shut down");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, RuntimeClock};
    use crate::model::BookStatus;

    fn setup(claim: ClaimPolicy) -> (Arc<Store>, ExpiryTimers) {
        let store = Arc::new(Store::new());
        store.add_book("Concurrency in Go", "K. Author");
        store.add_member("Alice");
        let timers = ExpiryTimers::new(Arc::clone(&store), Arc::new(RuntimeClock::new()), claim);
        (store, timers)
    }

    fn reserve(store: &Store, timers: &ExpiryTimers) -> Reservation {
        let now = timers.clock.now();
        store
            .reserve(1, 1, now, chrono::Duration::seconds(5))
            .unwrap()
    }

    #[test]
    fn test_claim_mode_parse() {
        assert_eq!(ClaimMode::from_str("never").unwrap(), ClaimMode::Never);
        assert_eq!(ClaimMode::from_str("AFTER").unwrap(), ClaimMode::After);
        assert_eq!(ClaimMode::from_str("random").unwrap(), ClaimMode::Random);
        assert!(ClaimMode::from_str("sometimes").is_err());
    }

    #[test]
    fn test_random_claim_delay_stays_below_max() {
        let policy = ClaimPolicy::Random {
            max: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let delay = policy.claim_delay().unwrap();
            assert!(delay < Duration::from_millis(50));
        }
        assert_eq!(
            ClaimPolicy::Random { max: Duration::ZERO }.claim_delay(),
            Some(Duration::ZERO)
        );
        assert_eq!(ClaimPolicy::Never.claim_delay(), None);
    }

    #[test]
    fn test_delay_is_bounded_by_deadline() {
        let store = Arc::new(Store::new());
        let clock = ManualClock::default();
        let reservation = Reservation {
            book_id: 1,
            member_id: 1,
            reserved_until: clock.now() + chrono::Duration::seconds(5),
        };

        let never = ExpiryTimers::new(Arc::clone(&store), Arc::new(clock.clone()), ClaimPolicy::Never);
        assert_eq!(never.delay_for(&reservation), Duration::from_secs(5));

        let slow = ExpiryTimers::new(
            Arc::clone(&store),
            Arc::new(clock.clone()),
            ClaimPolicy::After(Duration::from_secs(30)),
        );
        assert_eq!(slow.delay_for(&reservation), Duration::from_secs(5));

        let fast = ExpiryTimers::new(
            Arc::clone(&store),
            Arc::new(clock.clone()),
            ClaimPolicy::After(Duration::from_secs(2)),
        );
        assert_eq!(fast.delay_for(&reservation), Duration::from_secs(2));

        clock.advance(chrono::Duration::seconds(9));
        assert_eq!(never.delay_for(&reservation), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_reservation_at_deadline() {
        let (store, timers) = setup(ClaimPolicy::Never);
        let reservation = reserve(&store, &timers);
        assert!(timers.schedule(reservation));
        assert!(timers.is_pending(1));

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(store.find_book(1).unwrap().is_reserved_by(1));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let book = store.find_book(1).unwrap();
        assert!(book.is_available());
        assert_eq!(timers.stats().expired, 1);
        assert_eq!(timers.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_converts_early_claim_into_borrow() {
        let (store, timers) = setup(ClaimPolicy::After(Duration::from_secs(2)));
        let reservation = reserve(&store, &timers);
        timers.schedule(reservation);

        tokio::time::sleep(Duration::from_secs(3)).await;

        let book = store.find_book(1).unwrap();
        assert_eq!(book.status, BookStatus::Borrowed);
        assert!(book.reserved_by.is_none());
        assert_eq!(store.list_borrowed_books(1).len(), 1);
        assert_eq!(timers.stats().auto_borrowed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_wake_after_explicit_borrow_is_noop() {
        let (store, timers) = setup(ClaimPolicy::Never);
        let reservation = reserve(&store, &timers);
        timers.schedule(reservation);

        // borrow straight through the store, leaving the timer armed
        store.borrow_book(1, 1).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(store.find_book(1).unwrap().status, BookStatus::Borrowed);
        assert_eq!(store.list_borrowed_books(1).len(), 1);
        assert_eq!(timers.stats().stale, 1);
        assert_eq!(timers.stats().expired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_resolution() {
        let (store, timers) = setup(ClaimPolicy::Never);
        let reservation = reserve(&store, &timers);
        timers.schedule(reservation);

        assert!(timers.cancel(&reservation));
        assert!(!timers.cancel(&reservation));
        tokio::time::sleep(Duration::from_secs(10)).await;

        // nothing settled the reservation
        assert!(store.find_book(1).unwrap().is_reserved_by(1));
        assert_eq!(timers.stats().cancelled, 1);
        assert_eq!(timers.stats().expired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_an_ended_reservation_spares_the_next_one() {
        let (store, timers) = setup(ClaimPolicy::Never);
        store.add_member("Bob");
        let first = reserve(&store, &timers);
        timers.schedule(first);

        // the holder borrows and returns; the first timer is still armed
        store.borrow_book(1, 1).unwrap();
        store.return_book(1, 1).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = store
            .reserve(1, 2, timers.clock.now(), chrono::Duration::seconds(5))
            .unwrap();
        assert!(timers.schedule(second));
        assert_eq!(timers.outstanding(), 2);

        // a cancel that arrives late for the first reservation
        assert!(timers.cancel(&first));
        assert!(timers.is_pending(1));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.find_book(1).unwrap().is_available());
        assert_eq!(timers.stats().expired, 1);
        assert_eq!(timers.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_leaves_other_reservations_running() {
        let (store, timers) = setup(ClaimPolicy::Never);
        store.add_member("Bob");
        let first = reserve(&store, &timers);
        assert!(timers.schedule(first));
        assert!(!timers.schedule(first));

        // the first wake is stale once the book changes hands
        store.borrow_book(1, 1).unwrap();
        store.return_book(1, 1).unwrap();
        let second = store
            .reserve(1, 2, timers.clock.now(), chrono::Duration::seconds(8))
            .unwrap();
        assert!(timers.schedule(second));
        assert_eq!(timers.outstanding(), 2);
        assert_eq!(timers.stats().cancelled, 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(timers.stats().stale, 1);
        assert!(store.find_book(1).unwrap().is_reserved_by(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.find_book(1).unwrap().is_available());
        assert_eq!(timers.stats().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything_and_closes() {
        let (store, timers) = setup(ClaimPolicy::Never);
        store.add_book("Second", "B");
        let now = timers.clock.now();
        for book in [1, 2] {
            let reservation = store
                .reserve(book, 1, now, chrono::Duration::seconds(5))
                .unwrap();
            timers.schedule(reservation);
        }
        assert_eq!(timers.outstanding(), 2);

        assert_eq!(timers.shutdown().await, 2);
        assert_eq!(timers.outstanding(), 0);
        assert_eq!(timers.shutdown().await, 0);

        let late = Reservation {
            book_id: 1,
            member_id: 1,
            reserved_until: now,
        };
        assert!(!timers.schedule(late));
    }
}
