//! Library facade
//!
//! [`Library`] wires the store, the reservation center and the expiry timers
//! together. Plain catalog operations go straight to the store; reservations
//! go through the center so that contenders are serialized by the workers.
//!
//! A borrow that claims the holder's own reservation, or a removal of a
//! reserved book, cancels the timer of that one reservation. A timer that is
//! not cancelled still settles as a no-op once its reservation is gone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::clock::{Clock, RuntimeClock};
use crate::config::{CatalogConfig, Config};
use crate::error::{Error, Result};
use crate::expiry::{ExpiryTimers, TimerStats};
use crate::model::{Book, BookId, Member, MemberId, Reservation};
use crate::reservation::{CenterStats, ReservationCenter, ReservationHandler, ReservationRequest};
use crate::store::{CatalogSnapshot, Store};

/// Observable counters for the whole reservation subsystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub center: CenterStats,
    /// Reservations granted by a worker
    pub granted: u64,
    /// Reservations a worker refused
    pub refused: u64,
    pub timers: TimerStats,
}

#[derive(Debug, Default)]
struct Outcomes {
    granted: AtomicU64,
    refused: AtomicU64,
}

/// Worker-side reservation logic
struct Reserver {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    timers: ExpiryTimers,
    window: chrono::Duration,
    outcomes: Arc<Outcomes>,
}

impl ReservationHandler for Reserver {
    fn handle(&self, request: ReservationRequest) {
        let outcome = self.store.reserve(
            request.book_id,
            request.member_id,
            self.clock.now(),
            self.window,
        );

        match &outcome {
            Ok(reservation) => {
                self.outcomes.granted.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    request = %request.id,
                    book = reservation.book_id,
                    member = reservation.member_id,
                    until = %reservation.reserved_until,
                    "reservation granted"
                );
                self.timers.schedule(*reservation);
            }
            Err(err) => {
                self.outcomes.refused.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    request = %request.id,
                    book = request.book_id,
                    member = request.member_id,
                    error = %err,
                    "reservation refused"
                );
            }
        }

        request.respond(outcome);
    }
}

/// In-memory catalog with concurrent reservations
#[derive(Debug)]
pub struct Library {
    store: Arc<Store>,
    timers: ExpiryTimers,
    center: ReservationCenter,
    outcomes: Arc<Outcomes>,
}

impl Library {
    /// Build a library on the runtime clock
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(RuntimeClock::new()))
    }

    /// Build a library on an explicit time source
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let reservations = &config.reservations;
        let window = reservations.window()?;
        let claim = reservations.claim.policy()?;

        let store = Arc::new(Store::new());
        let timers = ExpiryTimers::new(Arc::clone(&store), Arc::clone(&clock), claim);
        let outcomes = Arc::new(Outcomes::default());

        let reserver = Reserver {
            store: Arc::clone(&store),
            clock,
            timers: timers.clone(),
            window,
            outcomes: Arc::clone(&outcomes),
        };
        let center = ReservationCenter::new(
            reservations.workers,
            reservations.queue_capacity,
            Arc::new(reserver),
        );

        Ok(Self {
            store,
            timers,
            center,
            outcomes,
        })
    }

    /// Start the reservation workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.center.start()
    }

    /// Stop the workers, then cancel every pending timer
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.center.stop().await;
        self.timers.shutdown().await;
    }

    pub fn is_running(&self) -> bool {
        self.center.is_running()
    }

    /// Load seed books and members
    pub fn seed(&self, catalog: &CatalogConfig) {
        for book in &catalog.books {
            self.store.add_book(book.title.clone(), book.author.clone());
        }
        for name in &catalog.members {
            self.store.add_member(name.clone());
        }
        tracing::debug!(
            books = catalog.books.len(),
            members = catalog.members.len(),
            "catalog seeded"
        );
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Reserve a book and wait for a worker to answer
    pub async fn reserve_book(&self, book: BookId, member: MemberId) -> Result<Reservation> {
        let (request, response) = ReservationRequest::new(book, member);
        self.center.enqueue(request).await?;
        response.await.map_err(|_| Error::CenterStopped)?
    }

    // =========================================================================
    // Circulation
    // =========================================================================

    /// Borrow a book; the reserving member may borrow their reserved book
    pub fn borrow_book(&self, book: BookId, member: MemberId) -> Result<Book> {
        let checkout = self.store.checkout(book, member)?;
        if let Some(consumed) = &checkout.consumed {
            self.timers.cancel(consumed);
        }
        tracing::info!(book, member, "book borrowed");
        Ok(checkout.book)
    }

    pub fn return_book(&self, book: BookId, member: MemberId) -> Result<()> {
        self.store.return_book(book, member)?;
        tracing::info!(book, member, "book returned");
        Ok(())
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub fn add_book(&self, title: impl Into<String>, author: impl Into<String>) -> BookId {
        let id = self.store.add_book(title, author);
        tracing::debug!(book = id, "book added");
        id
    }

    /// Remove a book; a pending reservation on it is dropped with it
    pub fn remove_book(&self, book: BookId) -> Result<Book> {
        let removed = self.store.remove_book(book)?;
        if let Some(pending) = removed.reservation() {
            self.timers.cancel(&pending);
        }
        tracing::debug!(book, "book removed");
        Ok(removed)
    }

    pub fn add_member(&self, name: impl Into<String>) -> MemberId {
        let id = self.store.add_member(name);
        tracing::debug!(member = id, "member added");
        id
    }

    pub fn find_book(&self, book: BookId) -> Result<Book> {
        self.store.find_book(book)
    }

    pub fn find_member(&self, member: MemberId) -> Result<Member> {
        self.store.find_member(member)
    }

    pub fn list_available_books(&self) -> Vec<Book> {
        self.store.list_available_books()
    }

    pub fn list_borrowed_books(&self, member: MemberId) -> Vec<Book> {
        self.store.list_borrowed_books(member)
    }

    pub fn list_books(&self) -> Vec<Book> {
        self.store.list_books()
    }

    pub fn list_members(&self) -> Vec<Member> {
        self.store.list_members()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn snapshot(&self) -> CatalogSnapshot {
        self.store.snapshot()
    }

    /// Number of reservation timers still waiting to fire
    pub fn outstanding_timers(&self) -> usize {
        self.timers.outstanding()
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            center: self.center.stats(),
            granted: self.outcomes.granted.load(Ordering::Relaxed),
            refused: self.outcomes.refused.load(Ordering::Relaxed),
            timers: self.timers.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookStatus;

    fn config(claim: &str) -> Config {
        let mut config = Config::default();
        config.reservations.claim.mode = claim.to_string();
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = Config::default();
        for window in ["0s", "10000000000h", "9999999999999999h"] {
            cfg.reservations.window = window.to_string();
            assert!(matches!(Library::new(&cfg), Err(Error::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn test_reserve_before_start_fails() {
        let library = Library::new(&Config::default()).unwrap();
        library.seed(&Config::default().catalog);
        let err = library.reserve_book(1, 1).await.unwrap_err();
        assert!(matches!(err, Error::CenterNotInitialized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_then_borrow_cancels_timer() {
        let cfg = config("never");
        let library = Library::new(&cfg).unwrap();
        library.seed(&cfg.catalog);
        library.start().unwrap();

        let reservation = library.reserve_book(1, 2).await.unwrap();
        assert_eq!(reservation.member_id, 2);
        assert_eq!(library.outstanding_timers(), 1);

        let err = library.borrow_book(1, 1).unwrap_err();
        assert!(matches!(err, Error::ReservedByOther { holder: 2, .. }));

        library.borrow_book(1, 2).unwrap();
        assert_eq!(library.outstanding_timers(), 0);
        assert_eq!(library.find_book(1).unwrap().status, BookStatus::Borrowed);

        library.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_borrow_and_return_keep_next_reservation_timed() {
        let cfg = config("never");
        let library = Library::new(&cfg).unwrap();
        library.seed(&cfg.catalog);
        library.start().unwrap();

        library.reserve_book(1, 1).await.unwrap();
        library.borrow_book(1, 1).unwrap();
        library.return_book(1, 1).unwrap();

        library.reserve_book(1, 2).await.unwrap();
        assert_eq!(library.outstanding_timers(), 1);

        // borrowing an unreserved book touches no timer
        library.borrow_book(2, 1).unwrap();
        library.return_book(2, 1).unwrap();
        assert_eq!(library.outstanding_timers(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        assert!(library.find_book(1).unwrap().is_available());
        assert_eq!(library.stats().timers.expired, 1);

        library.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_reserved_book_cancels_timer() {
        let cfg = config("never");
        let library = Library::new(&cfg).unwrap();
        library.seed(&cfg.catalog);
        library.start().unwrap();

        library.reserve_book(2, 1).await.unwrap();
        library.remove_book(2).unwrap();
        assert_eq!(library.outstanding_timers(), 0);
        assert!(matches!(library.find_book(2), Err(Error::BookNotFound(2))));

        library.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_outcomes() {
        let cfg = config("never");
        let library = Library::new(&cfg).unwrap();
        library.seed(&cfg.catalog);
        library.start().unwrap();

        library.reserve_book(1, 1).await.unwrap();
        assert!(library.reserve_book(1, 2).await.is_err());
        assert!(library.reserve_book(9, 1).await.is_err());

        let stats = library.stats();
        assert_eq!(stats.center.processed, 3);
        assert_eq!(stats.granted, 1);
        assert_eq!(stats.refused, 2);
        assert_eq!(stats.timers.outstanding, 1);

        library.shutdown().await;
        assert_eq!(library.stats().timers.outstanding, 0);
    }
}
