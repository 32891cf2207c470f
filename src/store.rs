//! Shared catalog state
//!
//! The store owns every book and member. Each operation takes the single
//! catalog lock for its whole duration, so multi-field updates (book status,
//! reservation fields, the member's borrowed list) land together or not at
//! all. Nothing outside this module ever sees the lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Book, BookId, BookStatus, Member, MemberId, Reservation, Resolution};

#[derive(Debug)]
struct Catalog {
    books: BTreeMap<BookId, Book>,
    members: BTreeMap<MemberId, Member>,
    next_book_id: BookId,
    next_member_id: MemberId,
}

impl Catalog {
    /// Expire or borrow the pending reservation on `book_id`; the caller
    /// has checked that `member_id` holds it
    fn resolve(&mut self, book_id: BookId, member_id: MemberId, now: DateTime<Utc>) -> Resolution {
        let Some(book) = self.books.get_mut(&book_id) else {
            return Resolution::Stale;
        };

        let expired = book.reserved_until.map_or(true, |until| now >= until);
        if expired {
            book.clear_reservation();
            return Resolution::Expired;
        }

        let Some(member) = self.members.get_mut(&member_id) else {
            book.clear_reservation();
            return Resolution::Expired;
        };
        book.mark_borrowed();
        member.borrowed.push(book.clone());
        Resolution::Borrowed
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            books: BTreeMap::new(),
            members: BTreeMap::new(),
            next_book_id: 1,
            next_member_id: 1,
        }
    }
}

/// Point-in-time copy of the whole catalog
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub books: Vec<Book>,
    pub members: Vec<Member>,
}

impl CatalogSnapshot {
    /// Check every book invariant plus cross-entity consistency:
    /// a borrowed book appears in exactly one member's list, and an
    /// available book appears in none.
    pub fn is_consistent(&self) -> bool {
        self.books.iter().all(|book| {
            let holders = self
                .members
                .iter()
                .filter(|m| m.has_borrowed(book.id))
                .count();
            let expected = usize::from(book.status == BookStatus::Borrowed);
            book.is_consistent() && holders == expected
        })
    }
}

/// Result of a borrow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// The book as borrowed
    pub book: Book,
    /// The holder's own reservation, if the borrow claimed one
    pub consumed: Option<Reservation>,
}

/// Exclusive owner of book and member state
#[derive(Debug, Default)]
pub struct Store {
    catalog: Mutex<Catalog>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Books and members
    // =========================================================================

    /// Add a book and return its assigned id
    pub fn add_book(&self, title: impl Into<String>, author: impl Into<String>) -> BookId {
        let mut catalog = self.lock();
        let id = catalog.next_book_id;
        catalog.books.insert(id, Book::new(id, title, author));
        catalog.next_book_id += 1;
        id
    }

    /// Remove a book unless it is currently borrowed
    ///
    /// A pending reservation does not block removal.
    pub fn remove_book(&self, id: BookId) -> Result<Book> {
        let mut catalog = self.lock();
        let book = catalog.books.get(&id).ok_or(Error::BookNotFound(id))?;
        if book.status == BookStatus::Borrowed {
            return Err(Error::BookBorrowed(id));
        }
        catalog.books.remove(&id).ok_or(Error::BookNotFound(id))
    }

    /// Add a member and return their assigned id
    pub fn add_member(&self, name: impl Into<String>) -> MemberId {
        let mut catalog = self.lock();
        let id = catalog.next_member_id;
        catalog.members.insert(id, Member::new(id, name));
        catalog.next_member_id += 1;
        id
    }

    pub fn find_book(&self, id: BookId) -> Result<Book> {
        self.lock()
            .books
            .get(&id)
            .cloned()
            .ok_or(Error::BookNotFound(id))
    }

    pub fn find_member(&self, id: MemberId) -> Result<Member> {
        self.lock()
            .members
            .get(&id)
            .cloned()
            .ok_or(Error::MemberNotFound(id))
    }

    // =========================================================================
    // Circulation
    // =========================================================================

    /// Borrow a book for a member
    ///
    /// Allowed when the book is on the shelf and either unreserved or
    /// reserved by this same member. Clears any reservation and appends a
    /// snapshot of the book to the member's borrowed list.
    pub fn borrow_book(&self, book_id: BookId, member_id: MemberId) -> Result<Book> {
        self.checkout(book_id, member_id).map(|checkout| checkout.book)
    }

    /// Borrow a book, also reporting the reservation the borrow consumed
    pub fn checkout(&self, book_id: BookId, member_id: MemberId) -> Result<Checkout> {
        let mut guard = self.lock();
        let catalog = &mut *guard;

        let book = catalog
            .books
            .get_mut(&book_id)
            .ok_or(Error::BookNotFound(book_id))?;
        let member = catalog
            .members
            .get_mut(&member_id)
            .ok_or(Error::MemberNotFound(member_id))?;

        if book.status != BookStatus::Available {
            return Err(Error::BookNotAvailable(book_id));
        }
        if let Some(holder) = book.reserved_by {
            if holder != member_id {
                return Err(Error::ReservedByOther {
                    book: book_id,
                    holder,
                });
            }
        }

        let consumed = book.reservation();
        book.mark_borrowed();
        member.borrowed.push(book.clone());
        Ok(Checkout {
            book: book.clone(),
            consumed,
        })
    }

    /// Return a borrowed book
    pub fn return_book(&self, book_id: BookId, member_id: MemberId) -> Result<()> {
        let mut guard = self.lock();
        let catalog = &mut *guard;

        let book = catalog
            .books
            .get_mut(&book_id)
            .ok_or(Error::BookNotFound(book_id))?;
        let member = catalog
            .members
            .get_mut(&member_id)
            .ok_or(Error::MemberNotFound(member_id))?;

        if book.status != BookStatus::Borrowed {
            return Err(Error::NotBorrowed(book_id));
        }

        member.take_borrowed(book_id);
        book.status = BookStatus::Available;
        Ok(())
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Place a reservation on an unreserved, available book
    ///
    /// Checks run in order: book exists, member exists, book not borrowed,
    /// book not already reserved. On success the reservation holds until
    /// `now + window`.
    pub fn reserve(
        &self,
        book_id: BookId,
        member_id: MemberId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Reservation> {
        let mut catalog = self.lock();

        if !catalog.books.contains_key(&book_id) {
            return Err(Error::BookNotFound(book_id));
        }
        if !catalog.members.contains_key(&member_id) {
            return Err(Error::MemberNotFound(member_id));
        }
        let book = catalog
            .books
            .get_mut(&book_id)
            .ok_or(Error::BookNotFound(book_id))?;

        if book.status != BookStatus::Available {
            return Err(Error::BookNotAvailable(book_id));
        }
        if book.is_reserved() {
            return Err(Error::AlreadyReserved(book_id));
        }

        let reserved_until = now.checked_add_signed(window).ok_or_else(|| {
            Error::InvalidArgument(format!("reservation window out of range: {window}"))
        })?;
        book.reserve(member_id, reserved_until);

        Ok(Reservation {
            book_id,
            member_id,
            reserved_until,
        })
    }

    /// Settle a pending reservation as of `now`
    ///
    /// Re-reads the book: if `member_id` no longer holds a pending
    /// reservation on it, nothing changes. Otherwise the reservation is
    /// cancelled when its deadline has passed, or converted into a borrow
    /// when it has not.
    pub fn resolve_reservation(
        &self,
        book_id: BookId,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Resolution {
        let mut guard = self.lock();
        let catalog = &mut *guard;

        let holds = catalog
            .books
            .get(&book_id)
            .is_some_and(|book| book.is_reserved_by(member_id));
        if !holds {
            return Resolution::Stale;
        }
        catalog.resolve(book_id, member_id, now)
    }

    /// Settle exactly `reservation` as of `now`
    ///
    /// Like [`Store::resolve_reservation`], but a later reservation of the
    /// same book by the same member (different deadline) is left alone.
    pub fn settle(&self, reservation: &Reservation, now: DateTime<Utc>) -> Resolution {
        let mut guard = self.lock();
        let catalog = &mut *guard;

        let current = catalog
            .books
            .get(&reservation.book_id)
            .and_then(Book::reservation);
        if current != Some(*reservation) {
            return Resolution::Stale;
        }
        catalog.resolve(reservation.book_id, reservation.member_id, now)
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Books on the shelf with no pending reservation, by id
    pub fn list_available_books(&self) -> Vec<Book> {
        self.lock()
            .books
            .values()
            .filter(|b| b.is_available())
            .cloned()
            .collect()
    }

    /// A member's borrowed books; empty for unknown members
    pub fn list_borrowed_books(&self, member_id: MemberId) -> Vec<Book> {
        self.lock()
            .members
            .get(&member_id)
            .map(|m| m.borrowed.clone())
            .unwrap_or_default()
    }

    pub fn list_books(&self) -> Vec<Book> {
        self.lock().books.values().cloned().collect()
    }

    pub fn list_members(&self) -> Vec<Member> {
        self.lock().members.values().cloned().collect()
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let catalog = self.lock();
        CatalogSnapshot {
            books: catalog.books.values().cloned().collect(),
            members: catalog.members.values().cloned().collect(),
        }
    }
}
