//! Catalog data model
//!
//! Books and members are plain values. The only place they are mutated is
//! inside the [`Store`](crate::store::Store), under its lock.
//!
//! # Book reservation states
//!
//! - `Available` with no holder: free to borrow or reserve
//! - `Available` with a holder: reserved until `reserved_until`
//! - `Borrowed`: held by a member, never reserved at the same time

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type BookId = u32;
pub type MemberId = u32;

// =============================================================================
// Book Status
// =============================================================================

/// Circulation status of a book
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    /// On the shelf (possibly reserved)
    #[default]
    Available,
    /// Checked out by a member
    Borrowed,
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookStatus::Available => write!(f, "Available"),
            BookStatus::Borrowed => write!(f, "Borrowed"),
        }
    }
}

impl FromStr for BookStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "available" => Ok(BookStatus::Available),
            "borrowed" => Ok(BookStatus::Borrowed),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid book status '{}'. Expected: available, borrowed",
                s
            ))),
        }
    }
}

// =============================================================================
// Book
// =============================================================================

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Sequential identifier assigned on creation
    pub id: BookId,

    pub title: String,

    pub author: String,

    pub status: BookStatus,

    /// Member holding a pending reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_by: Option<MemberId>,

    /// Deadline of the pending reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_until: Option<DateTime<Utc>>,
}

impl Book {
    pub fn new(id: BookId, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
            status: BookStatus::Available,
            reserved_by: None,
            reserved_until: None,
        }
    }

    /// Check if the book is on the shelf and nobody holds a reservation
    pub fn is_available(&self) -> bool {
        self.status == BookStatus::Available && self.reserved_by.is_none()
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_by.is_some()
    }

    /// Check if `member` holds the pending reservation on this book
    pub fn is_reserved_by(&self, member: MemberId) -> bool {
        self.status == BookStatus::Available && self.reserved_by == Some(member)
    }

    /// Check the reservation/status invariants
    ///
    /// - borrowed books carry no reservation
    /// - `reserved_until` is set exactly when `reserved_by` is set
    pub fn is_consistent(&self) -> bool {
        let borrowed_unreserved =
            self.status != BookStatus::Borrowed || self.reserved_by.is_none();
        let fields_paired = self.reserved_by.is_some() == self.reserved_until.is_some();
        borrowed_unreserved && fields_paired
    }

    /// The pending reservation, if any
    pub fn reservation(&self) -> Option<Reservation> {
        match (self.reserved_by, self.reserved_until) {
            (Some(member_id), Some(reserved_until)) => Some(Reservation {
                book_id: self.id,
                member_id,
                reserved_until,
            }),
            _ => None,
        }
    }

    pub(crate) fn reserve(&mut self, member: MemberId, until: DateTime<Utc>) {
        self.reserved_by = Some(member);
        self.reserved_until = Some(until);
    }

    pub(crate) fn clear_reservation(&mut self) {
        self.reserved_by = None;
        self.reserved_until = None;
    }

    pub(crate) fn mark_borrowed(&mut self) {
        self.status = BookStatus::Borrowed;
        self.clear_reservation();
    }
}

// =============================================================================
// Member
// =============================================================================

/// A library member and the books they currently hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,

    pub name: String,

    /// Snapshot copies taken at borrow time
    #[serde(default)]
    pub borrowed: Vec<Book>,
}

impl Member {
    pub fn new(id: MemberId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            borrowed: Vec::new(),
        }
    }

    pub fn has_borrowed(&self, book: BookId) -> bool {
        self.borrowed.iter().any(|b| b.id == book)
    }

    /// Remove the first borrowed entry for `book`, returning it
    pub(crate) fn take_borrowed(&mut self, book: BookId) -> Option<Book> {
        let pos = self.borrowed.iter().position(|b| b.id == book)?;
        Some(self.borrowed.remove(pos))
    }
}

// =============================================================================
// Reservation outcomes
// =============================================================================

/// A granted reservation
///
/// Book, holder and deadline together identify one reservation: a book
/// reserved again by the same member gets a later deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reservation {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub reserved_until: DateTime<Utc>,
}

/// How a pending reservation ended when its timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Already borrowed, removed or held by someone else; nothing changed
    Stale,
    /// Deadline passed without a claim; book is back on the shelf
    Expired,
    /// Claimed before the deadline; book is now borrowed by the holder
    Borrowed,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Stale => write!(f, "stale"),
            Resolution::Expired => write!(f, "expired"),
            Resolution::Borrowed => write!(f, "borrowed"),
        }
    }
}
