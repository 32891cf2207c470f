use chrono::Duration;

use libres::clock::{Clock, ManualClock};
use libres::error::Error;
use libres::model::{BookStatus, Resolution};
use libres::store::Store;

fn seeded() -> Store {
    let store = Store::new();
    store.add_book("Concurrency in Go", "K. Author");
    store.add_book("The Go Programming Language", "A. Donovan");
    for name in ["Alice", "Bob", "Carol"] {
        store.add_member(name);
    }
    store
}

#[test]
fn reserve_then_expire_returns_book_to_shelf() {
    let store = seeded();
    let clock = ManualClock::default();

    let reservation = store
        .reserve(1, 1, clock.now(), Duration::seconds(5))
        .expect("reserve");
    assert_eq!(reservation.reserved_until, clock.now() + Duration::seconds(5));
    assert!(!store.list_available_books().iter().any(|b| b.id == 1));

    clock.advance(Duration::seconds(5));
    assert_eq!(store.resolve_reservation(1, 1, clock.now()), Resolution::Expired);

    let available: Vec<u32> = store.list_available_books().iter().map(|b| b.id).collect();
    assert_eq!(available, vec![1, 2]);
    assert!(store.snapshot().is_consistent());
}

#[test]
fn reserve_then_borrow_by_holder() {
    let store = seeded();
    let clock = ManualClock::default();
    store
        .reserve(1, 2, clock.now(), Duration::seconds(5))
        .expect("reserve");

    assert!(matches!(
        store.borrow_book(1, 3),
        Err(Error::ReservedByOther { book: 1, holder: 2 })
    ));
    let book = store.borrow_book(1, 2).expect("holder borrows");
    assert_eq!(book.status, BookStatus::Borrowed);
    assert!(book.reserved_by.is_none());

    // the timer waking later must not undo the borrow
    clock.advance(Duration::seconds(10));
    assert_eq!(store.resolve_reservation(1, 2, clock.now()), Resolution::Stale);
    assert_eq!(store.list_borrowed_books(2).len(), 1);
    assert!(store.snapshot().is_consistent());
}

#[test]
fn borrowed_book_cannot_be_reserved_or_removed() {
    let store = seeded();
    let clock = ManualClock::default();
    store.borrow_book(2, 1).expect("borrow");

    assert!(matches!(
        store.reserve(2, 3, clock.now(), Duration::seconds(5)),
        Err(Error::BookNotAvailable(2))
    ));
    assert!(matches!(store.remove_book(2), Err(Error::BookBorrowed(2))));

    store.return_book(2, 1).expect("return");
    assert!(store.list_borrowed_books(1).is_empty());
    store
        .reserve(2, 3, clock.now(), Duration::seconds(5))
        .expect("reserve after return");
}

#[test]
fn returning_unborrowed_book_fails() {
    let store = seeded();
    assert!(matches!(store.return_book(1, 1), Err(Error::NotBorrowed(1))));
    assert!(matches!(store.return_book(9, 1), Err(Error::BookNotFound(9))));
    assert!(matches!(store.return_book(1, 9), Err(Error::MemberNotFound(9))));
}

#[test]
fn removing_reserved_book_makes_later_resolution_stale() {
    let store = seeded();
    let clock = ManualClock::default();
    store
        .reserve(1, 1, clock.now(), Duration::seconds(5))
        .expect("reserve");

    let removed = store.remove_book(1).expect("remove reserved");
    assert_eq!(removed.reserved_by, Some(1));
    assert!(matches!(store.find_book(1), Err(Error::BookNotFound(1))));
    assert_eq!(store.resolve_reservation(1, 1, clock.now()), Resolution::Stale);

    // ids are never reused
    assert_eq!(store.add_book("New", "N"), 3);
}

#[test]
fn member_lists_hold_snapshot_copies() {
    let store = seeded();
    store.borrow_book(1, 1).expect("borrow");
    store.borrow_book(2, 1).expect("borrow");

    let member = store.find_member(1).expect("member");
    let ids: Vec<u32> = member.borrowed.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(member
        .borrowed
        .iter()
        .all(|b| b.status == BookStatus::Borrowed));

    store.return_book(1, 1).expect("return");
    let ids: Vec<u32> = store.list_borrowed_books(1).iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![2]);
    assert!(store.list_borrowed_books(42).is_empty());
}
