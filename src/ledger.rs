//! The lending ledger
//!
//! Borrow and return, each applied to the store as a single transaction: the
//! loan record, the book's available copies and the reader's active loan count
//! change together or not at all.

use crate::error::{BorrowError, ReturnError};
use crate::model::{BookId, Loan, ReaderId};
use crate::store::CatalogStore;
use chrono::{DateTime, Duration, Utc};

/// Limits applied when lending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LendingPolicy {
    pub loan_period: Duration,
    pub max_active_loans: u32,
}

/// Lends `book` to `reader` at `now`.
///
/// Refusals are checked in this order: unknown reader, unknown book, active
/// penalty, loan limit, duplicate loan, no copy available.
pub fn borrow<S: CatalogStore>(
    store: &mut S,
    policy: &LendingPolicy,
    reader: ReaderId,
    book: BookId,
    now: DateTime<Utc>,
) -> Result<Loan, BorrowError> {
    store.transaction(|store| {
        let account = store.get_reader(reader).ok_or(BorrowError::ReaderNotFound(reader))?;
        let copy = store.get_book(book).ok_or(BorrowError::BookNotFound(book))?;

        if store.find_active_penalty(reader).is_some() {
            return Err(BorrowError::PenaltyActive(reader));
        }
        if account.active_loans >= policy.max_active_loans {
            return Err(BorrowError::BorrowLimitExceeded {
                reader,
                limit: policy.max_active_loans,
            });
        }
        if store.find_active_loan(reader, book).is_some() {
            return Err(BorrowError::DuplicateLoan { reader, book });
        }
        if copy.available_copies == 0 {
            return Err(BorrowError::CopyUnavailable(book));
        }

        let loan = store.insert_loan(book, reader, now, now + policy.loan_period)?;
        store.adjust_available_copies(book, -1)?;
        store.update_reader_loan_count(reader, 1)?;
        Ok(loan)
    })
}

/// Closes the reader's active loan of `book` at `now`.
pub fn return_book<S: CatalogStore>(
    store: &mut S,
    reader: ReaderId,
    book: BookId,
    now: DateTime<Utc>,
) -> Result<Loan, ReturnError> {
    store.transaction(|store| {
        let loan = store
            .find_active_loan(reader, book)
            .ok_or(ReturnError::LoanNotFound { reader, book })?;

        let loan = store.update_loan_return(loan.id, now)?;
        store.adjust_available_copies(book, 1)?;
        store.update_reader_loan_count(reader, -1)?;
        Ok(loan)
    })
}

#[cfg(test)]
mod ledger_test {
    use super::*;
    use crate::model::NewBook;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
    }

    fn policy() -> LendingPolicy {
        LendingPolicy { loan_period: Duration::days(14), max_active_loans: 4 }
    }

    fn setup(copies: u32) -> (MemoryStore, ReaderId, BookId) {
        let mut store = MemoryStore::new();
        let reader = store.insert_reader("Ada".to_string()).id;
        let book = store
            .insert_book(NewBook { title: "Dune".to_string(), copies, ..NewBook::default() })
            .id;
        (store, reader, book)
    }

    #[test]
    fn test_borrow_applies_all_effects() {
        let (mut store, reader, book) = setup(2);

        let loan = borrow(&mut store, &policy(), reader, book, now()).unwrap();

        assert_eq!(loan.borrowed_at, now());
        assert_eq!(loan.due_at, now() + Duration::days(14));
        assert!(loan.is_active());
        assert_eq!(store.get_book(book).unwrap().available_copies, 1);
        assert_eq!(store.get_reader(reader).unwrap().active_loans, 1);
    }

    #[test]
    fn test_borrow_unknown_book_or_reader() {
        let (mut store, reader, book) = setup(1);

        assert!(matches!(
            borrow(&mut store, &policy(), reader, BookId(42), now()),
            Err(BorrowError::BookNotFound(BookId(42)))
        ));
        assert!(matches!(
            borrow(&mut store, &policy(), ReaderId(42), book, now()),
            Err(BorrowError::ReaderNotFound(ReaderId(42)))
        ));
    }

    #[test]
    fn test_duplicate_loan_refused() {
        let (mut store, reader, book) = setup(3);
        borrow(&mut store, &policy(), reader, book, now()).unwrap();

        assert!(matches!(
            borrow(&mut store, &policy(), reader, book, now()),
            Err(BorrowError::DuplicateLoan { .. })
        ));
        assert_eq!(store.get_book(book).unwrap().available_copies, 2);
    }

    #[test]
    fn test_no_copy_available() {
        let (mut store, reader, book) = setup(0);

        assert!(matches!(
            borrow(&mut store, &policy(), reader, book, now()),
            Err(BorrowError::CopyUnavailable(_))
        ));
        assert_eq!(store.loans().count(), 0);
    }

    #[test]
    fn test_penalty_checked_before_limit() {
        let (mut store, reader, book) = setup(1);
        store.insert_penalty(reader, now() + Duration::days(1)).unwrap();
        let tight = LendingPolicy { max_active_loans: 1, ..policy() };
        store.update_reader_loan_count(reader, 1).unwrap();

        assert!(matches!(
            borrow(&mut store, &tight, reader, book, now()),
            Err(BorrowError::PenaltyActive(_))
        ));
    }

    #[test]
    fn test_return_restores_counts() {
        let (mut store, reader, book) = setup(1);
        borrow(&mut store, &policy(), reader, book, now()).unwrap();

        let later = now() + Duration::days(3);
        let loan = return_book(&mut store, reader, book, later).unwrap();

        assert_eq!(loan.returned_at, Some(later));
        assert!(store.find_active_loan(reader, book).is_none());
        assert_eq!(store.get_book(book).unwrap().available_copies, 1);
        assert_eq!(store.get_reader(reader).unwrap().active_loans, 0);
    }

    #[test]
    fn test_return_without_loan() {
        let (mut store, reader, book) = setup(1);

        assert!(matches!(
            return_book(&mut store, reader, book, now()),
            Err(ReturnError::LoanNotFound { .. })
        ));

        borrow(&mut store, &policy(), reader, book, now()).unwrap();
        return_book(&mut store, reader, book, now()).unwrap();
        assert!(matches!(
            return_book(&mut store, reader, book, now()),
            Err(ReturnError::LoanNotFound { .. })
        ));
    }
}
