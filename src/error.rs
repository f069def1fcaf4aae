use crate::model::{BookId, LoanId, PenaltyId, ReaderId};
use thiserror::Error;

/// Failures of the catalog store and its persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Book not found: {0}")]
    BookNotFound(BookId),
    #[error("Reader not found: {0}")]
    ReaderNotFound(ReaderId),
    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),
    #[error("Penalty not found: {0}")]
    PenaltyNotFound(PenaltyId),
    #[error("Invalid copy count for book {book}: {reason}")]
    InvalidCopies { book: BookId, reason: String },
    #[error("Active loan count of reader {0} would leave the range 0..=u32::MAX")]
    LoanCountOutOfRange(ReaderId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn code(&self) -> &str {
        match self {
            Self::BookNotFound(_) => "BOOK_NOT_FOUND",
            Self::ReaderNotFound(_) => "READER_NOT_FOUND",
            Self::LoanNotFound(_) => "LOAN_NOT_FOUND",
            Self::PenaltyNotFound(_) => "PENALTY_NOT_FOUND",
            Self::InvalidCopies { .. } => "INVALID_COPIES",
            Self::LoanCountOutOfRange(_) => "LOAN_COUNT_OUT_OF_RANGE",
            Self::Io(_) => "STORE_IO",
            Self::Serialization(_) => "STORE_SERIALIZATION",
        }
    }
}

/// Reasons a borrow request is refused.
#[derive(Debug, Error)]
pub enum BorrowError {
    #[error("Book not found: {0}")]
    BookNotFound(BookId),
    #[error("Reader not found: {0}")]
    ReaderNotFound(ReaderId),
    #[error("No copies of book {0} are available")]
    CopyUnavailable(BookId),
    #[error("Reader {reader} has reached the borrow limit of {limit} books")]
    BorrowLimitExceeded { reader: ReaderId, limit: u32 },
    #[error("Reader {reader} has already borrowed book {book}")]
    DuplicateLoan { reader: ReaderId, book: BookId },
    #[error("Reader {0} has an active penalty and cannot borrow books")]
    PenaltyActive(ReaderId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BorrowError {
    pub fn code(&self) -> &str {
        match self {
            Self::BookNotFound(_) => "BOOK_NOT_FOUND",
            Self::ReaderNotFound(_) => "READER_NOT_FOUND",
            Self::CopyUnavailable(_) => "COPY_UNAVAILABLE",
            Self::BorrowLimitExceeded { .. } => "BORROW_LIMIT_EXCEEDED",
            Self::DuplicateLoan { .. } => "DUPLICATE_LOAN",
            Self::PenaltyActive(_) => "PENALTY_ACTIVE",
            Self::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReturnError {
    #[error("No active loan of book {book} for reader {reader}")]
    LoanNotFound { reader: ReaderId, book: BookId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReturnError {
    pub fn code(&self) -> &str {
        match self {
            Self::LoanNotFound { .. } => "LOAN_NOT_FOUND",
            Self::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod error_test {
    use super::*;

    #[test]
    fn test_store_error_code_passes_through_borrow_error() {
        let err = BorrowError::from(StoreError::BookNotFound(BookId(3)));
        assert_eq!(err.code(), "BOOK_NOT_FOUND");
        assert_eq!(err.to_string(), "Book not found: 3");
    }

    #[test]
    fn test_borrow_limit_message() {
        let err = BorrowError::BorrowLimitExceeded { reader: ReaderId(7), limit: 4 };
        assert_eq!(err.to_string(), "Reader 7 has reached the borrow limit of 4 books");
        assert_eq!(err.code(), "BORROW_LIMIT_EXCEEDED");
    }
}
