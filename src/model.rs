//! Records kept by the catalog store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of a book in the catalog.
    BookId
);
record_id!(
    /// Identifier of a registered reader.
    ReaderId
);
record_id!(LoanId);
record_id!(PenaltyId);

/// A catalog entry with its copy bookkeeping.
///
/// `available_copies` never exceeds `total_copies`; the difference is the
/// number of active loans of this book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub total_copies: u32,
    pub available_copies: u32,
}

impl Book {
    /// Text the feature vector is derived from: title, description, author
    /// and categories joined by spaces. Missing fields count as empty.
    pub fn feature_text(&self) -> String {
        let categories = self.categories.join(" ");
        [
            self.title.as_str(),
            self.description.as_deref().unwrap_or(""),
            self.author.as_deref().unwrap_or(""),
            categories.as_str(),
        ]
        .join(" ")
    }

    pub fn apply_details(&mut self, details: BookDetails) {
        self.title = details.title;
        self.author = details.author;
        self.cover_url = details.cover_url;
        self.description = details.description;
        self.categories = details.categories;
    }
}

/// Editable descriptive fields of a book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookDetails {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A book to be added to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub copies: u32,
}

impl NewBook {
    pub fn into_book(self, id: BookId) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            cover_url: self.cover_url,
            description: self.description,
            categories: self.categories,
            total_copies: self.copies,
            available_copies: self.copies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reader {
    pub id: ReaderId,
    pub name: String,
    /// Number of loans of this reader without a return timestamp.
    pub active_loans: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub book_id: BookId,
    pub reader_id: ReaderId,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    pub fn is_overdue(&self, as_of: DateTime<Utc>) -> bool {
        self.is_active() && self.due_at < as_of
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyStatus {
    Active,
    Lifted,
}

/// A time-bounded borrowing restriction on a reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub id: PenaltyId,
    pub reader_id: ReaderId,
    pub end_time: DateTime<Utc>,
    pub status: PenaltyStatus,
}

impl Penalty {
    pub fn is_active(&self) -> bool {
        self.status == PenaltyStatus::Active
    }
}
