//! # libcirc - Library Circulation
//!
//! Lending, overdue penalties and content-based recommendations for a
//! library catalog.
//!
//! - The lending ledger keeps copy counts and reader loan counts in step with
//!   loan records; each borrow or return is one transaction on the store.
//! - Penalties are issued for overdue loans and lifted when they end. Time only
//!   advances when a request calls [`Library::evaluate`].
//! - The catalog index weighs every book's text with TF-IDF and precomputes
//!   pairwise cosine similarity; recommendations draw on a reader's most recent
//!   loans.
//!
//! ## Example
//!
//! ```
//! use libcirc::{Library, LibraryConfig, MemoryStore, NewBook, SystemClock};
//! use std::sync::Arc;
//!
//! let library = Library::new(MemoryStore::new(), Arc::new(SystemClock), LibraryConfig::default());
//! let reader = library.register_reader("Ada");
//! let dune = library.add_book(NewBook { title: "Dune".to_string(), copies: 1, ..NewBook::default() });
//!
//! library.evaluate(reader.id).unwrap();
//! library.borrow(reader.id, dune.id).unwrap();
//! assert_eq!(library.book(dune.id).unwrap().available_copies, 0);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod index;
pub mod ledger;
pub mod library;
pub mod model;
pub mod penalty;
pub mod recommend;
pub mod server;
mod store;
pub mod vector;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LibraryConfig;
pub use error::{BorrowError, ConfigError, ReturnError, StoreError};
pub use index::{IndexStore, SimilarityIndex};
pub use library::{Library, ReaderProfile};
pub use model::{Book, BookDetails, BookId, Loan, NewBook, Penalty, PenaltyStatus, Reader, ReaderId};
pub use store::{CatalogStore, MemoryStore};
