//! The circulation service
//!
//! [`Library`] ties the store, the catalog index and the clock together and
//! exposes the operations the presentation layer calls. Reader-facing callers
//! run [`Library::evaluate`] first so that penalties and overdue loans are
//! current as of the request.

use crate::clock::Clock;
use crate::config::LibraryConfig;
use crate::error::{BorrowError, ReturnError, StoreError};
use crate::index::{IndexStore, SimilarityIndex};
use crate::ledger::{self, LendingPolicy};
use crate::model::{Book, BookDetails, BookId, Loan, NewBook, Penalty, Reader, ReaderId};
use crate::penalty;
use crate::recommend;
use crate::store::{CatalogStore, MemoryStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// State changes made by one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evaluation {
    pub lifted: Vec<Penalty>,
    pub issued: Vec<Penalty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveLoan {
    pub loan: Loan,
    /// `None` if the book was removed from the catalog.
    pub book: Option<Book>,
}

/// What a reader sees on their profile page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderProfile {
    pub reader: Reader,
    pub loans: Vec<ActiveLoan>,
    pub penalty_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularBook {
    pub book: Book,
    pub loans: usize,
}

pub struct Library<S> {
    store: Mutex<S>,
    index: IndexStore,
    rebuild: Mutex<()>,
    clock: Arc<dyn Clock>,
    config: LibraryConfig,
}

impl<S: CatalogStore> Library<S> {
    /// Wraps `store` and builds the catalog index from its books.
    pub fn new(store: S, clock: Arc<dyn Clock>, config: LibraryConfig) -> Self {
        let index = IndexStore::new(SimilarityIndex::rebuild(&store.list_books()));
        Library { store: Mutex::new(store), index, rebuild: Mutex::new(()), clock, config }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    // Every operation is one transaction on the store, so a poisoned lock
    // still guards consistent tables.
    fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn policy(&self) -> LendingPolicy {
        LendingPolicy {
            loan_period: self.config.loan_period(),
            max_active_loans: self.config.max_active_loans,
        }
    }

    /// Brings time-dependent state up to now: lifts expired penalties, then
    /// penalizes overdue loans. Both passes cover every reader; `reader` is the
    /// one whose request triggered the evaluation.
    pub fn evaluate(&self, reader: ReaderId) -> Result<Evaluation, StoreError> {
        let now = self.clock.now();
        let duration = self.config.penalty_duration();
        let evaluation = self.store().transaction(|store| {
            let lifted = penalty::lift_expired(store, now)?;
            let issued = penalty::penalize_overdue(store, now, duration)?;
            Ok::<_, StoreError>(Evaluation { lifted, issued })
        })?;

        tracing::debug!(
            reader = %reader,
            lifted = evaluation.lifted.len(),
            issued = evaluation.issued.len(),
            "evaluated"
        );
        Ok(evaluation)
    }

    pub fn borrow(&self, reader: ReaderId, book: BookId) -> Result<Loan, BorrowError> {
        let result = ledger::borrow(&mut *self.store(), &self.policy(), reader, book, self.clock.now());
        match &result {
            Ok(loan) => tracing::info!(loan = %loan.id, reader = %reader, book = %book, due = %loan.due_at, "book borrowed"),
            Err(e) => tracing::warn!(reader = %reader, book = %book, code = e.code(), "borrow refused: {}", e),
        }
        result
    }

    pub fn return_book(&self, reader: ReaderId, book: BookId) -> Result<Loan, ReturnError> {
        let result = ledger::return_book(&mut *self.store(), reader, book, self.clock.now());
        match &result {
            Ok(loan) => tracing::info!(loan = %loan.id, reader = %reader, book = %book, "book returned"),
            Err(e) => tracing::warn!(reader = %reader, book = %book, code = e.code(), "return refused: {}", e),
        }
        result
    }

    /// Books similar to the reader's recent loans, by id. Ids the current
    /// index knows but the catalog no longer holds are dropped.
    pub fn recommend(&self, reader: ReaderId) -> BTreeSet<BookId> {
        self.recommend_books(reader).into_iter().map(|b| b.id).collect()
    }

    /// Like [`recommend`](Library::recommend), resolved to full book records,
    /// ordered by id.
    pub fn recommend_books(&self, reader: ReaderId) -> Vec<Book> {
        let index = self.index.current();
        let store = self.store();
        let history: Vec<BookId> = store
            .recent_loans(reader, self.config.history_window)
            .iter()
            .map(|l| l.book_id)
            .collect();

        recommend::candidates(&index, &history, self.config.per_source)
            .into_iter()
            .filter_map(|id| {
                let book = store.get_book(id);
                if book.is_none() {
                    tracing::debug!(book = %id, "recommended book no longer in catalog, dropped");
                }
                book
            })
            .collect()
    }

    /// Rebuilds the similarity index from the current catalog and swaps it in.
    pub fn rebuild_catalog_index(&self) {
        // Catalog read and swap happen under one lock, so swaps land in the
        // order the catalog snapshots were taken.
        let _rebuild = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);
        let books = self.store().list_books();
        self.index.rebuild(&books);
    }

    pub fn index(&self) -> Arc<SimilarityIndex> {
        self.index.current()
    }

    /// Serves a prebuilt index, such as one loaded from disk. It may predate
    /// later catalog changes; recommendations tolerate that.
    pub fn install_index(&self, index: SimilarityIndex) {
        self.index.replace(index);
    }

    // --- Readers ---

    pub fn register_reader(&self, name: impl Into<String>) -> Reader {
        let reader = self.store().insert_reader(name.into());
        tracing::info!(reader = %reader.id, "reader registered");
        reader
    }

    pub fn reader(&self, id: ReaderId) -> Option<Reader> {
        self.store().get_reader(id)
    }

    pub fn profile(&self, id: ReaderId) -> Result<ReaderProfile, StoreError> {
        let store = self.store();
        let reader = store.get_reader(id).ok_or(StoreError::ReaderNotFound(id))?;
        let loans = store
            .list_active_loans(id)
            .into_iter()
            .map(|loan| ActiveLoan { book: store.get_book(loan.book_id), loan })
            .collect();
        let penalty_until = store.find_active_penalty(id).map(|p| p.end_time);

        Ok(ReaderProfile { reader, loans, penalty_until })
    }

    // --- Catalog ---

    pub fn book(&self, id: BookId) -> Option<Book> {
        self.store().get_book(id)
    }

    pub fn books(&self) -> Vec<Book> {
        self.store().list_books()
    }

    pub fn add_book(&self, book: NewBook) -> Book {
        let book = self.store().insert_book(book);
        tracing::info!(book = %book.id, title = %book.title, "book added");
        self.rebuild_catalog_index();
        book
    }

    pub fn update_book(&self, id: BookId, details: BookDetails) -> Result<Book, StoreError> {
        let book = self.store().transaction(|store| {
            let mut book = store.get_book(id).ok_or(StoreError::BookNotFound(id))?;
            book.apply_details(details);
            store.upsert_book(book.clone())?;
            Ok::<_, StoreError>(book)
        })?;
        tracing::info!(book = %id, "book updated");
        self.rebuild_catalog_index();
        Ok(book)
    }

    /// Sets the number of copies the library owns. Copies currently lent
    /// stay lent: the total may not drop below them.
    pub fn set_copies(&self, id: BookId, total: u32) -> Result<Book, StoreError> {
        let book = self.store().transaction(|store| {
            let mut book = store.get_book(id).ok_or(StoreError::BookNotFound(id))?;
            let lent = u32::try_from(store.count_active_loans_of_book(id)).unwrap_or(u32::MAX);
            if total < lent {
                return Err(StoreError::InvalidCopies {
                    book: id,
                    reason: format!("{} copies are on loan", lent),
                });
            }
            book.total_copies = total;
            book.available_copies = total - lent;
            store.upsert_book(book.clone())?;
            Ok(book)
        })?;
        tracing::info!(book = %id, total, "copies updated");
        self.rebuild_catalog_index();
        Ok(book)
    }

    /// Removes a book that has no copy on loan.
    pub fn remove_book(&self, id: BookId) -> Result<Book, StoreError> {
        let book = self.store().transaction(|store| {
            let lent = store.count_active_loans_of_book(id);
            if lent > 0 {
                return Err(StoreError::InvalidCopies {
                    book: id,
                    reason: format!("{} copies are on loan", lent),
                });
            }
            store.delete_book(id)
        })?;
        tracing::info!(book = %id, "book removed");
        self.rebuild_catalog_index();
        Ok(book)
    }

    /// Books whose title or author contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<Book> {
        let needle = query.to_lowercase();
        self.store()
            .list_books()
            .into_iter()
            .filter(|b| {
                b.title.to_lowercase().contains(&needle)
                    || b.author.as_deref().is_some_and(|a| a.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// The `limit` most borrowed books still in the catalog, most loans first.
    pub fn popular(&self, limit: usize) -> Vec<PopularBook> {
        let store = self.store();
        let mut counts: Vec<(BookId, usize)> = store.loan_counts_by_book().into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        counts
            .into_iter()
            .filter_map(|(id, loans)| store.get_book(id).map(|book| PopularBook { book, loans }))
            .take(limit)
            .collect()
    }

    /// Runs `f` against the underlying store.
    pub fn with_store<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.store())
    }
}

impl Library<MemoryStore> {
    /// Writes a snapshot of the store to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        self.store().save(path)
    }
}

#[cfg(test)]
mod library_test {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Library<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 9, 0, 0).unwrap()));
        let library = Library::new(MemoryStore::new(), clock.clone(), LibraryConfig::default());
        (library, clock)
    }

    fn new_book(title: &str, author: &str, copies: u32) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: Some(author.to_string()),
            copies,
            ..NewBook::default()
        }
    }

    #[test]
    fn test_catalog_changes_rebuild_index() {
        let (library, _) = setup();
        assert!(library.index().is_empty());

        let a = library.add_book(new_book("Sea Stories", "Conrad", 1));
        let b = library.add_book(new_book("Sea Tales", "Melville", 1));
        assert_eq!(library.index().ids(), &[a.id, b.id]);

        library.remove_book(a.id).unwrap();
        assert_eq!(library.index().ids(), &[b.id]);
    }

    #[test]
    fn test_concurrent_additions_all_reach_the_index() {
        let (library, _) = setup();

        std::thread::scope(|s| {
            for t in 0..8 {
                let library = &library;
                s.spawn(move || {
                    for i in 0..25 {
                        library.add_book(new_book(&format!("Volume {} {}", t, i), "Anon", 1));
                    }
                });
            }
        });

        let ids: Vec<BookId> = library.books().iter().map(|b| b.id).collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(library.index().ids(), ids.as_slice());
    }

    #[test]
    fn test_set_copies_keeps_lent_copies() {
        let (library, _) = setup();
        let reader = library.register_reader("Ada");
        let book = library.add_book(new_book("Dune", "Herbert", 2));
        library.borrow(reader.id, book.id).unwrap();

        let updated = library.set_copies(book.id, 5).unwrap();
        assert_eq!((updated.total_copies, updated.available_copies), (5, 4));

        assert!(matches!(library.set_copies(book.id, 0), Err(StoreError::InvalidCopies { .. })));
        assert_eq!(library.book(book.id).unwrap().total_copies, 5);
    }

    #[test]
    fn test_remove_book_on_loan_refused() {
        let (library, _) = setup();
        let reader = library.register_reader("Ada");
        let book = library.add_book(new_book("Dune", "Herbert", 1));
        library.borrow(reader.id, book.id).unwrap();

        assert!(library.remove_book(book.id).is_err());
        library.return_book(reader.id, book.id).unwrap();
        assert!(library.remove_book(book.id).is_ok());
        assert!(library.book(book.id).is_none());
    }

    #[test]
    fn test_update_book_keeps_copies() {
        let (library, _) = setup();
        let book = library.add_book(new_book("Dnue", "Herbert", 3));

        let updated = library
            .update_book(book.id, BookDetails { title: "Dune".to_string(), ..BookDetails::default() })
            .unwrap();
        assert_eq!(updated.title, "Dune");
        assert_eq!(updated.author, None);
        assert_eq!(updated.total_copies, 3);
        assert!(library.update_book(BookId(99), BookDetails::default()).is_err());
    }

    #[test]
    fn test_search_matches_title_or_author() {
        let (library, _) = setup();
        library.add_book(new_book("Dune", "Frank Herbert", 1));
        library.add_book(new_book("Emma", "Jane Austen", 1));

        assert_eq!(library.search("dUN").len(), 1);
        assert_eq!(library.search("austen")[0].title, "Emma");
        assert!(library.search("tolkien").is_empty());
    }

    #[test]
    fn test_popular_orders_by_loan_count() {
        let (library, _) = setup();
        let readers: Vec<Reader> = (0..3).map(|i| library.register_reader(format!("R{}", i))).collect();
        let a = library.add_book(new_book("A", "x", 3));
        let b = library.add_book(new_book("B", "y", 3));
        library.add_book(new_book("C", "z", 3));

        library.borrow(readers[0].id, a.id).unwrap();
        for r in &readers {
            library.borrow(r.id, b.id).unwrap();
        }

        let popular = library.popular(5);
        assert_eq!(popular.len(), 2);
        assert_eq!((popular[0].book.id, popular[0].loans), (b.id, 3));
        assert_eq!((popular[1].book.id, popular[1].loans), (a.id, 1));
        assert_eq!(library.popular(1).len(), 1);
    }

    #[test]
    fn test_profile_lists_loans_and_penalty() {
        let (library, clock) = setup();
        let reader = library.register_reader("Ada");
        let book = library.add_book(new_book("Dune", "Herbert", 1));
        library.borrow(reader.id, book.id).unwrap();

        clock.advance(Duration::days(15));
        library.evaluate(reader.id).unwrap();

        let profile = library.profile(reader.id).unwrap();
        assert_eq!(profile.loans.len(), 1);
        assert_eq!(profile.loans[0].book.as_ref().unwrap().id, book.id);
        assert_eq!(profile.penalty_until, Some(clock.now() + Duration::days(7)));
        assert!(library.profile(ReaderId(99)).is_err());
    }
}
