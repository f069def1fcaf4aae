//! REST API for libcirc.
//!
//! A thin JSON adapter over [`Library`]. Reader-facing handlers evaluate
//! penalties and overdue loans before doing anything else. After every
//! mutation the store snapshot is written to the configured data file.
//!
//! The in-memory library is authoritative. A mutation that has been applied
//! is reported as applied even if writing the snapshot fails; the store is
//! then marked dirty and the next mutation writes the whole snapshot again.
//!
//! ## Endpoints
//!
//! - `POST /readers` - Register a reader
//! - `GET /readers/{id}/profile` - Active loans and penalty of a reader
//! - `POST /readers/{id}/borrow` - Borrow a book
//! - `POST /readers/{id}/return` - Return a book
//! - `GET /readers/{id}/recommendations` - Books similar to recent loans
//! - `POST /books` - Add a book
//! - `PUT /books/{id}` - Edit a book's details
//! - `DELETE /books/{id}` - Remove a book
//! - `PUT /books/{id}/copies` - Set the number of copies
//! - `GET /books/search?q=` - Search titles and authors
//! - `GET /books/popular?limit=` - Most borrowed books
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actix_web::{App, HttpServer, web};
//! use libcirc::server::AppState;
//! use libcirc::{LibraryConfig, SystemClock};
//! use std::sync::Arc;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let state = web::Data::new(AppState::open(LibraryConfig::default(), Arc::new(SystemClock)).unwrap());
//!     HttpServer::new(move || App::new().app_data(state.clone()).configure(libcirc::server::config))
//!         .bind("0.0.0.0:7878")?
//!         .run()
//!         .await
//! }
//! ```

use crate::clock::Clock;
use crate::config::LibraryConfig;
use crate::error::{BorrowError, ReturnError, StoreError};
use crate::library::Library;
use crate::model::{BookDetails, BookId, NewBook, ReaderId};
use crate::store::MemoryStore;
use actix_web::{HttpResponse, ResponseError, http::StatusCode, web};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared state of the HTTP server.
pub struct AppState {
    pub library: Library<MemoryStore>,
    data_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl AppState {
    /// Loads the store from `config.data_path` (or starts empty) and persists
    /// back to it after mutations.
    pub fn open(config: LibraryConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let store = MemoryStore::load_or_create(&config.data_path)?;
        let data_path = Some(config.data_path.clone());
        Ok(AppState { library: Library::new(store, clock, config), data_path, dirty: AtomicBool::new(false) })
    }

    /// State that is never written to disk.
    pub fn in_memory(library: Library<MemoryStore>) -> Self {
        AppState { library, data_path: None, dirty: AtomicBool::new(false) }
    }

    /// True while applied changes have not reached the data file.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn persist(&self) {
        let Some(path) = &self.data_path else {
            return;
        };
        match self.library.save(path) {
            Ok(()) => {
                if self.dirty.swap(false, Ordering::SeqCst) {
                    tracing::info!(path = %path.display(), "store saved after earlier failure");
                }
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                tracing::error!(path = %path.display(), code = e.code(), "failed to save store, will retry: {}", e);
            }
        }
    }

    fn evaluate(&self, reader: ReaderId) -> Result<(), ApiError> {
        let evaluation = self.library.evaluate(reader)?;
        if !evaluation.lifted.is_empty() || !evaluation.issued.is_empty() || self.is_dirty() {
            self.persist();
        }
        Ok(())
    }
}

// --- Errors ---

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Borrow(#[from] BorrowError),
    #[error(transparent)]
    Return(#[from] ReturnError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

impl ApiError {
    fn code(&self) -> &str {
        match self {
            ApiError::Borrow(e) => e.code(),
            ApiError::Return(e) => e.code(),
            ApiError::Store(e) => e.code(),
        }
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::BookNotFound(_)
        | StoreError::ReaderNotFound(_)
        | StoreError::LoanNotFound(_)
        | StoreError::PenaltyNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidCopies { .. } => StatusCode::CONFLICT,
        StoreError::LoanCountOutOfRange(_) | StoreError::Io(_) | StoreError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Borrow(BorrowError::BookNotFound(_) | BorrowError::ReaderNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Borrow(BorrowError::Store(e)) => store_status(e),
            ApiError::Borrow(_) => StatusCode::CONFLICT,
            ApiError::Return(ReturnError::LoanNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Return(ReturnError::Store(e)) => store_status(e),
            ApiError::Store(e) => store_status(e),
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            code: self.code(),
            message: self.to_string(),
        })
    }
}

// --- Request structs ---

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
}

#[derive(Deserialize)]
struct LoanRequest {
    book_id: BookId,
}

#[derive(Deserialize)]
struct CopiesRequest {
    total: u32,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

#[derive(Deserialize)]
struct PopularQuery {
    limit: Option<usize>,
}

const DEFAULT_POPULAR_LIMIT: usize = 5;

// --- Handlers ---

async fn register_handler(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let reader = state.library.register_reader(body.into_inner().name);
    state.persist();
    Ok(HttpResponse::Created().json(reader))
}

async fn profile_handler(state: web::Data<AppState>, path: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let reader = ReaderId(path.into_inner());
    state.evaluate(reader)?;
    Ok(HttpResponse::Ok().json(state.library.profile(reader)?))
}

async fn borrow_handler(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    body: web::Json<LoanRequest>,
) -> Result<HttpResponse, ApiError> {
    let reader = ReaderId(path.into_inner());
    state.evaluate(reader)?;
    let loan = state.library.borrow(reader, body.book_id)?;
    state.persist();
    Ok(HttpResponse::Created().json(loan))
}

async fn return_handler(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    body: web::Json<LoanRequest>,
) -> Result<HttpResponse, ApiError> {
    let reader = ReaderId(path.into_inner());
    state.evaluate(reader)?;
    let loan = state.library.return_book(reader, body.book_id)?;
    state.persist();
    Ok(HttpResponse::Ok().json(loan))
}

async fn recommend_handler(state: web::Data<AppState>, path: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let reader = ReaderId(path.into_inner());
    state.evaluate(reader)?;
    Ok(HttpResponse::Ok().json(state.library.recommend_books(reader)))
}

async fn add_book_handler(state: web::Data<AppState>, body: web::Json<NewBook>) -> Result<HttpResponse, ApiError> {
    let book = state.library.add_book(body.into_inner());
    state.persist();
    Ok(HttpResponse::Created().json(book))
}

async fn update_book_handler(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    body: web::Json<BookDetails>,
) -> Result<HttpResponse, ApiError> {
    let book = state.library.update_book(BookId(path.into_inner()), body.into_inner())?;
    state.persist();
    Ok(HttpResponse::Ok().json(book))
}

async fn remove_book_handler(state: web::Data<AppState>, path: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let book = state.library.remove_book(BookId(path.into_inner()))?;
    state.persist();
    Ok(HttpResponse::Ok().json(book))
}

async fn copies_handler(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    body: web::Json<CopiesRequest>,
) -> Result<HttpResponse, ApiError> {
    let book = state.library.set_copies(BookId(path.into_inner()), body.total)?;
    state.persist();
    Ok(HttpResponse::Ok().json(book))
}

async fn search_handler(state: web::Data<AppState>, query: web::Query<SearchQuery>) -> HttpResponse {
    HttpResponse::Ok().json(state.library.search(&query.q))
}

async fn popular_handler(state: web::Data<AppState>, query: web::Query<PopularQuery>) -> HttpResponse {
    let limit = query.limit.unwrap_or(DEFAULT_POPULAR_LIMIT);
    HttpResponse::Ok().json(state.library.popular(limit))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/readers").route(web::post().to(register_handler)))
       .service(web::resource("/readers/{id}/profile").route(web::get().to(profile_handler)))
       .service(web::resource("/readers/{id}/borrow").route(web::post().to(borrow_handler)))
       .service(web::resource("/readers/{id}/return").route(web::post().to(return_handler)))
       .service(web::resource("/readers/{id}/recommendations").route(web::get().to(recommend_handler)))
       .service(web::resource("/books").route(web::post().to(add_book_handler)))
       .service(web::resource("/books/search").route(web::get().to(search_handler)))
       .service(web::resource("/books/popular").route(web::get().to(popular_handler)))
       .service(
           web::resource("/books/{id}")
               .route(web::put().to(update_book_handler))
               .route(web::delete().to(remove_book_handler)),
       )
       .service(web::resource("/books/{id}/copies").route(web::put().to(copies_handler)));
}
