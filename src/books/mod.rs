//! The book catalogue: models, storage and HTTP handlers.

mod handlers;
mod store;

use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::database::Database;
use crate::error::{FieldError, FieldErrors};
use crate::request::Request;
use crate::router::App;

pub use store::Store;

/// Largest page a listing returns; also the default page size.
pub const MAX_ROWS: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub publication_year: Option<String>,
    pub publisher: Option<String>,
}

/// Payload of `POST /v1/books`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewBook {
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub publication_year: Option<String>,
    pub publisher: Option<String>,
}

impl NewBook {
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut errors = Vec::new();
        if self.isbn.trim().is_empty() {
            errors.push(FieldError::new("isbn", "can't be blank"));
        }
        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "can't be blank"));
        }
        FieldErrors(errors).into_result()
    }
}

/// Registers the v1 and v2 book routes.
pub fn routes(app: App, db: &Database) -> App {
    let store = Arc::new(Store::new(db.clone()));

    let list = Arc::clone(&store);
    let by_id = Arc::clone(&store);
    let create = store;

    app.handle(
        Method::GET,
        "v1",
        "/books",
        move |ctx: Context, req: Request| handlers::query(Arc::clone(&list), ctx, req),
        Vec::new(),
    )
    .handle(
        Method::GET,
        "v1",
        "/books/{id}",
        move |ctx: Context, req: Request| handlers::query_by_id(Arc::clone(&by_id), ctx, req),
        Vec::new(),
    )
    .handle(
        Method::POST,
        "v1",
        "/books",
        move |ctx: Context, req: Request| handlers::create(Arc::clone(&create), ctx, req),
        Vec::new(),
    )
    .handle(Method::GET, "v2", "/books", handlers::query_v2, Vec::new())
}
