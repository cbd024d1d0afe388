use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;

use super::{Book, NewBook, Store, MAX_ROWS};
use crate::context::Context;
use crate::database::DbError;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

#[derive(Serialize)]
struct Page {
    page: i64,
    rows: i64,
    books: Vec<Book>,
}

pub(super) async fn query(store: Arc<Store>, ctx: Context, req: Request) -> Result<Response, Error> {
    let page = int_query(&req, "page")?.filter(|p| *p >= 1).unwrap_or(1);
    let rows = int_query(&req, "rows")?.filter(|r| (1..=MAX_ROWS).contains(r)).unwrap_or(MAX_ROWS);
    let offset = (page - 1)
        .checked_mul(rows)
        .ok_or_else(|| Error::request(StatusCode::BAD_REQUEST, "page param is not valid: out of range"))?;

    let books = store
        .query(&ctx, offset, rows)
        .await
        .map_err(|e| internal(e, "unable to query books"))?;

    Response::json(StatusCode::OK, &Page { page, rows, books })
}

pub(super) async fn query_by_id(store: Arc<Store>, ctx: Context, req: Request) -> Result<Response, Error> {
    let id: i64 = req
        .param("id")
        .unwrap_or_default()
        .parse()
        .map_err(|e| Error::request(StatusCode::BAD_REQUEST, format!("id param is not valid: {e}")))?;

    match store.query_by_id(&ctx, id).await {
        Ok(book) => Response::json(StatusCode::OK, &book),
        Err(DbError::NotFound) => Err(Error::request(StatusCode::NOT_FOUND, "book not found")),
        Err(e) => Err(internal(e, "unable to query book")),
    }
}

pub(super) async fn create(store: Arc<Store>, ctx: Context, req: Request) -> Result<Response, Error> {
    let new: NewBook = req.json()?;
    new.validate()?;

    match store.create(&ctx, &new).await {
        Ok(book) => Response::json(StatusCode::CREATED, &book),
        Err(DbError::NotUnique) => Err(Error::request(StatusCode::CONFLICT, "book not unique")),
        Err(e) => Err(internal(e, "unable to create book")),
    }
}

pub(super) async fn query_v2(_ctx: Context, _req: Request) -> Result<Response, Error> {
    Response::json(StatusCode::OK, &serde_json::json!({ "version": "v2", "books": [] }))
}

fn int_query(req: &Request, name: &str) -> Result<Option<i64>, Error> {
    match req.query(name) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e| {
            Error::request(StatusCode::BAD_REQUEST, format!("{name} param is not valid: {e}"))
        }),
    }
}

fn internal(err: DbError, context: &'static str) -> Error {
    Error::Internal(anyhow::Error::new(err).context(context))
}
