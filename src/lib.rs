//! # bds
//!
//! A books REST service built on a small HTTP pipeline.
//!
//! ## The pipeline
//!
//! Every request goes through the same fixed layers, composed once per route
//! when the [`App`] is built:
//!
//! ```text
//! App::call ─ binds Context
//!   RequestMetrics → Logger → Errors → Panics   (application level)
//!     Authenticate → Authorize("user.profile")  (route level, optional)
//!       handler ─ Database::call(table, op)
//!         Logging → Timing → ErrorMapping → Driver
//! ```
//!
//! Handlers return [`Result<Response, Error>`](Error). The [`Errors`]
//! middleware is the only place an [`Error`] becomes a JSON envelope.
//! Anything that still escapes the chain stops the server; see [`App`].
//!
//! [`Errors`]: middleware::Errors
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bds::{App, Context, Error, Request, Response, Server};
//! use http::{Method, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::new(Vec::new()).on(Method::GET, "/books/{id}", get_book);
//!     Server::bind("0.0.0.0:3000")?.serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn get_book(_ctx: Context, req: Request) -> Result<Response, Error> {
//!     let id = req.param("id").unwrap_or_default();
//!     Response::json(StatusCode::OK, &serde_json::json!({ "id": id }))
//! }
//! ```

pub mod api;
pub mod auth;
pub mod books;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod handler;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod telemetry;
pub mod users;

mod request;
mod response;
mod router;
mod server;

pub use context::Context;
pub use error::{Error, ErrorResponse, FieldError, FieldErrors, RequestError};
pub use handler::Handler;
pub use request::Request;
pub use response::{IntoResponse, Response};
pub use router::{App, Shutdown, State};
pub use server::{ServeConfig, ServeError, Server};
