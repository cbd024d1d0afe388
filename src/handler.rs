//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, and every
//! middleware wraps one handler into another. Both need a single concrete
//! type, so handlers are erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn create(ctx: Context, req: Request) -> Result<Response, Error>  ← user writes this
//!        ↓ app.handle(Method::POST, "v1", "/books", create, [])
//! create.into_boxed_handler()                    ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(create))                    ← stored as BoxedHandler
//!        ↓ middleware.wrap(boxed)                 ← once per layer, at registration
//! handler.call(ctx, req) at request time         ← one vtable dispatch per layer
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Outcome of a handler: a response, or an error for the Errors middleware.
pub type HandlerResult = Result<Response, Error>;

/// A heap-allocated, type-erased future resolving to a [`HandlerResult`].
///
/// `Send + 'static` lets tokio move it across worker threads; the request
/// context is passed by (cheap, `Arc`-backed) value for the same reason.
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Dispatch interface shared by route handlers and middleware-wrapped handlers.
pub trait ErasedHandler {
    fn call(&self, ctx: Context, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any `async fn` or closure with the shape
///
/// ```text
/// async fn name(ctx: Context, req: Request) -> Result<impl IntoResponse, Error>
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, ctx: Context, req: Request) -> BoxFuture {
        let fut = (self.0)(ctx, req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}
