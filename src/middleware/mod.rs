//! Middleware layer.
//!
//! A middleware turns one [`BoxedHandler`] into another with the same
//! signature. The [`App`](crate::App) composes its application-level list
//! with each route's own list once, at registration, into a single handler.
//!
//! # Ordering
//!
//! Lists are written **outermost first**: the first middleware in a list is
//! the first to see the request and the last to see the result. Route-level
//! middleware always sits inside application-level middleware:
//!
//! ```text
//! app:   [RequestMetrics, Logger, Errors, Panics]
//! route: [Authenticate, Authorize("user.profile")]
//!
//! RequestMetrics → Logger → Errors → Panics → Authenticate → Authorize → handler
//! ```
//!
//! This order is a contract. Errors must wrap Panics so a recovered panic
//! still gets serialised, and Logger/Metrics must wrap Errors so they see the
//! final status.

mod authenticate;
mod authorize;
mod errors;
mod logger;
mod metrics;
mod panics;

use std::sync::Arc;

use crate::handler::BoxedHandler;

pub use authenticate::Authenticate;
pub use authorize::Authorize;
pub use errors::Errors;
pub use logger::Logger;
pub use metrics::RequestMetrics;
pub use panics::Panics;

/// A `Handler -> Handler` transformation implementing one cross-cutting concern.
pub trait Middleware: Send + Sync + 'static {
    /// Short name, used when inspecting a composed chain.
    fn name(&self) -> &'static str;

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// A type-erased middleware that can be stored in a list.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Wraps `handler` so that `layers[0]` runs first.
///
/// Applied back to front: the last layer wraps the handler directly, the
/// first layer wraps everything else.
pub fn compose(layers: &[BoxedMiddleware], handler: BoxedHandler) -> BoxedHandler {
    layers.iter().rev().fold(handler, |inner, layer| layer.wrap(inner))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the middleware unit tests.

    use std::sync::{Arc, Mutex};

    use http::Method;

    use super::*;
    use crate::context::Context;
    use crate::handler::Handler;
    use crate::request::Request;
    use crate::response::Response;
    use crate::Error;

    /// Appends `"<label>:in"` / `"<label>:out"` around the inner handler.
    pub struct Record {
        pub label: &'static str,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Record {
        fn name(&self) -> &'static str {
            self.label
        }

        fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
            let label = self.label;
            let log = Arc::clone(&self.log);
            (move |ctx: Context, req: Request| {
                let next = Arc::clone(&next);
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("{label}:in"));
                    let res = next.call(ctx, req).await;
                    log.lock().unwrap().push(format!("{label}:out"));
                    res
                }
            })
            .into_boxed_handler()
        }
    }

    pub fn ok_handler() -> BoxedHandler {
        (|_ctx: Context, _req: Request| async { Ok::<_, Error>(Response::text("ok")) })
            .into_boxed_handler()
    }

    pub fn failing_handler(make: fn() -> Error) -> BoxedHandler {
        (move |_ctx: Context, _req: Request| async move { Err::<Response, _>(make()) })
            .into_boxed_handler()
    }

    pub fn bound() -> Context {
        let ctx = Context::new();
        ctx.attach();
        ctx
    }

    pub fn get(path: &str) -> Request {
        Request::new(Method::GET, path)
    }
}
