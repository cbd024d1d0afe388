//! Radix-tree request router and the application-level middleware contract.
//!
//! One tree per HTTP method, O(path-length) lookup. Every route is composed
//! once, at registration, into a single handler:
//!
//! ```text
//! app middleware (outermost first) → route middleware → handler
//! ```
//!
//! # Shutdown on error
//!
//! Whatever escapes the composed chain as an `Err` is treated as fatal: the
//! App answers with a 500 envelope and flips its [`Shutdown`] trigger, which
//! stops the [`Server`](crate::Server). With the standard stack only
//! [`Error::Shutdown`](crate::Error::Shutdown) gets that far, because the
//! [`Errors`](crate::middleware::Errors) middleware absorbs everything else.
//! A stack without `Errors` turns every failed request into a restart.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tokio::sync::watch;
use tracing::{error, info};

use crate::context::Context;
use crate::error::ErrorResponse;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{self, BoxedMiddleware};
use crate::request::Request;
use crate::response::Response;

/// Lifecycle of an [`App`]. `ShuttingDown` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Serving,
    ShuttingDown,
}

/// Cooperative shutdown trigger shared by the App and the server loop.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<State>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(State::Serving);
        Self { tx: Arc::new(tx) }
    }

    /// Moves to `ShuttingDown`. Idempotent.
    pub fn trigger(&self) {
        let previous = self.tx.send_replace(State::ShuttingDown);
        if previous == State::Serving {
            info!("shutdown requested");
        }
    }

    pub fn state(&self) -> State {
        *self.tx.borrow()
    }

    /// Resolves once the trigger has fired, immediately if it already has.
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|state| *state == State::ShuttingDown).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

struct Route {
    handler: BoxedHandler,
    stack: Vec<&'static str>,
}

/// The application: routes, the application-level middleware list, and the
/// shutdown trigger.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
pub struct App {
    routes: HashMap<Method, MatchitRouter<Arc<Route>>>,
    middleware: Vec<BoxedMiddleware>,
    shutdown: Shutdown,
}

impl App {
    /// An App whose every route is wrapped by `middleware`, first entry outermost.
    pub fn new(middleware: Vec<BoxedMiddleware>) -> Self {
        Self { routes: HashMap::new(), middleware, shutdown: Shutdown::new() }
    }

    /// Registers `handler` under `/{version}{path}` (or just `path` when
    /// `version` is empty), wrapped by `route_middleware` inside the App's own
    /// middleware. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// On an invalid or conflicting path. Routes are fixed at startup, so this
    /// is a programming error.
    pub fn handle(
        mut self,
        method: Method,
        version: &str,
        path: &str,
        handler: impl Handler,
        route_middleware: Vec<BoxedMiddleware>,
    ) -> Self {
        let path = if version.is_empty() { path.to_owned() } else { format!("/{version}{path}") };

        let inner = middleware::compose(&route_middleware, handler.into_boxed_handler());
        let handler = middleware::compose(&self.middleware, inner);
        let stack = self.middleware.iter().chain(&route_middleware).map(|m| m.name()).collect();

        self.routes
            .entry(method)
            .or_default()
            .insert(path.clone(), Arc::new(Route { handler, stack }))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Unversioned route with no route-level middleware.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.handle(method, "", path, handler, Vec::new())
    }

    /// A handle on this App's shutdown trigger.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Names of the middleware wrapping a route, outermost first.
    pub fn middleware_names(&self, method: &Method, path: &str) -> Option<Vec<&'static str>> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        Some(matched.value.stack.clone())
    }

    /// Routes one request through its composed chain.
    ///
    /// Binds a fresh [`Context`] before any middleware runs. Unknown routes get
    /// a 404 envelope without entering the chain.
    pub async fn call(&self, mut req: Request) -> Response {
        let Some((route, params)) = self.lookup(&req.method, &req.path) else {
            return Response::error(&ErrorResponse::new("route not found", StatusCode::NOT_FOUND));
        };
        req.params = params;

        let ctx = Context::new();
        ctx.attach();

        match route.handler.call(ctx.clone(), req).await {
            Ok(res) => res,
            Err(err) => {
                error!(
                    trace_id = %ctx.trace_id(),
                    error = %err,
                    shutdown_error = err.is_shutdown(),
                    "error escaped the handler chain, shutting down"
                );
                self.shutdown.trigger();
                Response::error(&err.to_response())
            }
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::middleware::testing::Record;
    use crate::middleware::Errors;

    async fn echo_id(_ctx: Context, req: Request) -> Result<Response, Error> {
        Ok(Response::text(req.param("id").unwrap_or_default().to_owned()))
    }

    async fn fail(_ctx: Context, _req: Request) -> Result<Response, Error> {
        Err(Error::request(StatusCode::NOT_FOUND, "book not found"))
    }

    async fn fatal(_ctx: Context, _req: Request) -> Result<Response, Error> {
        Err(Error::shutdown("invariant broken"))
    }

    #[tokio::test]
    async fn versioned_paths_and_params() {
        let app = App::new(Vec::new()).handle(Method::GET, "v1", "/books/{id}", echo_id, Vec::new());
        let res = app.call(Request::new(Method::GET, "/v1/books/42")).await;
        assert_eq!(res.body(), b"42");
    }

    #[tokio::test]
    async fn unknown_routes_are_404_without_shutdown() {
        let app = App::new(Vec::new()).on(Method::GET, "/books", echo_id);
        let res = app.call(Request::new(Method::POST, "/books")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(app.shutdown_handle().state(), State::Serving);
    }

    #[tokio::test]
    async fn app_middleware_wraps_route_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let rec = |label| Arc::new(Record { label, log: Arc::clone(&log) }) as BoxedMiddleware;

        let app = App::new(vec![rec("app1"), rec("app2")])
            .handle(Method::GET, "", "/x", echo_id, vec![rec("route1"), rec("route2")]);
        app.call(Request::new(Method::GET, "/x")).await;

        assert_eq!(
            *log.lock().unwrap(),
            [
                "app1:in", "app2:in", "route1:in", "route2:in",
                "route2:out", "route1:out", "app2:out", "app1:out",
            ]
        );
        assert_eq!(
            app.middleware_names(&Method::GET, "/x").unwrap(),
            ["app1", "app2", "route1", "route2"]
        );
    }

    #[tokio::test]
    async fn absorbed_errors_keep_serving() {
        let app = App::new(vec![Arc::new(Errors)]).on(Method::GET, "/x", fail);
        let res = app.call(Request::new(Method::GET, "/x")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(app.shutdown_handle().state(), State::Serving);
    }

    #[tokio::test]
    async fn escaped_errors_trigger_shutdown() {
        let app = App::new(Vec::new()).on(Method::GET, "/x", fail);
        let res = app.call(Request::new(Method::GET, "/x")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(app.shutdown_handle().state(), State::ShuttingDown);
    }

    #[tokio::test]
    async fn shutdown_errors_survive_translation() {
        let app = App::new(vec![Arc::new(Errors)]).on(Method::GET, "/x", fatal);
        let shutdown = app.shutdown_handle();
        let res = app.call(Request::new(Method::GET, "/x")).await;

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(shutdown.state(), State::ShuttingDown);
        shutdown.requested().await;
    }
}
