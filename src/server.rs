//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//! The App can also ask for a shutdown itself, see [`App`](crate::App).
//!
//! Either way the server reacts by:
//! 1. Immediately stopping `listener.accept()`; no new connections are made.
//! 2. Telling every open connection to finish its in-flight request and close.
//! 3. Waiting up to `shutdown_timeout` for those connections, then aborting
//!    whatever is left.
//!
//! Keep `shutdown_timeout` below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::future::Future;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};

use crate::error::ErrorResponse;
use crate::request::Request;
use crate::response::Response;
use crate::router::{App, Shutdown};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("invalid listen address `{addr}`")]
    Addr {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("binding {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not stop gracefully: {aborted} connection(s) still open after {timeout:?}")]
    DrainTimeout { timeout: Duration, aborted: usize },
}

/// Connection-level timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ServeConfig {
    /// Upper bound on reading a request's headers.
    pub read_timeout: Duration,
    /// Upper bound on draining open connections once shutdown starts.
    pub shutdown_timeout: Duration,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self { read_timeout: Duration::from_secs(5), shutdown_timeout: Duration::from_secs(30) }
    }
}

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    config: ServeConfig,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// # fn main() -> Result<(), bds::ServeError> {
    /// let server = bds::Server::bind("0.0.0.0:3000")?;
    /// # Ok(()) }
    /// ```
    pub fn bind(addr: &str) -> Result<Self, ServeError> {
        let addr = addr
            .parse()
            .map_err(|source| ServeError::Addr { addr: addr.to_owned(), source })?;
        Ok(Self { addr, config: ServeConfig::default() })
    }

    pub fn with_config(mut self, config: ServeConfig) -> Self {
        self.config = config;
        self
    }

    /// Serves `app` until SIGTERM, Ctrl-C or the App's own shutdown trigger,
    /// then drains.
    pub async fn serve(self, app: App) -> Result<(), ServeError> {
        self.serve_until(app, os_signal()).await
    }

    /// Like [`serve`](Server::serve), with `signal` standing in for the OS
    /// signals.
    pub async fn serve_until(
        self,
        app: App,
        signal: impl Future<Output = ()>,
    ) -> Result<(), ServeError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServeError::Bind { addr: self.addr, source })?;
        self.run(listener, app, signal).await
    }

    async fn run(
        self,
        listener: TcpListener,
        app: App,
        signal: impl Future<Output = ()>,
    ) -> Result<(), ServeError> {
        let local = listener.local_addr().unwrap_or(self.addr);

        let shutdown = app.shutdown_handle();
        let app = Arc::new(app);

        info!(addr = %local, "listening");

        let mut tasks = JoinSet::new();

        tokio::pin!(signal);
        let requested = shutdown.requested();
        tokio::pin!(requested);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), reason = "signal", "draining");
                    shutdown.trigger();
                    break;
                }

                () = &mut requested => {
                    info!(in_flight = tasks.len(), reason = "app", "draining");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let conn = connection(
                        Arc::clone(&app),
                        TokioIo::new(stream),
                        peer,
                        shutdown.clone(),
                        self.config.read_timeout,
                    );
                    tasks.spawn(conn.in_current_span());
                }

                // Reap finished tasks so the set does not grow without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        drain(&mut tasks, self.config.shutdown_timeout).await?;

        info!(addr = %local, "stopped");
        Ok(())
    }
}

async fn connection(
    app: Arc<App>,
    io: TokioIo<tokio::net::TcpStream>,
    peer: SocketAddr,
    shutdown: Shutdown,
    read_timeout: Duration,
) {
    let svc = service_fn(move |req| dispatch(Arc::clone(&app), req));

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder.http1().timer(TokioTimer::new()).header_read_timeout(read_timeout);

    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let requested = shutdown.requested();
    tokio::pin!(requested);
    let mut closing = false;

    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    warn!(%peer, "connection error: {e}");
                }
                break;
            }
            () = &mut requested, if !closing => {
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
        }
    }
}

async fn drain(tasks: &mut JoinSet<()>, timeout: Duration) -> Result<(), ServeError> {
    let drained = tokio::time::timeout(timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        let aborted = tasks.len();
        tasks.abort_all();
        error!(aborted, ?timeout, "drain timed out, aborting connections");
        return Err(ServeError::DrainTimeout { timeout, aborted });
    }
    Ok(())
}

/// Buffers the body, then hands the request to the App. Never fails towards hyper.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let envelope = ErrorResponse::new(format!("reading body: {e}"), StatusCode::BAD_REQUEST);
            return Ok(Response::error(&envelope).into_http());
        }
    };

    let res = app.call(Request::from_parts(parts, body)).await;
    Ok(res.into_http())
}

/// Resolves on the first SIGTERM or SIGINT the process receives.
///
/// A handler that fails to install is logged and never fires.
async fn os_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("installing Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("installing SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
