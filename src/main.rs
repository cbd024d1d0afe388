use std::sync::Arc;

use anyhow::Context as _;
use bds::api::{self, Deps};
use bds::auth::{Authenticator, JwtAuth};
use bds::config::Config;
use bds::database::postgres::PgDriver;
use bds::database::{Database, Driver};
use bds::metrics::Metrics;
use bds::{health, telemetry, ServeConfig, Server};
use tracing::{error, info, Instrument};

const SERVICE: &str = "books-api";
const BUILD: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let span = telemetry::init(SERVICE);
    if let Err(e) = run().instrument(span).await {
        error!("startup failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::load("BOOKS").context("loading config")?;
    info!(build = BUILD, config = %cfg.redacted(), "starting");

    let metrics = Arc::new(Metrics::new().context("building metrics recorder")?);
    let driver: Arc<dyn Driver> = Arc::new(PgDriver::open(&cfg.db).context("opening database pool")?);

    let jwt = Arc::new(JwtAuth::new(cfg.auth.secret.as_bytes(), cfg.auth.issuer.as_str()));

    let deps = Deps {
        db: Database::new(Arc::clone(&driver), Arc::clone(&metrics)),
        authenticator: Arc::clone(&jwt) as Arc<dyn Authenticator>,
        tokens: jwt,
        metrics: Arc::clone(&metrics),
    };

    let serve = ServeConfig {
        read_timeout: cfg.api.read_timeout,
        shutdown_timeout: cfg.api.shutdown_timeout,
    };

    // The debug listener lives as long as the process; it is not drained.
    let debug = Server::bind(&cfg.api.debug_host)?.with_config(serve);
    let debug_app = health::app(BUILD, driver, metrics);
    tokio::spawn(
        async move {
            if let Err(e) = debug.serve(debug_app).await {
                error!("debug listener: {e:#}");
            }
        }
        .in_current_span(),
    );

    Server::bind(&cfg.api.host)?
        .with_config(serve)
        .serve(api::app(&deps))
        .await
        .context("serving api")?;

    info!("shutdown complete");
    Ok(())
}
