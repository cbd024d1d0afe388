//! Assembly of the public books API.

use std::sync::Arc;

use crate::auth::{Authenticator, TokenIssuer};
use crate::database::Database;
use crate::metrics::Metrics;
use crate::middleware::{BoxedMiddleware, Errors, Logger, Panics, RequestMetrics};
use crate::router::App;
use crate::{books, users};

/// Everything the API routes need, built once in `main`.
#[derive(Clone)]
pub struct Deps {
    pub db: Database,
    pub authenticator: Arc<dyn Authenticator>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub metrics: Arc<Metrics>,
}

/// The application-level middleware, outermost first.
pub fn standard_middleware(metrics: &Arc<Metrics>) -> Vec<BoxedMiddleware> {
    vec![
        Arc::new(RequestMetrics::new(Arc::clone(metrics))),
        Arc::new(Logger),
        Arc::new(Errors),
        Arc::new(Panics::new(Arc::clone(metrics))),
    ]
}

/// The public App: v1 and v2 book routes plus the user token and profile.
pub fn app(deps: &Deps) -> App {
    let app = App::new(standard_middleware(&deps.metrics));
    let app = books::routes(app, &deps.db);
    users::routes(app, &deps.db, Arc::clone(&deps.authenticator), Arc::clone(&deps.tokens))
}
