use std::sync::Arc;

use tracing::error;

use super::Middleware;
use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

/// The single translation point from [`Error`](crate::Error) to the wire.
///
/// Classifies the inner error, writes the JSON envelope and records the final
/// status in the request context, for failures and successes alike. Errors are
/// absorbed here, except [`Error::Shutdown`](crate::Error::Shutdown), which is
/// recorded and then handed back so the App stops the server.
pub struct Errors;

impl Middleware for Errors {
    fn name(&self) -> &'static str {
        "errors"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                ctx.values()?;

                let err = match next.call(ctx.clone(), req).await {
                    Ok(res) => {
                        ctx.set_status(res.status_code().as_u16())?;
                        return Ok(res);
                    }
                    Err(err) => err,
                };

                error!(trace_id = %ctx.trace_id(), error = %format!("{err:#}"), "request failed");

                let envelope = err.to_response();
                ctx.set_status(envelope.status)?;

                if err.is_shutdown() {
                    return Err(err);
                }
                Ok(Response::error(&envelope))
            }
        })
        .into_boxed_handler()
    }
}
