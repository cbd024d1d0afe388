use std::sync::Arc;

use http::StatusCode;
use http::header::AUTHORIZATION;

use super::Middleware;
use crate::auth::Authenticator;
use crate::context::Context;
use crate::error::{Error, RequestError};
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

/// Validates `Authorization: Bearer <token>` and attaches the resulting claims
/// to the request context.
///
/// Any failure is a `401` and nothing further down the chain runs.
pub struct Authenticate {
    authenticator: Arc<dyn Authenticator>,
}

impl Authenticate {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl Middleware for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let authenticator = Arc::clone(&self.authenticator);
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            let authenticator = Arc::clone(&authenticator);
            async move {
                let token = bearer_token(&req)?;
                let claims = authenticator
                    .authenticate(token)
                    .map_err(|e| RequestError::wrap(StatusCode::UNAUTHORIZED, e))?;
                ctx.set_claims(claims);
                next.call(ctx, req).await
            }
        })
        .into_boxed_handler()
    }
}

fn bearer_token(req: &Request) -> Result<&str, Error> {
    let header = req.header(AUTHORIZATION.as_str()).unwrap_or_default();
    if header.is_empty() {
        return Err(Error::request(StatusCode::UNAUTHORIZED, "authorization header is not set"));
    }

    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(Error::request(
            StatusCode::UNAUTHORIZED,
            "authorization header has invalid format. Expected: Bearer TOKEN",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, Utc};

    use super::*;
    use crate::auth::{Claims, JwtAuth};
    use crate::middleware::testing::*;
    use crate::response::Response;

    fn counting_handler(hits: Arc<AtomicUsize>) -> BoxedHandler {
        (move |ctx: Context, _req: Request| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let subject = ctx.claims().map(|c| c.subject.clone()).unwrap_or_default();
                Ok::<_, Error>(Response::text(subject))
            }
        })
        .into_boxed_handler()
    }

    fn middleware(auth: JwtAuth) -> Authenticate {
        Authenticate::new(Arc::new(auth))
    }

    #[tokio::test]
    async fn rejects_missing_and_malformed_headers_before_the_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler =
            middleware(JwtAuth::new(b"secret", "bds-api")).wrap(counting_handler(Arc::clone(&hits)));

        let cases = [
            None,
            Some(""),
            Some("Bearer"),
            Some("Basic dXNlcjpwYXNz"),
            Some("Bearer a b"),
            Some("Bearer not-a-jwt"),
        ];
        for header in cases {
            let mut req = get("/v1/user/profile");
            if let Some(value) = header {
                req = req.with_header("authorization", value);
            }
            let err = handler.call(bound(), req).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "header {header:?}");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn attaches_claims_for_valid_tokens() {
        let auth = JwtAuth::new(b"secret", "bds-api");
        let claims = Claims::new("user-1", "bds-api", Utc::now(), Duration::hours(1), vec![]);
        let token = auth.generate_token(&claims).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let handler = middleware(auth).wrap(counting_handler(Arc::clone(&hits)));
        let req = get("/").with_header("Authorization", &format!("bearer {token}"));
        let res = handler.call(bound(), req).await.unwrap();

        assert_eq!(res.body(), b"user-1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
