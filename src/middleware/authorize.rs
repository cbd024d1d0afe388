use std::sync::Arc;

use http::StatusCode;

use super::Middleware;
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

/// Requires the authenticated claims to grant one `resource.action` permission.
///
/// Must sit inside [`Authenticate`](super::Authenticate); without claims every
/// request is a `403`.
pub struct Authorize {
    permission: Arc<str>,
}

impl Authorize {
    pub fn new(permission: &str) -> Self {
        Self { permission: Arc::from(permission) }
    }
}

impl Middleware for Authorize {
    fn name(&self) -> &'static str {
        "authorize"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let permission = Arc::clone(&self.permission);
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            let permission = Arc::clone(&permission);
            async move {
                let Some(claims) = ctx.claims() else {
                    return Err(Error::request(
                        StatusCode::FORBIDDEN,
                        "you are not authorized to perform this action, no claims",
                    ));
                };
                if !claims.allows(&permission) {
                    return Err(Error::request(
                        StatusCode::FORBIDDEN,
                        "you are not authorized to perform this action, permissions missing",
                    ));
                }
                next.call(ctx, req).await
            }
        })
        .into_boxed_handler()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::auth::Claims;
    use crate::middleware::testing::*;

    fn with_claims(perms: &[&str]) -> Context {
        let ctx = bound();
        ctx.set_claims(Claims::new(
            "user-1",
            "bds-api",
            Utc::now(),
            Duration::hours(1),
            perms.iter().map(|p| (*p).to_owned()).collect(),
        ));
        ctx
    }

    #[tokio::test]
    async fn missing_claims_are_forbidden() {
        let err = Authorize::new("user.profile")
            .wrap(ok_handler())
            .call(bound(), get("/"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("no claims"));
    }

    #[tokio::test]
    async fn unmatched_permissions_are_forbidden() {
        let handler = Authorize::new("user.profile").wrap(ok_handler());
        let cases: [&[&str]; 4] = [&[], &["books.read"], &["user.delete"], &["users"]];
        for perms in cases {
            let err = handler.call(with_claims(perms), get("/")).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::FORBIDDEN, "perms {perms:?}");
        }
    }

    #[tokio::test]
    async fn bare_resource_grants_any_action() {
        for action in ["profile", "delete", "y"] {
            let handler = Authorize::new(&format!("user.{action}")).wrap(ok_handler());
            handler.call(with_claims(&["user"]), get("/")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn exact_permission_passes() {
        let handler = Authorize::new("user.profile").wrap(ok_handler());
        handler.call(with_claims(&["books.read", "user.profile"]), get("/")).await.unwrap();
    }
}
