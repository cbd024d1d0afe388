//! Users: token issuance from email and password, and the profile served to
//! authenticated callers.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{Authenticator, TokenIssuer};
use crate::context::Context;
use crate::database::{Database, DbError};
use crate::error::Error;
use crate::middleware::{Authenticate, Authorize, BoxedMiddleware};
use crate::request::Request;
use crate::response::Response;
use crate::router::App;

const TABLE: &str = "users";

/// Permission required to read one's own profile.
pub const PROFILE_PERMISSION: &str = "user.profile";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub email: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A user row together with its bcrypt password hash.
#[derive(Deserialize)]
pub struct Credentials {
    #[serde(flatten)]
    pub user: User,
    pub password_hash: String,
}

#[derive(Serialize)]
struct Profile<'a> {
    uuid: Uuid,
    email: &'a str,
}

pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn query_by_uuid(&self, ctx: &Context, uuid: Uuid) -> Result<User, DbError> {
        const Q: &str = "select uuid, email, permissions from users where uuid = $1::uuid";
        self.db
            .call(TABLE, "QueryByUUID")
            .query_row_as(ctx, Q, vec![json!(uuid.to_string())])
            .await
    }

    pub async fn query_by_email(&self, ctx: &Context, email: &str) -> Result<Credentials, DbError> {
        const Q: &str = "select uuid, email, permissions, \
                         convert_from(password_hash, 'UTF8') as password_hash \
                         from users where email = $1";
        self.db.call(TABLE, "QueryByEmail").query_row_as(ctx, Q, vec![json!(email)]).await
    }
}

/// Registers `POST /v1/user/token` (HTTP Basic) and `GET /v1/user/profile`
/// behind authentication and the `user.profile` permission.
pub fn routes(
    app: App,
    db: &Database,
    authenticator: Arc<dyn Authenticator>,
    issuer: Arc<dyn TokenIssuer>,
) -> App {
    let store = Arc::new(Store::new(db.clone()));
    let guard: Vec<BoxedMiddleware> = vec![
        Arc::new(Authenticate::new(authenticator)),
        Arc::new(Authorize::new(PROFILE_PERMISSION)),
    ];

    let tokens = Arc::clone(&store);
    app.handle(
        Method::POST,
        "v1",
        "/user/token",
        move |ctx: Context, req: Request| token(Arc::clone(&tokens), Arc::clone(&issuer), ctx, req),
        Vec::new(),
    )
    .handle(
        Method::GET,
        "v1",
        "/user/profile",
        move |ctx: Context, req: Request| profile(Arc::clone(&store), ctx, req),
        guard,
    )
}

async fn token(
    store: Arc<Store>,
    issuer: Arc<dyn TokenIssuer>,
    ctx: Context,
    req: Request,
) -> Result<Response, Error> {
    let Some((email, pass)) = basic_credentials(&req) else {
        return Err(Error::request(StatusCode::UNAUTHORIZED, "user email or password is missing"));
    };
    if !email.contains('@') {
        return Err(Error::request(StatusCode::BAD_REQUEST, "email is not valid"));
    }

    let creds = match store.query_by_email(&ctx, &email).await {
        Ok(creds) => creds,
        Err(DbError::NotFound) => return Err(Error::request(StatusCode::NOT_FOUND, "user not found")),
        Err(e) => return Err(internal(e, "authenticate user")),
    };

    // bcrypt is CPU-bound.
    let hash = creds.password_hash;
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(pass, &hash))
        .await
        .map_err(|e| internal(e, "verify password"))?;
    if !matches!(verified, Ok(true)) {
        return Err(Error::request(StatusCode::UNAUTHORIZED, "user not authenticated"));
    }

    let token = issuer
        .issue(&creds.user.uuid.to_string(), creds.user.permissions)
        .map_err(|e| internal(e, "generate token"))?;
    Response::json(StatusCode::OK, &json!({ "token": token }))
}

/// `Authorization: Basic base64(email:password)`.
fn basic_credentials(req: &Request) -> Option<(String, String)> {
    let (scheme, encoded) = req.header("authorization")?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (email, pass) = decoded.split_once(':')?;
    Some((email.to_owned(), pass.to_owned()))
}

fn internal<E>(err: E, context: &'static str) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Internal(anyhow::Error::new(err).context(context))
}

async fn profile(store: Arc<Store>, ctx: Context, _req: Request) -> Result<Response, Error> {
    // Authenticate has run by now; missing claims mean the route is misconfigured.
    let Some(claims) = ctx.claims() else {
        return Err(Error::request(StatusCode::FORBIDDEN, "claims missing from request context"));
    };
    let uuid = Uuid::parse_str(&claims.subject)
        .map_err(|_| Error::request(StatusCode::BAD_REQUEST, "UUID is not valid"))?;

    match store.query_by_uuid(&ctx, uuid).await {
        Ok(user) => Response::json(StatusCode::OK, &Profile { uuid: user.uuid, email: &user.email }),
        Err(DbError::NotFound) => Err(Error::request(StatusCode::NOT_FOUND, "user not found")),
        Err(e) => Err(internal(e, "get user profile")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Value;

    use super::*;
    use crate::auth::{Claims, JwtAuth};
    use crate::database::testing::Scripted;
    use crate::database::{Driver, Outcome};
    use crate::metrics::Metrics;

    const ID: &str = "5cf37266-3473-4006-984f-9325122678b7";

    fn setup() -> (Arc<Scripted>, Arc<Store>) {
        let driver = Arc::new(Scripted::default());
        let db = Database::new(Arc::clone(&driver) as Arc<dyn Driver>, Arc::new(Metrics::new().unwrap()));
        (driver, Arc::new(Store::new(db)))
    }

    fn as_subject(subject: &str) -> Context {
        let ctx = Context::new();
        ctx.attach();
        ctx.set_claims(Claims::new(subject, "bds-api", Utc::now(), Duration::hours(1), vec![]));
        ctx
    }

    fn get() -> Request {
        Request::new(Method::GET, "/v1/user/profile")
    }

    fn jwt() -> Arc<JwtAuth> {
        Arc::new(JwtAuth::new(b"secret", "bds-api"))
    }

    fn login(email: &str, pass: &str) -> Request {
        let basic = STANDARD.encode(format!("{email}:{pass}"));
        Request::new(Method::POST, "/v1/user/token").with_header("authorization", &format!("Basic {basic}"))
    }

    fn credentials_row(pass: &str) -> Value {
        json!({
            "uuid": ID,
            "email": "admin@example.com",
            "permissions": ["user.profile"],
            "password_hash": bcrypt::hash(pass, 4).unwrap(),
        })
    }

    #[tokio::test]
    async fn token_carries_subject_and_permissions() {
        let (driver, store) = setup();
        driver.push(Ok(Outcome::Row(credentials_row("gophers"))));
        let auth = jwt();

        let res = token(store, auth.clone(), Context::new(), login("admin@example.com", "gophers"))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        let claims = auth.authenticate(body["token"].as_str().unwrap()).unwrap();
        assert_eq!(claims.subject, ID);
        assert_eq!(claims.issuer, "bds-api");
        assert_eq!(claims.permissions, ["user.profile"]);

        let seen = driver.seen.lock().unwrap();
        assert_eq!(seen[0].2, vec![json!("admin@example.com")]);
    }

    #[tokio::test]
    async fn token_requires_basic_credentials() {
        let (driver, store) = setup();
        for req in [
            Request::new(Method::POST, "/v1/user/token"),
            Request::new(Method::POST, "/v1/user/token").with_header("authorization", "Bearer abc"),
            Request::new(Method::POST, "/v1/user/token").with_header("authorization", "Basic !!!"),
        ] {
            let err = token(Arc::clone(&store), jwt(), Context::new(), req).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.to_string(), "user email or password is missing");
        }
        assert!(driver.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_rejects_wrong_passwords() {
        let (driver, store) = setup();
        driver.push(Ok(Outcome::Row(credentials_row("gophers"))));

        let err = token(store, jwt(), Context::new(), login("admin@example.com", "ferris"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "user not authenticated");
    }

    #[tokio::test]
    async fn token_for_unknown_email_is_404() {
        let (driver, store) = setup();
        driver.push(Err(DbError::NoRows));

        let err = token(store, jwt(), Context::new(), login("ghost@example.com", "x")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "user not found");
    }

    #[tokio::test]
    async fn token_rejects_malformed_email() {
        let (driver, store) = setup();
        let err = token(store, jwt(), Context::new(), login("admin", "x")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(driver.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn returns_uuid_and_email_only() {
        let (driver, store) = setup();
        driver.push(Ok(Outcome::Row(json!({
            "uuid": ID, "email": "admin@example.com", "permissions": ["user.profile"]
        }))));

        let res = profile(store, as_subject(ID), get()).await.unwrap();
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"uuid": ID, "email": "admin@example.com"}));
    }

    #[tokio::test]
    async fn malformed_subjects_are_bad_requests() {
        let (driver, store) = setup();
        let err = profile(store, as_subject("admin"), get()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(driver.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_users_are_404() {
        let (driver, store) = setup();
        driver.push(Err(DbError::NoRows));
        let err = profile(store, as_subject(ID), get()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
