//! Authentication and permission checks.
//!
//! The middleware only depends on the [`Authenticator`] contract: a token goes
//! in, [`Claims`] or an [`AuthError`] come out. The token endpoint depends on
//! [`TokenIssuer`]. [`JwtAuth`] is the HS256 implementation of both that the
//! books service runs with.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Authenticated identity plus its permission set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// `resource.action` strings, in the order the token listed them.
    #[serde(default, alias = "Permissions")]
    pub permissions: Vec<String>,
}

impl Claims {
    /// Claims valid from `now` for `ttl`.
    pub fn new(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
            issued_at: now.timestamp(),
            expires_at: (now + ttl).timestamp(),
            permissions,
        }
    }

    /// Whether any permission grants `required` (see [`permits`]).
    pub fn allows(&self, required: &str) -> bool {
        self.permissions.iter().any(|granted| permits(granted, required))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("parsing token failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("signing token failed: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// How long an issued token stays valid, in seconds.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

/// Turns a bearer token into claims.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Mints a signed token for an authenticated subject.
pub trait TokenIssuer: Send + Sync + 'static {
    fn issue(&self, subject: &str, permissions: Vec<String>) -> Result<String, AuthError>;
}

/// HMAC-SHA256 JSON Web Tokens bound to one issuer.
pub struct JwtAuth {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    /// Tokens from any other `iss` are rejected.
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&issuer]);
        Self {
            issuer,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn generate_token(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(AuthError::Signing)
    }
}

impl Authenticator for JwtAuth {
    fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

impl TokenIssuer for JwtAuth {
    fn issue(&self, subject: &str, permissions: Vec<String>) -> Result<String, AuthError> {
        let claims = Claims::new(subject, self.issuer.as_str(), Utc::now(), Duration::seconds(TOKEN_TTL_SECS), permissions);
        self.generate_token(&claims)
    }
}

// ── Permissions ───────────────────────────────────────────────────────────────

/// Splits `resource.action`. A bare `resource` has an empty action.
pub fn decode_permission(permission: &str) -> (&str, &str) {
    let mut parts = permission.split('.');
    let resource = parts.next().unwrap_or_default();
    let action = parts.next().unwrap_or_default();
    (resource, action)
}

/// Whether a granted permission covers a required one.
///
/// Resources must match exactly. A granted permission without an action covers
/// every action on its resource; otherwise actions must match too.
pub fn permits(granted: &str, required: &str) -> bool {
    let (granted_resource, granted_action) = decode_permission(granted);
    let (required_resource, required_action) = decode_permission(required);

    if granted_resource.is_empty() || granted_resource != required_resource {
        return false;
    }
    granted_action.is_empty() || granted_action == required_action
}
