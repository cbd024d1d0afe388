//! Error taxonomy shared by handlers, middleware and the data layer.
//!
//! Every failure a handler can produce is one of four kinds:
//!
//! | Kind | Wire status | Meaning |
//! |---|---|---|
//! | [`Error::Request`] | carried in the error | user-facing, status chosen by whoever raised it |
//! | [`Error::Field`] / [`Error::Fields`] | `422` | validation failure on named input fields |
//! | [`Error::Shutdown`] | `500` | process-level invariant broken, the server must stop |
//! | [`Error::Internal`] | `500` | anything else; details stay in the logs |
//!
//! Only the [`Errors`](crate::middleware::Errors) middleware turns these into
//! responses. Everything upstream returns the most specific kind it knows and
//! leaves the rest alone.

use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Result type returned by handlers and middleware.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failure travelling up the handler chain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// User-facing error with an explicit HTTP status.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// A single invalid input field. Always `422`.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Several invalid input fields. Always `422`, listed under `details`.
    #[error(transparent)]
    Fields(#[from] FieldErrors),

    /// Fatal: the service is misconfigured and must begin graceful shutdown.
    #[error("{0}")]
    Shutdown(String),

    /// Unclassified. Serialised as a generic `500`.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for a [`RequestError`] with the given status.
    pub fn request(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Request(RequestError::new(status, message))
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown(message.into())
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }

    /// The status this error serialises with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request(e) => e.status(),
            Self::Field(_) | Self::Fields(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Shutdown(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Builds the wire envelope. Internal and shutdown errors never leak
    /// their message to the client.
    pub fn to_response(&self) -> ErrorResponse {
        let status = self.status();
        match self {
            Self::Request(e) => ErrorResponse::new(e.to_string(), status),
            Self::Field(e) => ErrorResponse::new(e.to_string(), status),
            Self::Fields(e) => ErrorResponse {
                error: e.to_string(),
                status: status.as_u16(),
                details: Some(e.details()),
            },
            Self::Shutdown(_) | Self::Internal(_) => {
                ErrorResponse::new(generic_message(status), status)
            }
        }
    }
}

// ── RequestError ──────────────────────────────────────────────────────────────

/// An error that already knows which HTTP status it maps to.
///
/// Immutable once built. The message shown to the client is the cause's
/// `Display` output.
#[derive(Debug)]
pub struct RequestError {
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    status: StatusCode,
}

impl RequestError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { message: message.into(), cause: None, status }
    }

    /// Wraps an existing error, keeping it reachable through `source()`.
    pub fn wrap<E>(status: StatusCode, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { message: cause.to_string(), cause: Some(Box::new(cause)), status }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ── Field errors ──────────────────────────────────────────────────────────────

/// Validation failure on one named input field.
///
/// Displays as `"<field> <message>"`, e.g. `isbn can't be blank`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{field} {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// A set of field failures reported together.
#[derive(Clone, Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("data validation error")]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn details(&self) -> BTreeMap<String, String> {
        self.0.iter().map(|e| (e.field.clone(), e.message.clone())).collect()
    }

    /// Collapses to the most specific error kind: nothing, one field, or many.
    pub fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(Error::Field(self.0.remove(0))),
            _ => Err(Error::Fields(self)),
        }
    }
}

// ── Wire envelope ─────────────────────────────────────────────────────────────

/// The JSON body of every failed response.
///
/// `status` always mirrors the HTTP response status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, status: StatusCode) -> Self {
        Self { error: error.into(), status: status.as_u16(), details: None }
    }
}

fn generic_message(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Internal Server Error")
}
