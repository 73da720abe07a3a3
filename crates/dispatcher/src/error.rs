//! Error normalization
//!
//! Every failed request surfaces to callers as a `NormalizedError`: a closed
//! `ErrorKind`, a stable string code and a message fit for display. Raw
//! transport failures and non-2xx responses are mapped here and nowhere else.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::transport::TransportError;

/// Status the server uses to signal an expired access token.
pub const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never reached a server
    Network,
    /// The request exceeded its timeout
    Timeout,
    /// Non-2xx response other than 401
    Http(u16),
    /// 401. Recovered by renewal unless the request was already retried.
    AuthExpired,
    /// The renewal call failed; the session has been cleared
    RenewalFailed,
    /// The request could not be built locally
    RequestSetup,
    /// A 2xx body did not match the caller's expected type
    Decode,
}

impl ErrorKind {
    /// Stable code, e.g. `NETWORK` or `HTTP_404`.
    pub fn code(&self) -> String {
        match self {
            ErrorKind::Network => "NETWORK".into(),
            ErrorKind::Timeout => "TIMEOUT".into(),
            ErrorKind::Http(status) => format!("HTTP_{status}"),
            ErrorKind::AuthExpired => "AUTH_EXPIRED".into(),
            ErrorKind::RenewalFailed => "RENEWAL_FAILED".into(),
            ErrorKind::RequestSetup => "REQUEST_SETUP".into(),
            ErrorKind::Decode => "DECODE".into(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Failure of a dispatched request. Immutable once built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct NormalizedError {
    kind: ErrorKind,
    code: String,
    message: String,
    details: Option<Value>,
}

impl NormalizedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach diagnostic data (server body, transport error text).
    /// `null` is dropped.
    pub fn with_details(mut self, details: Value) -> Self {
        if !details.is_null() {
            self.details = Some(details);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn renewal_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RenewalFailed, message)
    }

    pub fn request_setup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestSetup, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }
}

/// Map a transport failure (no response) to the taxonomy.
pub fn from_transport(err: &TransportError, timeout: Duration) -> NormalizedError {
    match err {
        TransportError::Timeout(detail) => NormalizedError::new(
            ErrorKind::Timeout,
            format!("The request timed out after {} ms", timeout.as_millis()),
        )
        .with_details(Value::String(detail.clone())),
        TransportError::Network(detail) => NormalizedError::new(
            ErrorKind::Network,
            "Unable to reach the server. Check your connection and try again.",
        )
        .with_details(Value::String(detail.clone())),
        TransportError::Setup(detail) => {
            NormalizedError::request_setup(format!("The request could not be sent: {detail}"))
        }
    }
}

/// Map a non-2xx response to the taxonomy.
///
/// The server's own message is preferred over the generic per-status text.
pub fn from_response(status: u16, body: &Value) -> NormalizedError {
    let kind = if status == UNAUTHORIZED {
        ErrorKind::AuthExpired
    } else {
        ErrorKind::Http(status)
    };
    let message = server_message(body).unwrap_or_else(|| default_message(status).to_string());
    NormalizedError::new(kind, message).with_details(body.clone())
}

/// Human-readable message supplied by the server, if any.
///
/// Accepts `{"message": ".."}`, `{"error": ".."}` and
/// `{"error": {"message": ".."}}`.
pub fn server_message(body: &Value) -> Option<String> {
    let text = body
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 => "The request was invalid.",
        401 => "Your session has expired. Please sign in again.",
        403 => "You do not have permission to perform this action.",
        404 => "The requested resource was not found.",
        409 => "The request conflicts with the current state of the resource.",
        422 => "Some of the submitted data is invalid.",
        429 => "Too many requests. Please slow down and try again.",
        500..=599 => "The server encountered an error. Please try again later.",
        _ => "The request failed.",
    }
}
