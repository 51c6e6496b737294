//! Error taxonomy and failure classification
//!
//! Every failed transport attempt is turned into an [`ApiError`] here. Callers branch
//! on [`ErrorKind`] (or the wire string from [`ApiError::code`]), never on the message.

use reqwest::Method;
use serde_json::Value;

use crate::redact::redact_text;

/// Maximum number of `detail` fragments joined into one message
const MAX_DETAIL_FRAGMENTS: usize = 3;

/// Longest raw text body used verbatim as an error message
const MAX_MESSAGE_LEN: usize = 200;

/// Closed set of failure kinds produced by the request executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 401: the session is missing or expired
    Unauthorized,
    /// 403: authenticated but not allowed
    Forbidden,
    /// Any 5xx response
    ServerError,
    /// No response was received
    NetworkError,
    /// The attempt missed its deadline
    Timeout,
    /// Any other 4xx; carries no wire code
    ClientError,
}

impl ErrorKind {
    /// Wire code for this kind, `None` for unclassified client errors
    pub fn code(self) -> Option<&'static str> {
        match self {
            Self::Unauthorized => Some("UNAUTHORIZED"),
            Self::Forbidden => Some("FORBIDDEN"),
            Self::ServerError => Some("SERVER_ERROR"),
            Self::NetworkError => Some("NETWORK_ERROR"),
            Self::Timeout => Some("TIMEOUT"),
            Self::ClientError => None,
        }
    }

    /// Whether a failure of this kind may be retried with backoff
    pub fn is_transient(self) -> bool {
        matches!(self, Self::ServerError | Self::NetworkError | Self::Timeout)
    }

    /// Maps a non-success HTTP status to its kind
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            s if s >= 500 => Self::ServerError,
            _ => Self::ClientError,
        }
    }
}

/// Failure of a single transport attempt, before classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    /// The request could not be built; resending cannot help
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Typed error returned across the executor boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub status: Option<u16>,
    pub kind: ErrorKind,
    pub url: String,
    pub method: String,
    /// Redacted copy of the request body
    pub request_body: Option<String>,
    /// Redacted copy of the response body
    pub response_body: Option<String>,
}

impl ApiError {
    /// Wire code (`UNAUTHORIZED`, `TIMEOUT`, ...) or `None` for unclassified client errors
    pub fn code(&self) -> Option<&'static str> {
        self.kind.code()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    /// A 2xx response whose body could not be decoded into the caller's type
    pub fn invalid_body(ctx: &FailureContext<'_>, status: u16, err: &serde_json::Error) -> Self {
        Self {
            message: format!("Invalid response body: {err}"),
            status: Some(status),
            kind: ErrorKind::NetworkError,
            url: ctx.url.to_string(),
            method: ctx.method.to_string(),
            request_body: ctx.request_body.map(str::to_owned),
            response_body: None,
        }
    }

    /// The caller's request body could not be encoded as JSON
    pub fn invalid_request(method: &Method, url: &str, err: &serde_json::Error) -> Self {
        Self {
            message: format!("Failed to encode request body: {err}"),
            status: None,
            kind: ErrorKind::ClientError,
            url: url.to_string(),
            method: method.to_string(),
            request_body: None,
            response_body: None,
        }
    }
}

/// Diagnostic context of the attempt being classified
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub method: &'a Method,
    pub url: &'a str,
    /// Already-redacted request body digest
    pub request_body: Option<&'a str>,
}

/// Classifies a completed response with a non-success status
pub fn classify_response(ctx: &FailureContext<'_>, status: u16, body: &str) -> ApiError {
    let message = detail_message(body)
        .or_else(|| text_message(body))
        .unwrap_or_else(|| format!("HTTP {status}"));

    ApiError {
        message,
        status: Some(status),
        kind: ErrorKind::from_status(status),
        url: ctx.url.to_string(),
        method: ctx.method.to_string(),
        request_body: ctx.request_body.map(str::to_owned),
        response_body: (!body.trim().is_empty()).then(|| redact_text(body)),
    }
}

/// Classifies an attempt that produced no response
pub fn classify_transport(ctx: &FailureContext<'_>, err: &TransportError) -> ApiError {
    let kind = match err {
        TransportError::Timeout => ErrorKind::Timeout,
        TransportError::Network(_) => ErrorKind::NetworkError,
        TransportError::InvalidRequest(_) => ErrorKind::ClientError,
    };

    ApiError {
        message: err.to_string(),
        status: None,
        kind,
        url: ctx.url.to_string(),
        method: ctx.method.to_string(),
        request_body: ctx.request_body.map(str::to_owned),
        response_body: None,
    }
}

/// Extracts a message from a `{"detail": ...}` error payload
///
/// `detail` may be a string or a list of strings / `{"msg": ...}` objects. Up to
/// [`MAX_DETAIL_FRAGMENTS`] distinct fragments are joined with `"; "`.
pub fn detail_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("detail")? {
        Value::String(detail) => {
            let detail = detail.trim();
            (!detail.is_empty()).then(|| detail.to_string())
        }
        Value::Array(items) => {
            let mut fragments: Vec<&str> = Vec::new();
            for item in items {
                let text = match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("msg").and_then(Value::as_str),
                    _ => None,
                };
                let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
                    continue;
                };
                if !fragments.contains(&text) {
                    fragments.push(text);
                }
                if fragments.len() == MAX_DETAIL_FRAGMENTS {
                    break;
                }
            }
            (!fragments.is_empty()).then(|| fragments.join("; "))
        }
        _ => None,
    }
}

/// Uses a non-JSON text body as the message
fn text_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() || serde_json::from_str::<Value>(body).is_ok() {
        return None;
    }
    let text = redact_text(body);
    Some(text.chars().take(MAX_MESSAGE_LEN).collect())
}

/// Logs a terminal failure
///
/// 401s are expected for anonymous callers and are not logged. A 404 on a GET is a
/// normal "not there" answer and is only noted at debug level. Bodies are attached
/// only when `verbose` is set (local development).
pub fn log_failure(error: &ApiError, verbose: bool) {
    match error.kind {
        ErrorKind::Unauthorized => {}
        ErrorKind::ClientError if error.status == Some(404) && error.method == "GET" => {
            tracing::debug!(method = %error.method, url = %error.url, "Not found");
        }
        _ if verbose => {
            tracing::error!(
                method = %error.method,
                url = %error.url,
                status = ?error.status,
                code = error.code().unwrap_or("CLIENT_ERROR"),
                request_body = error.request_body.as_deref().unwrap_or(""),
                response_body = error.response_body.as_deref().unwrap_or(""),
                "Request failed: {}",
                error.message
            );
        }
        _ => {
            tracing::error!(
                method = %error.method,
                url = %error.url,
                status = ?error.status,
                code = error.code().unwrap_or("CLIENT_ERROR"),
                "Request failed: {}",
                error.message
            );
        }
    }
}
