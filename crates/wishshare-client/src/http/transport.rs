//! HTTP transport abstraction
//!
//! The executor only talks to the network through [`HttpTransport`], so the retry,
//! refresh and timeout logic can be exercised against scripted responses.

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{multipart, Method};
use serde_json::Value;
use std::sync::Arc;

use crate::error::TransportError;
use crate::redact::{is_sensitive_key, redact, REDACTED};

/// Trait for sending one physical HTTP request
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Sends the request and returns whatever response arrived, success or not
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// One physical request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(UploadForm),
}

impl RequestBody {
    /// Redacted, printable copy of the body for diagnostics
    pub fn digest(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Json(value) => Some(redact(value).to_string()),
            Self::Form(form) => Some(form.describe()),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Owned multipart payload
///
/// Kept as plain data rather than a `reqwest::multipart::Form` so the same upload
/// can be re-sent on retry.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    parts: Vec<FormPart>,
}

/// One field of an [`UploadForm`]
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text field
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a file field
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.map(str::to_owned),
            bytes,
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Summary of the form without file contents
    pub fn describe(&self) -> String {
        let fields: Vec<String> = self
            .parts
            .iter()
            .map(|part| match part {
                FormPart::Text { name, .. } if is_sensitive_key(name) => {
                    format!("{name}={REDACTED}")
                }
                FormPart::Text { name, value } => format!("{name}={value}"),
                FormPart::File {
                    name,
                    file_name,
                    bytes,
                    ..
                } => format!("{name}=<{file_name}, {} bytes>", bytes.len()),
            })
            .collect();
        format!("multipart({})", fields.join(", "))
    }

    /// Checks every declared file content type
    pub fn validate(&self) -> Result<(), TransportError> {
        for part in &self.parts {
            if let FormPart::File {
                mime: Some(mime), ..
            } = part
            {
                multipart::Part::bytes(Vec::new())
                    .mime_str(mime)
                    .map_err(|e| invalid_mime(mime, &e))?;
            }
        }
        Ok(())
    }

    fn to_multipart(&self) -> Result<multipart::Form, TransportError> {
        let mut form = multipart::Form::new();
        for part in &self.parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut file = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime).map_err(|e| invalid_mime(mime, &e))?;
                    }
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

fn invalid_mime(mime: &str, err: &reqwest::Error) -> TransportError {
    TransportError::InvalidRequest(format!("Invalid upload content type {mime:?}: {err}"))
}

/// Response from an HTTP request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    /// Returns true if status is in 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the declared content type is JSON
    pub fn is_json(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.contains("+json")
        })
    }

    /// Returns true if the response carries nothing to decode
    pub fn is_empty(&self) -> bool {
        self.status == 204 || self.body.trim().is_empty() || !self.is_json()
    }
}

/// Header set sent with every request
pub fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Header set for requests with a JSON body
pub fn json_headers() -> HeaderMap {
    let mut headers = base_headers();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Production transport using reqwest
///
/// The cookie jar carries the session cookies set by the API (login and refresh)
/// on every subsequent request to the same origin. Realtime connections read the
/// same jar.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh cookie jar
    pub fn new() -> Result<Self, TransportError> {
        Self::with_cookie_jar(Arc::new(Jar::default()))
    }

    /// Creates a transport that stores session cookies in `jar`
    pub fn with_cookie_jar(jar: Arc<Jar>) -> Result<Self, TransportError> {
        let inner = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        Ok(Self { inner, jar })
    }

    /// The jar holding this transport's session cookies
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.inner.request(method, &url).headers(headers);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(value.to_string()),
            RequestBody::Form(form) => builder.multipart(form.to_multipart()?),
        };

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
