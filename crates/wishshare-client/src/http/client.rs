use reqwest::cookie::Jar;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::refresh::{is_refresh_excluded, RefreshCoordinator};
use super::retry::RetryPolicy;
use super::transport::{
    base_headers, json_headers, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    RequestBody, UploadForm,
};
use crate::config::ClientConfig;
use crate::error::{
    classify_response, classify_transport, log_failure, ApiError, FailureContext, TransportError,
};

/// WishShare API client
///
/// Every call is one logical request: it may be re-sent on transient failures and once
/// more after a successful session refresh, but callers only ever see the final result.
/// Generic over the transport for testability.
pub struct ApiClient<T: HttpTransport = ReqwestTransport> {
    transport: Arc<T>,
    refresher: Arc<RefreshCoordinator<T>>,
    base_url: String,
    policy: RetryPolicy,
    timeout: Duration,
    verbose_diagnostics: bool,
}

impl ApiClient<ReqwestTransport> {
    /// Creates a client with the default reqwest transport and its own cookie jar
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        Ok(Self::with_transport(config, ReqwestTransport::new()?))
    }

    /// Creates a client whose session cookies live in `jar`
    pub fn with_cookie_jar(config: &ClientConfig, jar: Arc<Jar>) -> Result<Self, TransportError> {
        Ok(Self::with_transport(config, ReqwestTransport::with_cookie_jar(jar)?))
    }

    /// The session cookie jar, for opening realtime channels as the same viewer
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.transport.cookie_jar()
    }
}

/// State of one logical request
#[derive(Debug, Clone, Copy)]
struct RequestAttempt<'a> {
    method: &'a Method,
    url: &'a str,
    body_digest: Option<&'a str>,
    /// Retries performed so far
    attempt: u32,
    /// Whether the session was already refreshed for this request
    refreshed: bool,
}

impl<'a> RequestAttempt<'a> {
    fn new(method: &'a Method, url: &'a str, body_digest: Option<&'a str>) -> Self {
        Self {
            method,
            url,
            body_digest,
            attempt: 0,
            refreshed: false,
        }
    }

    fn next_retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }

    fn after_refresh(self) -> Self {
        Self {
            refreshed: true,
            ..self
        }
    }

    fn context(&self) -> FailureContext<'a> {
        FailureContext {
            method: self.method,
            url: self.url,
            request_body: self.body_digest,
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Retry(Duration),
    Refresh,
    Fail,
}

impl<T: HttpTransport> ApiClient<T> {
    /// Creates a client over a custom transport
    pub fn with_transport(config: &ClientConfig, transport: T) -> Self {
        let transport = Arc::new(transport);
        let timeout = config.request_timeout();
        let refresher = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            &config.api_base_url,
            timeout,
        ));

        Self {
            transport,
            refresher,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            policy: config.retry_policy(),
            timeout,
            verbose_diagnostics: config.is_local_dev(),
        }
    }

    /// Resolves an API path against the base URL
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Refreshes the session, sharing any refresh already in flight
    pub async fn refresh_session(&self) -> bool {
        self.refresher.refresh().await
    }

    /// Makes a GET request
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.execute(Method::GET, path, RequestBody::Empty).await
    }

    /// Makes a POST request with a JSON body
    pub async fn post<R: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let body = self.json_body(&Method::POST, path, body)?;
        self.execute(Method::POST, path, body).await
    }

    /// Makes a POST request without a body
    pub async fn post_empty<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.execute(Method::POST, path, RequestBody::Empty).await
    }

    /// Makes a PUT request with a JSON body
    pub async fn put<R: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let body = self.json_body(&Method::PUT, path, body)?;
        self.execute(Method::PUT, path, body).await
    }

    /// Makes a DELETE request
    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.execute(Method::DELETE, path, RequestBody::Empty).await
    }

    /// Uploads a multipart form (e.g. an image) with POST
    pub async fn upload<R: DeserializeOwned>(
        &self,
        path: &str,
        form: UploadForm,
    ) -> Result<R, ApiError> {
        if let Err(e) = form.validate() {
            let method = Method::POST;
            let url = self.url_for(path);
            let description = form.describe();
            let ctx = FailureContext {
                method: &method,
                url: &url,
                request_body: Some(&description),
            };
            let error = classify_transport(&ctx, &e);
            log_failure(&error, self.verbose_diagnostics);
            return Err(error);
        }
        self.execute(Method::POST, path, RequestBody::Form(form)).await
    }

    /// Performs one logical request
    ///
    /// Transient failures (5xx, network, timeout) are retried with exponential backoff
    /// up to the retry budget. A 401 triggers at most one session refresh; a successful
    /// refresh re-sends the request without consuming the budget. Empty or non-JSON
    /// success responses decode `R` from JSON `null`.
    pub async fn execute<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<R, ApiError> {
        let url = self.url_for(path);
        let digest = body.digest();
        let mut attempt = RequestAttempt::new(&method, &url, digest.as_deref());

        loop {
            let error = match self.send_once(&attempt, &body).await {
                Ok(response) => return self.decode(&attempt, &response),
                Err(error) => error,
            };

            match self.next_step(&error, &attempt) {
                Step::Refresh => {
                    tracing::info!(method = %method, url = %url, "Session expired, refreshing");
                    if self.refresher.refresh().await {
                        attempt = attempt.after_refresh();
                        continue;
                    }
                    log_failure(&error, self.verbose_diagnostics);
                    return Err(error);
                }
                Step::Retry(delay) => {
                    attempt = attempt.next_retry();
                    tracing::warn!(
                        method = %method,
                        url = %url,
                        attempt = attempt.attempt,
                        code = error.code().unwrap_or("CLIENT_ERROR"),
                        "Request failed, retrying in {:?}: {}",
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::Fail => {
                    log_failure(&error, self.verbose_diagnostics);
                    return Err(error);
                }
            }
        }
    }

    fn next_step(&self, error: &ApiError, attempt: &RequestAttempt<'_>) -> Step {
        if error.is_unauthorized() && !attempt.refreshed && !is_refresh_excluded(attempt.url) {
            return Step::Refresh;
        }
        if error.kind.is_transient() && self.policy.allows_retry(attempt.attempt) {
            return Step::Retry(self.policy.delay_for_retry(attempt.attempt + 1));
        }
        Step::Fail
    }

    /// One transport attempt under the request deadline
    async fn send_once(
        &self,
        attempt: &RequestAttempt<'_>,
        body: &RequestBody,
    ) -> Result<HttpResponse, ApiError> {
        let headers = if body.is_json() {
            json_headers()
        } else {
            base_headers()
        };
        let request = HttpRequest {
            method: attempt.method.clone(),
            url: attempt.url.to_string(),
            headers,
            body: body.clone(),
        };

        let ctx = attempt.context();
        let response = match tokio::time::timeout(self.timeout, self.transport.send(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_transport(&ctx, &e)),
            Err(_) => return Err(classify_transport(&ctx, &TransportError::Timeout)),
        };

        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_response(&ctx, response.status, &response.body))
        }
    }

    fn decode<R: DeserializeOwned>(
        &self,
        attempt: &RequestAttempt<'_>,
        response: &HttpResponse,
    ) -> Result<R, ApiError> {
        let decoded = if response.is_empty() {
            serde_json::from_value(Value::Null)
        } else {
            serde_json::from_str(&response.body)
        };

        decoded.map_err(|e| {
            let error = ApiError::invalid_body(&attempt.context(), response.status, &e);
            log_failure(&error, self.verbose_diagnostics);
            error
        })
    }

    fn json_body<B: Serialize + ?Sized>(
        &self,
        method: &Method,
        path: &str,
        body: &B,
    ) -> Result<RequestBody, ApiError> {
        serde_json::to_value(body)
            .map(RequestBody::Json)
            .map_err(|e| ApiError::invalid_request(method, &self.url_for(path), &e))
    }
}

impl<T: HttpTransport> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            refresher: Arc::clone(&self.refresher),
            base_url: self.base_url.clone(),
            policy: self.policy,
            timeout: self.timeout,
            verbose_diagnostics: self.verbose_diagnostics,
        }
    }
}
