//! Single-flight session refresh
//!
//! When several requests hit a 401 at once, only one `POST /auth/refresh` goes out.
//! Every caller awaits the same shared future and sees the same outcome. The slot is
//! cleared as soon as that future settles, so the next 401 starts a fresh refresh.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::transport::{base_headers, HttpRequest, HttpTransport, RequestBody};

/// Session refresh endpoint
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Paths whose 401 must never trigger a refresh
pub const REFRESH_EXCLUDED_PATHS: &[&str] =
    &["/auth/login", "/auth/register", "/auth/logout", REFRESH_PATH];

/// Returns true if a 401 on this path or URL must be surfaced without refreshing
///
/// Absolute URLs are matched on their path, and a path prefix in front of the auth
/// routes (an API mounted under `/api`) still counts.
pub fn is_refresh_excluded(target: &str) -> bool {
    let path = match reqwest::Url::parse(target) {
        Ok(url) => url.path().to_string(),
        Err(_) => target.split(['?', '#']).next().unwrap_or(target).to_string(),
    };
    let path = path.trim_end_matches('/');
    REFRESH_EXCLUDED_PATHS
        .iter()
        .any(|excluded| path.ends_with(excluded))
}

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// Deduplicates concurrent session refreshes
pub struct RefreshCoordinator<T: HttpTransport> {
    transport: Arc<T>,
    refresh_url: String,
    timeout: Duration,
    in_flight: Arc<Mutex<Option<RefreshFuture>>>,
}

impl<T: HttpTransport> RefreshCoordinator<T> {
    pub fn new(transport: Arc<T>, base_url: &str, timeout: Duration) -> Self {
        Self {
            transport,
            refresh_url: format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH),
            timeout,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Refreshes the session, joining a refresh that is already in flight
    pub async fn refresh(&self) -> bool {
        let shared = {
            let mut slot = lock(&self.in_flight);
            if let Some(existing) = slot.as_ref() {
                tracing::debug!("Joining in-flight session refresh");
                existing.clone()
            } else {
                let started = self.start();
                *slot = Some(started.clone());
                started
            }
        };

        shared.await
    }

    /// Returns true while a refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    fn start(&self) -> RefreshFuture {
        let transport = Arc::clone(&self.transport);
        let url = self.refresh_url.clone();
        let timeout = self.timeout;
        let slot = Arc::clone(&self.in_flight);

        async move {
            let refreshed = refresh_once(transport.as_ref(), url, timeout).await;
            *lock(&slot) = None;
            refreshed
        }
        .boxed()
        .shared()
    }
}

/// Bare single-shot refresh call; never retried
async fn refresh_once<T: HttpTransport>(transport: &T, url: String, timeout: Duration) -> bool {
    tracing::info!("Refreshing session");

    let request = HttpRequest {
        method: Method::POST,
        url,
        headers: base_headers(),
        body: RequestBody::Empty,
    };

    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(Ok(response)) if response.is_success() => {
            tracing::info!("Session refreshed");
            true
        }
        Ok(Ok(response)) => {
            tracing::info!(status = response.status, "Session refresh rejected");
            false
        }
        Ok(Err(e)) => {
            tracing::warn!("Session refresh failed: {}", e);
            false
        }
        Err(_) => {
            tracing::warn!("Session refresh timed out after {:?}", timeout);
            false
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockReply, MockTransport};
    use futures_util::future::join_all;

    const REFRESH_URL: &str = "http://api.test/auth/refresh";

    fn coordinator(transport: MockTransport) -> RefreshCoordinator<MockTransport> {
        RefreshCoordinator::new(
            Arc::new(transport),
            "http://api.test/",
            Duration::from_millis(200),
        )
    }

    #[test]
    fn excludes_auth_endpoints() {
        assert!(is_refresh_excluded("/auth/login"));
        assert!(is_refresh_excluded("/auth/register"));
        assert!(is_refresh_excluded("/auth/logout/"));
        assert!(is_refresh_excluded("/auth/refresh?x=1"));
        assert!(!is_refresh_excluded("/auth/me"));
        assert!(!is_refresh_excluded("/wishlists/my"));
    }

    #[test]
    fn excludes_auth_endpoints_given_as_urls() {
        assert!(is_refresh_excluded("http://api.test/auth/login"));
        assert!(is_refresh_excluded("https://api.test/api/auth/refresh?next=%2F"));
        assert!(!is_refresh_excluded("http://api.test/auth/me"));
        assert!(!is_refresh_excluded("http://api.test/auth/login-history"));
    }

    #[tokio::test]
    async fn successful_refresh_returns_true() {
        let transport = MockTransport::new().on(Method::POST, REFRESH_URL, MockReply::status(204));
        let refresher = coordinator(transport.clone());

        assert!(refresher.refresh().await);
        assert_eq!(transport.count_for(&Method::POST, REFRESH_URL), 1);
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn rejected_refresh_returns_false() {
        let transport = MockTransport::new().on(Method::POST, REFRESH_URL, MockReply::status(401));
        let refresher = coordinator(transport);

        assert!(!refresher.refresh().await);
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let transport = MockTransport::new().on(
            Method::POST,
            REFRESH_URL,
            MockReply::status(204).after(Duration::from_millis(30)),
        );
        let refresher = coordinator(transport.clone());

        let outcomes = join_all((0..5).map(|_| refresher.refresh())).await;

        assert_eq!(outcomes, vec![true; 5]);
        assert_eq!(transport.count_for(&Method::POST, REFRESH_URL), 1);
    }

    #[tokio::test]
    async fn settled_refresh_is_not_reused() {
        let transport = MockTransport::new().on(Method::POST, REFRESH_URL, MockReply::status(204));
        let refresher = coordinator(transport.clone());

        assert!(refresher.refresh().await);
        assert!(refresher.refresh().await);

        assert_eq!(transport.count_for(&Method::POST, REFRESH_URL), 2);
    }

    #[tokio::test]
    async fn hanging_refresh_times_out_as_failure() {
        let transport = MockTransport::new().on(Method::POST, REFRESH_URL, MockReply::Hang);
        let refresher = RefreshCoordinator::new(
            Arc::new(transport),
            "http://api.test",
            Duration::from_millis(20),
        );

        assert!(!refresher.refresh().await);
        assert!(!refresher.is_refreshing());
    }
}
