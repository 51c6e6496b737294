//! Test fixtures
//!
//! Pre-built configuration and polling helpers for common testing scenarios.

use std::time::Duration;

use crate::config::ClientConfig;

/// Config with short deadlines so retry and reconnect paths run quickly
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        api_base_url: "http://api.test".to_string(),
        ws_base_url: Some("ws://api.test".to_string()),
        environment: "local".to_string(),
        request_timeout_ms: 50,
        max_retries: 2,
        retry_base_delay_ms: 1,
        reconnect_delay_ms: 20,
    }
}

/// Same as [`fast_config`] with a custom reconnect delay
pub fn config_with_reconnect_delay(delay: Duration) -> ClientConfig {
    ClientConfig {
        reconnect_delay_ms: u64::try_from(delay.as_millis()).unwrap(),
        ..fast_config()
    }
}

/// Polls a condition until it holds, panicking after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
