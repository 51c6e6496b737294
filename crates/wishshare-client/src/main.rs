use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wishshare_client::{ApiClient, ChannelState, ClientConfig, ErrorKind, RealtimeChannel};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    let default_level = if config.is_local_dev() { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let slug = std::env::args()
        .nth(1)
        .context("Usage: wishshare-watch <wishlist-slug>")?;

    tracing::info!("Watching wishlist {} on {}", slug, config.realtime_base_url());

    let client = ApiClient::new(&config).context("Failed to create HTTP client")?;
    match client.get::<Value>("/auth/me").await {
        Ok(me) => {
            let name = display_name(&me);
            tracing::info!("Signed in as {}", name);
        }
        Err(e) if e.kind == ErrorKind::Unauthorized => tracing::info!("Watching anonymously"),
        Err(e) => tracing::warn!("Could not check session: {}", e),
    }

    let channel = RealtimeChannel::with_cookie_jar(&config, client.cookie_jar());
    let handle = channel.connect(&slug, |message| {
        println!("{}", message.payload);
    });

    let mut state = handle.state();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            }
            handle.disconnect();
        }
        _ = state.wait_for(ChannelState::is_final) => {}
    }

    handle.closed().await;

    if *state.borrow() == ChannelState::Terminal {
        bail!("Not permitted to watch wishlist {slug}");
    }

    tracing::info!("Stopped watching {}", slug);
    Ok(())
}

/// Best label for the signed-in user from an `/auth/me` payload
fn display_name(me: &Value) -> &str {
    ["name", "email"]
        .iter()
        .find_map(|key| {
            me.get(*key)
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
        })
        .unwrap_or("unknown user")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_name_prefers_name_then_email() {
        assert_eq!(display_name(&json!({"name": "Ann", "email": "a@example.com"})), "Ann");
        assert_eq!(display_name(&json!({"email": "a@example.com"})), "a@example.com");
        assert_eq!(display_name(&json!({"name": "", "email": "b@example.com"})), "b@example.com");
        assert_eq!(display_name(&json!({"id": 1})), "unknown user");
    }
}
