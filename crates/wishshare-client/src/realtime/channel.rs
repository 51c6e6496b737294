use reqwest::cookie::Jar;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::transport::{RealtimeConnector, RealtimeSocket, SocketEvent, TungsteniteConnector};
use crate::config::ClientConfig;

/// Close code the server uses when the viewer may not observe the resource
pub const AUTH_DENIED_CLOSE_CODE: u16 = 1008;

/// Lifecycle of a realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    /// Waiting out the reconnect delay
    Retrying,
    /// Authorization denied; the channel will not reconnect
    Terminal,
    /// Disconnected by the caller
    Stopped,
}

impl ChannelState {
    /// Returns true once the channel has ended for good
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminal | Self::Stopped)
    }
}

/// A decoded event frame
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeMessage {
    pub event_type: String,
    /// The whole frame object, `type` included
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame is not JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Frame has no string `type` field")]
    MissingType,
}

impl RealtimeMessage {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let payload: Value = serde_json::from_str(text)?;
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();
        Ok(Self {
            event_type,
            payload,
        })
    }
}

/// Connection URL for one resource
pub fn channel_url(ws_base_url: &str, resource_id: &str) -> String {
    format!(
        "{}/ws/{}",
        ws_base_url.trim_end_matches('/'),
        urlencoding::encode(resource_id)
    )
}

/// Opens reconnecting realtime channels
pub struct RealtimeChannel<C: RealtimeConnector = TungsteniteConnector> {
    connector: Arc<C>,
    base_url: String,
    reconnect_delay: Duration,
}

impl RealtimeChannel<TungsteniteConnector> {
    /// Opens anonymous channels
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_connector(config, TungsteniteConnector::new(config.request_timeout()))
    }

    /// Opens channels as the viewer whose session cookies are in `jar`
    ///
    /// Pass [`ApiClient::cookie_jar`](crate::ApiClient::cookie_jar) to watch as the
    /// signed-in user.
    pub fn with_cookie_jar(config: &ClientConfig, jar: Arc<Jar>) -> Self {
        let connector = TungsteniteConnector::new(config.request_timeout()).with_cookie_jar(jar);
        Self::with_connector(config, connector)
    }
}

impl<C: RealtimeConnector> RealtimeChannel<C> {
    pub fn with_connector(config: &ClientConfig, connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            base_url: config.realtime_base_url(),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    /// Opens a channel for one resource and delivers its events to `on_message`
    ///
    /// The channel reconnects after any close except an authorization denial, until
    /// the returned handle is disconnected or dropped. Must be called from within a
    /// tokio runtime.
    pub fn connect<F>(&self, resource_id: &str, on_message: F) -> ChannelHandle
    where
        F: FnMut(RealtimeMessage) + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let driver = Driver {
            connector: Arc::clone(&self.connector),
            url: channel_url(&self.base_url, resource_id),
            resource_id: resource_id.to_string(),
            reconnect_delay: self.reconnect_delay,
            stop_rx,
            state_tx,
        };
        let task = tokio::spawn(driver.run(on_message));

        ChannelHandle {
            resource_id: resource_id.to_string(),
            stop_tx,
            state_rx,
            task,
        }
    }
}

impl<C: RealtimeConnector> Clone for RealtimeChannel<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            base_url: self.base_url.clone(),
            reconnect_delay: self.reconnect_delay,
        }
    }
}

/// Caller's side of an open channel
///
/// Dropping the handle stops the channel as if [`ChannelHandle::disconnect`] was called.
#[derive(Debug)]
pub struct ChannelHandle {
    resource_id: String,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Stops the channel: cancels any pending reconnect and closes the live socket
    ///
    /// Safe to call more than once and at any point of the lifecycle.
    pub fn disconnect(&self) {
        if !self.stop_tx.send_replace(true) {
            tracing::info!(resource_id = %self.resource_id, "Disconnecting realtime channel");
        }
    }

    /// Watches the channel state
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Returns true until the caller disconnects or the channel ends
    pub fn is_active(&self) -> bool {
        !*self.stop_tx.borrow() && !self.current_state().is_final()
    }

    /// Waits for the driver to finish
    ///
    /// Only returns once the channel was disconnected or ended terminally.
    pub async fn closed(self) {
        let Self {
            resource_id,
            stop_tx,
            task,
            ..
        } = self;

        if let Err(e) = task.await {
            tracing::warn!(resource_id = %resource_id, "Realtime driver ended abnormally: {}", e);
        }
        drop(stop_tx);
    }
}

/// Background task owning the socket of one channel
struct Driver<C: RealtimeConnector> {
    connector: Arc<C>,
    url: String,
    resource_id: String,
    reconnect_delay: Duration,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ChannelState>,
}

impl<C: RealtimeConnector> Driver<C> {
    async fn run<F>(mut self, mut on_message: F)
    where
        F: FnMut(RealtimeMessage) + Send + 'static,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.set_state(ChannelState::Connecting);
            tracing::debug!(resource_id = %self.resource_id, attempt, "Connecting to {}", self.url);

            let connected = tokio::select! {
                biased;
                () = stopped(&mut self.stop_rx) => break,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(mut socket) => {
                    self.set_state(ChannelState::Open);
                    tracing::info!(resource_id = %self.resource_id, attempt, "Realtime channel open");
                    attempt = 0;

                    let ended = tokio::select! {
                        biased;
                        () = stopped(&mut self.stop_rx) => None,
                        code = pump(&mut socket, &self.resource_id, &mut on_message) => Some(code),
                    };

                    let Some(close_code) = ended else {
                        socket.close().await;
                        break;
                    };
                    drop(socket);

                    if close_code == Some(AUTH_DENIED_CLOSE_CODE) {
                        tracing::warn!(
                            resource_id = %self.resource_id,
                            "Realtime channel closed: not permitted to observe this resource"
                        );
                        self.set_state(ChannelState::Terminal);
                        return;
                    }

                    tracing::info!(
                        resource_id = %self.resource_id,
                        code = ?close_code,
                        "Realtime channel closed, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        resource_id = %self.resource_id,
                        attempt,
                        "Realtime connection failed, retrying in {:?}: {}",
                        self.reconnect_delay,
                        e
                    );
                }
            }

            self.set_state(ChannelState::Retrying);
            tokio::select! {
                biased;
                () = stopped(&mut self.stop_rx) => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(ChannelState::Stopped);
        tracing::debug!(resource_id = %self.resource_id, "Realtime channel stopped");
    }

    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_replace(state);
    }
}

/// Resolves once the caller disconnects or drops the handle
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

/// Delivers frames until the socket closes, returning the close code
async fn pump<S, F>(socket: &mut S, resource_id: &str, on_message: &mut F) -> Option<u16>
where
    S: RealtimeSocket,
    F: FnMut(RealtimeMessage),
{
    loop {
        match socket.next_event().await {
            SocketEvent::Frame(text) => match RealtimeMessage::parse(&text) {
                Ok(message) => on_message(message),
                Err(e) => tracing::debug!(resource_id, "Dropping realtime frame: {}", e),
            },
            SocketEvent::Closed(code) => return code,
        }
    }
}
