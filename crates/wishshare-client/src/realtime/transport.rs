//! WebSocket transport abstraction
//!
//! The channel driver only sees [`SocketEvent`]s, so reconnect and shutdown
//! behavior can be tested with scripted sockets.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::cookie::{CookieStore, Jar};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// What the driver sees from a live socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame
    Frame(String),
    /// The connection ended, with the close code if the peer sent one
    Closed(Option<u16>),
}

/// Failure to open a realtime connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handshake rejected with HTTP {0}")]
    Rejected(u16),

    #[error("Connection failed: {0}")]
    Failed(String),
}

impl From<tungstenite::Error> for ConnectError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected(response.status().as_u16()),
            other => Self::Failed(other.to_string()),
        }
    }
}

/// One live connection
#[async_trait]
pub trait RealtimeSocket: Send + 'static {
    /// Waits for the next frame or the end of the connection
    async fn next_event(&mut self) -> SocketEvent;

    /// Closes the connection; errors are ignored
    async fn close(&mut self);
}

/// Opens connections
#[async_trait]
pub trait RealtimeConnector: Send + Sync + 'static {
    type Socket: RealtimeSocket;

    async fn connect(&self, url: &str) -> Result<Self::Socket, ConnectError>;
}

/// Production connector using tokio-tungstenite
///
/// With a cookie jar, the handshake carries the session cookies the API set for
/// the matching `http`/`https` origin, so the server sees the same viewer.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
    jar: Option<Arc<Jar>>,
}

impl TungsteniteConnector {
    /// Creates an anonymous connector
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            jar: None,
        }
    }

    /// Sends the session cookies from `jar` on every handshake
    pub fn with_cookie_jar(self, jar: Arc<Jar>) -> Self {
        Self {
            jar: Some(jar),
            ..self
        }
    }
}

#[async_trait]
impl RealtimeConnector for TungsteniteConnector {
    type Socket = TungsteniteSocket;

    async fn connect(&self, url: &str) -> Result<Self::Socket, ConnectError> {
        let mut request = url.into_client_request()?;
        if let Some(cookie) = self.jar.as_deref().and_then(|jar| session_cookie(jar, url)) {
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))??;

        Ok(TungsteniteSocket { stream })
    }
}

/// `Cookie` header the API origin would receive for a realtime URL
///
/// `ws` maps to `http` and `wss` to `https`; ports are ignored by cookie matching.
pub fn session_cookie(jar: &Jar, ws_url: &str) -> Option<HeaderValue> {
    let http_url = if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        ws_url.to_string()
    };

    let url = reqwest::Url::parse(&http_url).ok()?;
    let cookies = jar.cookies(&url)?;
    HeaderValue::from_bytes(cookies.as_bytes()).ok()
}

/// Live tokio-tungstenite connection
pub struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeSocket for TungsteniteSocket {
    async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Frame(text),
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::debug!("Ignoring binary frame ({} bytes)", bytes.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    return SocketEvent::Closed(frame.map(|f| u16::from(f.code)));
                }
                // Ping replies are handled by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket read failed: {}", e);
                    return SocketEvent::Closed(None);
                }
                None => return SocketEvent::Closed(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}
