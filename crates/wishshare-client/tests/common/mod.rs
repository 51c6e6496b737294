//! Common test utilities for integration tests
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use wishshare_client::ClientConfig;

/// Creates a config pointing at local test servers with short delays
pub fn test_config(api_base_url: &str, ws_base_url: Option<String>) -> ClientConfig {
    ClientConfig {
        api_base_url: api_base_url.to_string(),
        ws_base_url,
        environment: "test".to_string(),
        request_timeout_ms: 2_000,
        max_retries: 2,
        retry_base_delay_ms: 5,
        reconnect_delay_ms: 50,
    }
}

/// What the test server does on one connection, in order
#[derive(Debug, Clone)]
pub enum ServerAction {
    Send(String),
    Close(u16),
    /// Keeps the connection open until the client leaves
    Hold,
}

/// Local WebSocket server running one script per accepted connection
pub struct WsServer {
    pub base_url: String,
    connections: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<String>>>,
    cookies: Arc<Mutex<Vec<Option<String>>>>,
}

impl WsServer {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    /// `Cookie` header of each handshake
    pub fn cookies(&self) -> Vec<Option<String>> {
        self.cookies.lock().unwrap().clone()
    }
}

/// Starts a server; connections past the last script are held open
pub async fn spawn_ws_server(scripts: Vec<Vec<ServerAction>>) -> WsServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let paths = Arc::new(Mutex::new(Vec::new()));
    let cookies = Arc::new(Mutex::new(Vec::new()));

    let server = WsServer {
        base_url: format!("ws://{addr}"),
        connections: Arc::clone(&connections),
        paths: Arc::clone(&paths),
        cookies: Arc::clone(&cookies),
    };

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = connections.fetch_add(1, Ordering::SeqCst);
            let script = scripts
                .get(index)
                .cloned()
                .unwrap_or_else(|| vec![ServerAction::Hold]);
            let paths = Arc::clone(&paths);
            let cookies = Arc::clone(&cookies);

            tokio::spawn(async move {
                let record_handshake = move |request: &Request, response: Response| {
                    paths.lock().unwrap().push(request.uri().path().to_string());
                    let cookie = request
                        .headers()
                        .get("cookie")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    cookies.lock().unwrap().push(cookie);
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record_handshake).await
                else {
                    return;
                };

                for action in script {
                    match action {
                        ServerAction::Send(text) => {
                            if ws.send(Message::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        ServerAction::Close(code) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "".into(),
                            };
                            let _ = ws.close(Some(frame)).await;
                            // Drain until the close handshake completes
                            while let Some(Ok(_)) = ws.next().await {}
                            return;
                        }
                        ServerAction::Hold => {
                            while let Some(Ok(_)) = ws.next().await {}
                            return;
                        }
                    }
                }
            });
        }
    });

    server
}
