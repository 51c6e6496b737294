//! Client for the WishShare API
//!
//! [`ApiClient`] runs every HTTP call through one executor that retries transient
//! failures, refreshes the session once on a 401 and turns every failure into a
//! typed [`ApiError`]. [`RealtimeChannel`] keeps a reconnecting WebSocket open for
//! one wishlist.

pub mod config;
pub mod error;
pub mod http;
pub mod realtime;
pub mod redact;

#[cfg(test)]
mod testutil;

pub use config::ClientConfig;
pub use error::{ApiError, ErrorKind, TransportError};
pub use http::{ApiClient, RequestBody, UploadForm};
pub use realtime::{ChannelHandle, ChannelState, RealtimeChannel, RealtimeMessage};
