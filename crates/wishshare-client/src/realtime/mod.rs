//! Reconnecting realtime channels over WebSocket

mod channel;
pub mod transport;

pub use channel::{
    channel_url, ChannelHandle, ChannelState, FrameError, RealtimeChannel, RealtimeMessage,
    AUTH_DENIED_CLOSE_CODE,
};
pub use transport::{
    session_cookie, ConnectError, RealtimeConnector, RealtimeSocket, SocketEvent,
    TungsteniteConnector,
};
