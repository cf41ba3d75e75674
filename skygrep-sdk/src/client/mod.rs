//! Event-source client.
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! wire objects do not pull in `tokio-tungstenite`.

mod jetstream;

pub use jetstream::{JetstreamClient, JetstreamSubscription, subscribe_url};

/// Errors produced by the Jetstream client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Websocket handshake or transport failure.
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
