//! Jetstream websocket subscription.
//!
//! Jetstream filters server-side: the subscription URL carries one
//! `wantedCollections` parameter per collection and an optional `cursor`
//! (unix microseconds) from which to replay.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::ClientError;
use crate::objects::JetstreamMessage;

/// Build the subscription URL for `endpoint`.
///
/// Existing query parameters on the endpoint are preserved.
pub fn subscribe_url(endpoint: &Url, wanted_collections: &[String], cursor: Option<i64>) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        for collection in wanted_collections {
            query.append_pair("wantedCollections", collection);
        }
        if let Some(cursor) = cursor {
            query.append_pair("cursor", &cursor.to_string());
        }
    }
    url
}

/// Connection factory for a fixed endpoint and collection filter.
#[derive(Debug, Clone)]
pub struct JetstreamClient {
    endpoint: Url,
    wanted_collections: Vec<String>,
}

impl JetstreamClient {
    pub fn new(endpoint: Url, wanted_collections: Vec<String>) -> Self {
        Self {
            endpoint,
            wanted_collections,
        }
    }

    pub fn wanted_collections(&self) -> &[String] {
        &self.wanted_collections
    }

    /// Open a subscription starting at `cursor`.
    pub async fn connect(&self, cursor: Option<i64>) -> Result<JetstreamSubscription, ClientError> {
        let url = subscribe_url(&self.endpoint, &self.wanted_collections, cursor);
        tracing::debug!(%url, "Connecting to Jetstream");
        let (stream, _response) = connect_async(url.as_str()).await?;
        Ok(JetstreamSubscription { stream })
    }
}

/// An open Jetstream subscription.
pub struct JetstreamSubscription {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl JetstreamSubscription {
    /// Receive the next decoded frame.
    ///
    /// Returns `None` once the server closes the connection. Control
    /// frames are consumed transparently.
    pub async fn next_message(&mut self) -> Option<Result<JetstreamMessage, ClientError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };
            match frame {
                Message::Text(text) => {
                    return Some(serde_json::from_str(&text).map_err(ClientError::from));
                }
                Message::Binary(bytes) => {
                    return Some(serde_json::from_slice(&bytes).map_err(ClientError::from));
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Jetstream closed the subscription");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    /// Send a close frame and wait for the close handshake.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
