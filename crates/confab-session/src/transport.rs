use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use confab_foundation::SessionError;

/// One live connection: text frames in, text frames out. The concrete
/// WebSocket (TLS, framing, ping/pong) stays behind this seam so the client
/// state machine is testable without a network.
#[async_trait]
pub trait SessionTransport: Send {
    async fn send_text(&mut self, payload: String) -> Result<(), SessionError>;

    /// Next inbound text payload; `None` means the remote closed cleanly.
    async fn next_message(&mut self) -> Option<Result<String, SessionError>>;

    /// Best-effort close; errors are discarded (logged at debug).
    async fn close(&mut self);
}

/// Dials new transports; owned by the client across reconnects.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn SessionTransport>, SessionError>;
}

pub struct WsConnector;

#[async_trait]
impl SessionConnector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn SessionTransport>, SessionError> {
        let (ws, _response) = connect_async(endpoint)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        tracing::debug!("WebSocket transport established");
        Ok(Box::new(WsTransport { ws }))
    }
}

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn send_text(&mut self, payload: String) -> Result<(), SessionError> {
        self.ws
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn next_message(&mut self) -> Option<Result<String, SessionError>> {
        loop {
            match self.ws.next().await? {
                // Some backends deliver JSON payloads as binary frames.
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!("Ignoring error on best-effort close: {}", e);
        }
    }
}
