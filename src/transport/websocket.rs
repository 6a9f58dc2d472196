//! WebSocket client transport.
//!
//! Wraps a `tokio-tungstenite` stream split into independent read and
//! write halves, so a suspended `receive` never blocks `send`.
//!
//! # Frame Handling
//!
//! | Incoming message | Result |
//! |------------------|--------|
//! | Text | Frame |
//! | Binary (valid UTF-8) | Frame |
//! | Binary (invalid UTF-8) | Dropped with a warning |
//! | Ping / Pong / raw frame | Skipped |
//! | Close, stream end | End of stream |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::Transport;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket transport.
///
/// Generic over the underlying byte stream so both client connections
/// (from [`WebSocketTransport::open`]) and already-upgraded streams (from
/// [`WebSocketTransport::from_stream`]) are supported.
pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
    /// Write half.
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    /// Read half, only touched by the receive loop.
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl WebSocketTransport {
    /// Opens a WebSocket client connection.
    ///
    /// # Arguments
    ///
    /// * `url` - `ws://` or `wss://` address of the remote end
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the TCP connect or the WebSocket
    /// handshake fails.
    pub async fn open(url: &Url) -> Result<Self> {
        let (ws_stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket handshake with {url} failed: {e}")))?;

        info!(%url, status = %response.status(), "WebSocket connection established");

        Ok(Self::from_stream(ws_stream))
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established WebSocket stream.
    #[must_use]
    pub fn from_stream(ws_stream: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into())).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::ConnectionClosed,
            other => Error::WebSocket(other),
        })
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Text frame received");
                    return Ok(Some(text.as_str().to_owned()));
                }

                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                },

                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by remote");
                    return Ok(None);
                }

                // Ping, Pong, raw frames
                Some(Ok(_)) => {}

                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),

                Some(Err(e)) => return Err(Error::WebSocket(e)),

                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::WebSocket(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::net::TcpListener;

    /// Binds a one-shot echo server and returns its URL.
    async fn spawn_echo_server() -> Url {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("upgrade");
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() || message.is_binary() {
                    ws.send(message).await.expect("echo");
                } else if message.is_close() {
                    break;
                }
            }
        });

        Url::parse(&format!("ws://127.0.0.1:{port}")).expect("valid url")
    }

    #[tokio::test]
    async fn test_send_receive_roundtrip() {
        let url = spawn_echo_server().await;
        let transport = WebSocketTransport::open(&url).await.expect("open");

        transport.send(r#"{"hello":1}"#.to_string()).await.expect("send");
        let frame = transport.receive().await.expect("receive");
        assert_eq!(frame.as_deref(), Some(r#"{"hello":1}"#));

        transport.close().await.expect("close");
        transport.close().await.expect("second close is harmless");
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("valid url");
        let result = WebSocketTransport::open(&url).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
