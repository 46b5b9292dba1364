use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::audio::codec::EncodedFrame;
use crate::config::LiveConfig;
use crate::error::{Result, VivaError};

use super::event::LiveEvent;
use super::protocol::{ClientMessage, ServerMessage};

/// Opens a session and sends the setup message.
pub trait Connector: Send + Sync {
    fn connect(&self, setup: ClientMessage) -> BoxFuture<'static, Result<Box<dyn Transport>>>;
}

/// An established bidirectional session.
pub trait Transport: Send {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>>;

    /// The next server message; `None` once the session has closed.
    /// Malformed messages come back as [`VivaError::Codec`].
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<ServerMessage>>>;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Gemini Live over a WebSocket.
pub struct GeminiConnector {
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiConnector {
    #[must_use]
    pub const fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self { endpoint, api_key }
    }

    #[must_use]
    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.endpoint.clone(), config.resolve_api_key())
    }
}

impl Connector for GeminiConnector {
    fn connect(&self, setup: ClientMessage) -> BoxFuture<'static, Result<Box<dyn Transport>>> {
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();

        async move {
            let key = api_key.ok_or_else(|| {
                VivaError::SessionOpen(
                    "no API key configured; set live.api_key or GEMINI_API_KEY".to_string(),
                )
            })?;

            tracing::info!("connecting to {endpoint}");
            let url = format!("{endpoint}?key={key}");
            let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| VivaError::SessionOpen(format!("WebSocket handshake failed: {e}")))?;

            let json = setup
                .to_json()
                .map_err(|e| VivaError::SessionOpen(format!("failed to encode setup: {e}")))?;
            ws.send(Message::Text(json))
                .await
                .map_err(|e| VivaError::SessionOpen(format!("failed to send setup: {e}")))?;

            Ok::<Box<dyn Transport>, VivaError>(Box::new(WsTransport { ws }))
        }
        .boxed()
    }
}

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        async move {
            let json = message
                .to_json()
                .map_err(|e| VivaError::Codec(format!("failed to encode message: {e}")))?;
            self.ws
                .send(Message::Text(json))
                .await
                .map_err(|e| VivaError::Transport(format!("send failed: {e}")))
        }
        .boxed()
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<ServerMessage>>> {
        async move {
            loop {
                let Some(next) = self.ws.next().await else {
                    return None;
                };
                let parsed = match next {
                    Err(e) => return Some(Err(VivaError::Transport(format!("receive failed: {e}")))),
                    Ok(Message::Text(text)) => ServerMessage::parse(text.as_bytes()),
                    // The service also delivers JSON in binary frames.
                    Ok(Message::Binary(bytes)) => ServerMessage::parse(&bytes),
                    Ok(Message::Close(frame)) => {
                        match frame {
                            Some(f) => tracing::info!("session closed by server: {} {}", f.code, f.reason),
                            None => tracing::info!("session closed by server"),
                        }
                        return None;
                    }
                    Ok(_) => continue,
                };

                return Some(
                    parsed.map_err(|e| VivaError::Codec(format!("malformed server message: {e}"))),
                );
            }
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.ws
                .close(None)
                .await
                .map_err(|e| VivaError::Transport(format!("close failed: {e}")))
        }
        .boxed()
    }
}

/// Runs one session until it ends or `cancel` fires.
///
/// The outbox is not read until the server confirms setup, so chunks
/// captured while connecting wait there (up to its capacity) and are flushed
/// in order once the session opens.
pub async fn run_session(
    connector: Arc<dyn Connector>,
    setup: ClientMessage,
    mut outbox: mpsc::Receiver<EncodedFrame>,
    events: mpsc::UnboundedSender<LiveEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    let connecting = connector.connect(setup);
    let mut transport = tokio::select! {
        result = connecting => match result {
            Ok(t) => t,
            Err(e) => {
                let _ = events.send(LiveEvent::Errored(e));
                return;
            }
        },
        _ = cancel.changed() => return,
    };

    loop {
        tokio::select! {
            msg = transport.recv() => match msg {
                Some(Ok(m)) if m.is_setup_complete() => break,
                Some(Ok(_)) => {}
                Some(Err(VivaError::Codec(e))) => tracing::warn!("ignoring server message: {e}"),
                Some(Err(e)) => {
                    let _ = events.send(LiveEvent::Errored(VivaError::SessionOpen(e.to_string())));
                    return;
                }
                None => {
                    let _ = events.send(LiveEvent::Errored(VivaError::SessionOpen(
                        "session closed before setup completed".to_string(),
                    )));
                    return;
                }
            },
            _ = cancel.changed() => {
                close_quietly(transport.as_mut()).await;
                return;
            }
        }
    }

    tracing::info!("live session open");
    let _ = events.send(LiveEvent::Opened);

    let mut outbox_open = true;
    let mut sent = 0u64;

    loop {
        tokio::select! {
            frame = outbox.recv(), if outbox_open => match frame {
                Some(frame) => {
                    if let Err(e) = transport.send(ClientMessage::audio(&frame)).await {
                        let _ = events.send(LiveEvent::Errored(e));
                        return;
                    }
                    sent += 1;
                }
                None => {
                    tracing::debug!("capture stopped after {sent} chunks");
                    outbox_open = false;
                }
            },
            msg = transport.recv() => match msg {
                Some(Ok(m)) => {
                    if let Some(data) = m.first_inline_audio() {
                        let _ = events.send(LiveEvent::AudioReceived(data.to_string()));
                    }
                }
                Some(Err(VivaError::Codec(e))) => tracing::warn!("ignoring server message: {e}"),
                Some(Err(e)) => {
                    let _ = events.send(LiveEvent::Errored(e));
                    return;
                }
                None => {
                    let _ = events.send(LiveEvent::Closed);
                    return;
                }
            },
            _ = cancel.changed() => {
                close_quietly(transport.as_mut()).await;
                tracing::debug!("live session closed locally after {sent} chunks");
                return;
            }
        }
    }
}

async fn close_quietly(transport: &mut dyn Transport) {
    if let Err(e) = transport.close().await {
        tracing::debug!("{e}");
    }
}
