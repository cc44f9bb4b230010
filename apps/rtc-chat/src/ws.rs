use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rtc_events::{Signaler, SignalingError, SignalingMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Carries handshake messages as JSON text frames over a websocket.
///
/// A writer and a reader task own the two halves of the socket; `recv` only
/// waits on a queue, so dropping it mid-await never loses a frame.
pub struct WsSignaler {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<SignalingMessage>>,
}

impl WsSignaler {
    pub fn spawn<S>(socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = socket.split();
        let (outgoing, mut send_rx) = mpsc::unbounded_channel::<String>();
        let (signal_tx, incoming) = mpsc::unbounded_channel::<SignalingMessage>();

        tokio::spawn(async move {
            while let Some(text) = send_rx.recv().await {
                if let Err(err) = ws_write.send(Message::Text(text)).await {
                    debug!(target = "rtc_chat", error = %err, "signaling websocket write failed");
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(target = "rtc_chat", "signaling websocket error: {err}");
                        break;
                    }
                };
                match SignalingMessage::from_json(&text) {
                    Ok(message) => {
                        if signal_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(target = "rtc_chat", error = %err, "ignoring malformed signaling frame"),
                }
            }
            debug!(target = "rtc_chat", "signaling websocket closed");
        });

        Self {
            outgoing,
            incoming: AsyncMutex::new(incoming),
        }
    }
}

#[async_trait]
impl Signaler for WsSignaler {
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let text = message.to_json()?;
        self.outgoing.send(text).map_err(|_| SignalingError::Closed)
    }

    async fn recv(&self) -> Option<SignalingMessage> {
        self.incoming.lock().await.recv().await
    }
}
