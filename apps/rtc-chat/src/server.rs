use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rtc_events::{Connection, ConnectionConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{info, warn};

use crate::room::Room;
use crate::ws::WsSignaler;

pub async fn run(listen: &str, config: ConnectionConfig) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(target = "rtc_chat", addr = %listener.local_addr()?, "chat server listening");

    let room = Room::new();
    loop {
        let (stream, peer) = listener.accept().await?;
        let room = Arc::clone(&room);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = admit(stream, peer, config, room).await {
                warn!(target = "rtc_chat", %peer, "peer setup failed: {err:#}");
            }
        });
    }
}

/// Runs the offering side of the handshake for one websocket client.
async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    config: ConnectionConfig,
    room: Arc<Room>,
) -> Result<()> {
    let socket = accept_async(stream)
        .await
        .context("websocket upgrade")?;
    info!(target = "rtc_chat", %peer, "signaling client connected");
    let connection = Connection::recv(WsSignaler::spawn(socket), config)
        .await
        .context("rtc handshake")?;
    let member = room.join(connection);
    info!(target = "rtc_chat", %peer, member, members = room.len(), "peer connected");
    Ok(())
}
