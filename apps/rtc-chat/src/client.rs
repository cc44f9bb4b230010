use std::sync::Arc;

use anyhow::{Context, Result};
use rtc_events::{Connection, ConnectionConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};

use crate::room::{ChatMessage, DefaultChannel, SetName, Start};
use crate::ws::WsSignaler;

pub async fn run(url: &str, name: Option<String>, config: ConnectionConfig) -> Result<()> {
    let (socket, _) = connect_async(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let connection = Connection::call(WsSignaler::spawn(socket), config)
        .await
        .context("rtc handshake")?;
    info!(target = "rtc_chat", "connected to room");

    connection.on::<DefaultChannel, ChatMessage, _>(|(text,)| println!("{text}"));
    let (started_tx, mut started) = mpsc::unbounded_channel();
    connection.on::<DefaultChannel, Start, _>(move |(name,)| {
        let _ = started_tx.send(name);
    });
    let gone = Arc::new(Notify::new());
    {
        let gone = Arc::clone(&gone);
        connection.add_disconnect_handler(move || gone.notify_one());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let name = match name {
        Some(name) => name,
        None => {
            prompt("What is your name? ").await?;
            lines.next_line().await?.unwrap_or_default()
        }
    };
    connection.emit::<DefaultChannel, SetName>((name,));

    let name = tokio::select! {
        name = started.recv() => name.context("room closed before start")?,
        _ = gone.notified() => {
            info!(target = "rtc_chat", "disconnected from room");
            return Ok(());
        }
    };
    debug!(target = "rtc_chat", name = %name, "room accepted name");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                connection.emit::<DefaultChannel, ChatMessage>((line,));
            }
            _ = gone.notified() => {
                info!(target = "rtc_chat", "disconnected from room");
                return Ok(());
            }
        }
    }

    connection.close().await?;
    Ok(())
}

async fn prompt(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
