mod client;
mod room;
mod server;
mod ws;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rtc_events::{ConnectionConfig, IceServer};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtc-chat")]
#[command(about = "Peer-to-peer chat room over WebRTC data channels")]
struct Cli {
    /// STUN/TURN urls, overriding RTC_EVENTS_ICE_SERVERS
    #[arg(long = "ice-server", env = "RTC_CHAT_ICE_SERVERS", value_delimiter = ',', global = true)]
    ice_servers: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept peers over websocket signaling and host the room
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        listen: String,
    },
    /// Connect to a room
    Join {
        #[arg(short, long, default_value = "ws://127.0.0.1:8000")]
        url: String,

        /// Display name; prompted for when omitted
        #[arg(short, long)]
        name: Option<String>,
    },
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(room::channels());
        if !self.ice_servers.is_empty() {
            config.ice_servers = vec![IceServer::new(self.ice_servers.clone())];
        }
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.connection_config();

    match cli.command {
        Command::Serve { listen } => server::run(&listen, config).await,
        Command::Join { url, name } => client::run(&url, name, config).await,
    }
}
