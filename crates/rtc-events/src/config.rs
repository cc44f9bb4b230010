use std::env;

use serde::{Deserialize, Serialize};

use crate::channel::{self, ChannelConfig, ChannelMap};
use crate::error::ConnectError;
use crate::frame::Compression;

/// Comma-separated STUN/TURN urls replacing the default STUN server.
pub const ICE_SERVERS_ENV: &str = "RTC_EVENTS_ICE_SERVERS";
/// When set, no ICE servers are configured (host candidates only).
pub const DISABLE_STUN_ENV: &str = "RTC_EVENTS_DISABLE_STUN";

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Default::default()
        }
    }
}

/// Everything a peer needs to bring up a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub ice_servers: Vec<IceServer>,
    pub channels: ChannelMap,
    pub compression: Compression,
}

impl ConnectionConfig {
    /// Uses ICE servers from the environment, falling back to public STUN.
    pub fn new(channels: ChannelMap) -> Self {
        Self {
            ice_servers: ice_servers_from_env(),
            channels,
            compression: Compression::None,
        }
    }

    /// No ICE servers; only host candidates are gathered.
    pub fn localhost(channels: ChannelMap) -> Self {
        Self {
            ice_servers: Vec::new(),
            channels,
            compression: Compression::None,
        }
    }

    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> Result<(), ConnectError> {
        channel::validate(&self.channels)
    }
}

fn ice_servers_from_env() -> Vec<IceServer> {
    if env::var(DISABLE_STUN_ENV).is_ok() {
        return Vec::new();
    }
    match env::var(ICE_SERVERS_ENV) {
        Ok(raw) => {
            let urls: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
            if urls.is_empty() {
                Vec::new()
            } else {
                vec![IceServer::new(urls)]
            }
        }
        Err(_) => vec![IceServer::new(vec![DEFAULT_STUN_URL.to_string()])],
    }
}

pub struct ConnectionConfigBuilder {
    ice_servers: Option<Vec<IceServer>>,
    channels: ChannelMap,
    compression: Compression,
}

impl ConnectionConfigBuilder {
    pub fn new() -> Self {
        Self {
            ice_servers: None,
            channels: ChannelMap::new(),
            compression: Compression::None,
        }
    }

    pub fn channel(mut self, label: impl Into<String>, config: ChannelConfig) -> Self {
        self.channels.insert(label.into(), config);
        self
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers
            .get_or_insert_with(Vec::new)
            .push(IceServer::new(urls));
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.get_or_insert_with(Vec::new).push(IceServer {
            urls,
            username,
            credential,
        });
        self
    }

    /// Gather host candidates only, ignoring the environment.
    pub fn without_ice_servers(mut self) -> Self {
        self.ice_servers = Some(Vec::new());
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, ConnectError> {
        channel::validate(&self.channels)?;
        Ok(ConnectionConfig {
            ice_servers: self.ice_servers.unwrap_or_else(ice_servers_from_env),
            channels: self.channels,
            compression: self.compression,
        })
    }
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
