use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// Static description of one pre-negotiated data channel.
///
/// Both peers must hand identical maps to the handshake; the id is what the
/// engine uses to pair channels, there is no in-band announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: u16,
    pub ordered: bool,
    pub reliable: bool,
}

impl ChannelConfig {
    pub fn new(id: u16, ordered: bool, reliable: bool) -> Self {
        Self {
            id,
            ordered,
            reliable,
        }
    }

    /// Ordered, unlimited retransmits.
    pub fn reliable(id: u16) -> Self {
        Self::new(id, true, true)
    }

    /// Unordered, no retransmits.
    pub fn unreliable(id: u16) -> Self {
        Self::new(id, false, false)
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Retransmit limit handed to the engine. `None` means unlimited.
    pub fn max_retransmits(&self) -> Option<u16> {
        if self.reliable { None } else { Some(0) }
    }
}

/// Channel label to configuration. Ordered so channels are created in the
/// same order on both peers.
pub type ChannelMap = BTreeMap<String, ChannelConfig>;

pub(crate) fn validate(channels: &ChannelMap) -> Result<(), ConnectError> {
    if channels.is_empty() {
        return Err(ConnectError::Config(
            "at least one data channel must be configured".into(),
        ));
    }
    let mut ids = HashSet::with_capacity(channels.len());
    for (label, config) in channels {
        if label.is_empty() {
            return Err(ConnectError::Config("channel label must not be empty".into()));
        }
        if !ids.insert(config.id) {
            return Err(ConnectError::Config(format!(
                "channel id {} is used more than once (at {label:?})",
                config.id
            )));
        }
    }
    Ok(())
}
