//! Wire framing for events.
//!
//! A frame is the MessagePack map `{event, data}` where `data` carries the
//! event arguments as an array, optionally wrapped in a zstd stream. Both
//! peers must agree on compression. Zero-argument events travel as
//! `data: []`; a `nil` payload is still accepted on decode.

use std::borrow::Cow;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd {
        level: i32,
    },
}

impl Compression {
    pub fn zstd() -> Self {
        Compression::Zstd {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

const FIXMAP_2: u8 = 0x82;
const NIL: u8 = 0xc0;
const EMPTY_ARRAY: u8 = 0x90;

#[derive(Deserialize)]
struct EnvelopeHead {
    event: String,
}

#[derive(Deserialize)]
struct InboundEnvelope<A> {
    event: String,
    data: A,
}

/// Matches only `data: []`.
type EmptyArgs = [(); 0];

/// Encodes and decodes frames for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Codec {
    compression: Compression,
}

impl Codec {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn encode<A: Serialize + ?Sized>(&self, event: &str, args: &A) -> Result<Bytes, FrameError> {
        let data = rmp_serde::to_vec_named(args)?;
        let mut raw = Vec::with_capacity(event.len() + data.len() + 16);
        raw.push(FIXMAP_2);
        raw.extend(rmp_serde::to_vec("event")?);
        raw.extend(rmp_serde::to_vec(event)?);
        raw.extend(rmp_serde::to_vec("data")?);
        if data == [NIL] {
            raw.push(EMPTY_ARRAY);
        } else {
            raw.extend(data);
        }
        let payload = match self.compression {
            Compression::None => raw,
            Compression::Zstd { level } => zstd::encode_all(raw.as_slice(), level)?,
        };
        Ok(Bytes::from(payload))
    }

    /// Undoes transport compression, yielding the raw MessagePack frame.
    pub fn open<'a>(&self, payload: &'a [u8]) -> Result<Cow<'a, [u8]>, FrameError> {
        match self.compression {
            Compression::None => Ok(Cow::Borrowed(payload)),
            Compression::Zstd { .. } => Ok(Cow::Owned(zstd::decode_all(payload)?)),
        }
    }
}

/// Reads only the event name of an uncompressed frame.
pub fn event_name(frame: &[u8]) -> Result<String, FrameError> {
    let head: EnvelopeHead = rmp_serde::from_slice(frame)?;
    Ok(head.event)
}

/// Decodes the arguments of an uncompressed frame if it carries `event`.
///
/// Returns `Ok(None)` for frames of other events without touching their
/// arguments, so a listener never fails on payloads it does not own.
pub fn decode_args<A: DeserializeOwned>(frame: &[u8], event: &str) -> Result<Option<A>, FrameError> {
    if event_name(frame)? != event {
        return Ok(None);
    }
    match rmp_serde::from_slice::<InboundEnvelope<A>>(frame) {
        Ok(envelope) => Ok(Some(envelope.data)),
        Err(err) => {
            // `[]` carries no arguments; retry as the unit payload.
            if rmp_serde::from_slice::<InboundEnvelope<EmptyArgs>>(frame).is_err() {
                return Err(err.into());
            }
            rmp_serde::from_slice::<A>(&[NIL])
                .map(Some)
                .map_err(|_| err.into())
        }
    }
}
