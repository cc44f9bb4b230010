//! Typed channel and event declarations.
//!
//! Channels and events are declared as zero-sized types so that
//! `Connection::emit::<C, E>` only compiles when `E` was declared for `C`:
//!
//! ```
//! use rtc_events::{Channel, ChannelEvent, Event};
//!
//! struct Control;
//! impl Channel for Control {
//!     const LABEL: &'static str = "control";
//! }
//!
//! struct Chat;
//! impl Event for Chat {
//!     const NAME: &'static str = "chat";
//!     type Args = (String,);
//! }
//! impl ChannelEvent<Control> for Chat {}
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A named data channel. `LABEL` must match a key of the connection's
/// channel map.
pub trait Channel: Send + Sync + 'static {
    const LABEL: &'static str;
}

/// A named event and the shape of its arguments.
///
/// `Args` is serialized as a MessagePack array, so tuples line up with
/// positional argument lists from other implementations. Events without
/// arguments use `()`.
pub trait Event: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: Serialize + DeserializeOwned + Send + 'static;
}

/// Marks `Self` as an event that may travel on channel `C`.
pub trait ChannelEvent<C: Channel>: Event {}
