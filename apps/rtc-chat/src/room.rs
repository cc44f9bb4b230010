//! Chat room shared by every peer connected to the server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rtc_events::{Channel, ChannelConfig, ChannelEvent, ChannelMap, Connection, Event};
use tracing::{debug, info};

pub struct DefaultChannel;
impl Channel for DefaultChannel {
    const LABEL: &'static str = "default";
}

/// Client to server: choose a display name.
pub struct SetName;
impl Event for SetName {
    const NAME: &'static str = "setName";
    type Args = (String,);
}
impl ChannelEvent<DefaultChannel> for SetName {}

/// Text typed by a client, or a line the server wants printed.
pub struct ChatMessage;
impl Event for ChatMessage {
    const NAME: &'static str = "message";
    type Args = (String,);
}
impl ChannelEvent<DefaultChannel> for ChatMessage {}

/// Server to client: the name was accepted, start reading input.
pub struct Start;
impl Event for Start {
    const NAME: &'static str = "start";
    type Args = (String,);
}
impl ChannelEvent<DefaultChannel> for Start {}

pub fn channels() -> ChannelMap {
    ChannelMap::from([(DefaultChannel::LABEL.to_string(), ChannelConfig::reliable(0))])
}

struct Member {
    name: Option<String>,
    connection: Arc<Connection>,
}

#[derive(Default)]
pub struct Room {
    members: Mutex<BTreeMap<u64, Member>>,
    next_id: AtomicU64,
}

impl Room {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Adds an established connection and wires its chat events.
    pub fn join(self: &Arc<Self>, connection: Connection) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(connection);

        let room = Arc::downgrade(self);
        connection.on::<DefaultChannel, SetName, _>(move |(name,)| {
            with_room(&room, |room| room.set_name(id, name));
        });
        let room = Arc::downgrade(self);
        connection.on::<DefaultChannel, ChatMessage, _>(move |(text,)| {
            with_room(&room, |room| room.relay(id, &text));
        });
        let room = Arc::downgrade(self);
        connection.add_disconnect_handler(move || {
            with_room(&room, |room| room.leave(id));
        });

        self.members.lock().insert(
            id,
            Member {
                name: None,
                connection,
            },
        );
        debug!(target = "rtc_chat", member = id, "peer joined room");
        id
    }

    fn set_name(&self, id: u64, name: String) {
        let connection = {
            let mut members = self.members.lock();
            let Some(member) = members.get_mut(&id) else {
                return;
            };
            member.name = Some(name.clone());
            Arc::clone(&member.connection)
        };
        info!(target = "rtc_chat", member = id, name = %name, "member named");
        self.broadcast(None, &format!("{name} has joined the chatroom."));
        connection.emit::<DefaultChannel, Start>((name,));
    }

    fn relay(&self, from: u64, text: &str) {
        let name = self.name_of(from);
        self.broadcast(Some(from), &format!("{name}: {text}"));
    }

    /// Removes the member; repeated disconnect notifications are ignored.
    pub fn leave(&self, id: u64) {
        let Some(member) = self.members.lock().remove(&id) else {
            return;
        };
        let name = member.name.unwrap_or_else(|| anonymous(id));
        info!(target = "rtc_chat", member = id, name = %name, "member left");
        self.broadcast(None, &format!("{name} has left the chatroom."));

        let connection = member.connection;
        tokio::spawn(async move {
            if let Err(err) = connection.close().await {
                debug!(target = "rtc_chat", member = id, error = %err, "close after leave failed");
            }
        });
    }

    fn name_of(&self, id: u64) -> String {
        self.members
            .lock()
            .get(&id)
            .and_then(|member| member.name.clone())
            .unwrap_or_else(|| anonymous(id))
    }

    fn broadcast(&self, except: Option<u64>, text: &str) {
        let targets: Vec<Arc<Connection>> = self
            .members
            .lock()
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .map(|(_, member)| Arc::clone(&member.connection))
            .collect();
        for connection in targets {
            connection.emit::<DefaultChannel, ChatMessage>((text.to_string(),));
        }
    }
}

fn anonymous(id: u64) -> String {
    format!("peer-{id}")
}

fn with_room(room: &Weak<Room>, f: impl FnOnce(&Room)) {
    if let Some(room) = room.upgrade() {
        f(&room);
    }
}
