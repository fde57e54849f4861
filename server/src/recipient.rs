//! Message recipients and the connection handles behind them
//!
//! A recipient is either a connected player or the operator console. Players
//! own a [`Connection`], a cheap cloneable handle that hands already-encoded
//! packets to the transport's outbound queue. The console has no connection;
//! it only understands chat, which it writes to the server log.

use bytes::Bytes;
use log::info;
use shared::{encode_packet, ChatPosition, Component, MessageType, Packet, Sound};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::fault::BroadcastError;

/// An encoded packet waiting for the sender task
#[derive(Debug, Clone)]
pub struct Outbound {
    pub addr: SocketAddr,
    pub payload: Bytes,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Handle to one client's outbound queue
///
/// Enqueueing never blocks. Packets queued through the same handle are
/// delivered in the order they were queued.
#[derive(Debug, Clone)]
pub struct Connection {
    player_id: u32,
    addr: SocketAddr,
    outbound: OutboundSender,
}

impl Connection {
    pub fn new(player_id: u32, addr: SocketAddr, outbound: OutboundSender) -> Self {
        Self {
            player_id,
            addr,
            outbound,
        }
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Hands an encoded packet to the transport
    pub fn enqueue(&self, payload: Bytes) -> Result<(), BroadcastError> {
        self.outbound
            .send(Outbound {
                addr: self.addr,
                payload,
            })
            .map_err(|_| BroadcastError::ConnectionClosed {
                player_id: self.player_id,
            })
    }
}

/// A connected player
#[derive(Debug)]
pub struct Player {
    id: u32,
    name: String,
    entity_id: u32,
    connection: Connection,
    last_seen: Mutex<Instant>,
}

impl Player {
    pub fn new(id: u32, name: impl Into<String>, entity_id: u32, connection: Connection) -> Self {
        Self {
            id,
            name: name.into(),
            entity_id,
            connection,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_id(&self) -> u32 {
        self.entity_id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Marks the player as active right now
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            > timeout
    }
}

/// The operator console
#[derive(Debug, Default)]
pub struct Console;

impl Console {
    pub fn new() -> Self {
        Self
    }

    pub fn send_message(&self, position: ChatPosition, sender: Option<u32>, message: &Component) {
        match sender {
            Some(sender) => info!(
                target: "console",
                "[{:?}] <{}> {}",
                position,
                sender,
                message.plain_text()
            ),
            None => info!(target: "console", "[{:?}] {}", position, message.plain_text()),
        }
    }
}

/// Identity of a recipient, used for equality and hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecipientId {
    Player(u32),
    Console,
}

#[derive(Debug, Clone)]
pub enum Recipient {
    Player(Arc<Player>),
    Console(Arc<Console>),
}

impl Recipient {
    pub fn id(&self) -> RecipientId {
        match self {
            Recipient::Player(player) => RecipientId::Player(player.id()),
            Recipient::Console(_) => RecipientId::Console,
        }
    }

    pub fn as_player(&self) -> Option<&Arc<Player>> {
        match self {
            Recipient::Player(player) => Some(player),
            Recipient::Console(_) => None,
        }
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.as_player().map(|player| player.connection())
    }

    /// Encodes and queues a packet for this recipient alone
    ///
    /// The console silently ignores packets.
    pub fn send_packet(&self, packet: &Packet) -> Result<(), BroadcastError> {
        match self.connection() {
            Some(connection) => connection.enqueue(Bytes::from(encode_packet(packet)?)),
            None => Ok(()),
        }
    }

    pub fn send_message(
        &self,
        sender: Option<u32>,
        message: &Component,
        message_type: MessageType,
    ) -> Result<(), BroadcastError> {
        let position = ChatPosition::from(message_type);
        match self {
            Recipient::Player(_) => self.send_packet(&Packet::ChatMessage {
                position,
                sender,
                message: message.clone(),
            }),
            Recipient::Console(console) => {
                console.send_message(position, sender, message);
                Ok(())
            }
        }
    }

    /// Plays a sound that each player hears as coming from itself
    pub fn play_sound_at_self(&self, sound: &Sound) -> Result<(), BroadcastError> {
        match self {
            Recipient::Player(player) => self.send_packet(&Packet::EntitySoundEffect {
                sound: sound.clone(),
                entity_id: player.entity_id(),
            }),
            Recipient::Console(_) => Ok(()),
        }
    }
}

impl PartialEq for Recipient {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Recipient {}

impl Hash for Recipient {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl From<Arc<Player>> for Recipient {
    fn from(player: Arc<Player>) -> Self {
        Recipient::Player(player)
    }
}

impl From<Arc<Console>> for Recipient {
    fn from(console: Arc<Console>) -> Self {
        Recipient::Console(console)
    }
}
