use serde::{Deserialize, Serialize};
use thiserror::Error;

mod tracker;

pub use tracker::{BossBarTracker, BossBarView, TrackerError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const TICKS_PER_SECOND: u32 = 20;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(packet)?)
}

pub fn decode_packet(data: &[u8]) -> Result<Packet, ProtocolError> {
    Ok(bincode::deserialize(data)?)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
        name: String,
    },
    Heartbeat,
    Disconnect,

    Connected {
        client_id: u32,
        entity_id: u32,
    },
    Disconnected {
        reason: String,
    },
    ChatMessage {
        position: ChatPosition,
        sender: Option<u32>,
        message: Component,
    },
    ActionBar {
        text: Component,
    },
    PlayerListHeaderAndFooter {
        header: Component,
        footer: Component,
    },
    SetTitleText {
        text: Component,
    },
    SetSubtitleText {
        text: Component,
    },
    SetTitleTimes {
        fade_in: u32,
        stay: u32,
        fade_out: u32,
    },
    ClearTitles {
        reset: bool,
    },
    SoundEffect {
        sound: Sound,
        x: f64,
        y: f64,
        z: f64,
    },
    EntitySoundEffect {
        sound: Sound,
        entity_id: u32,
    },
    StopSound {
        source: Option<SoundSource>,
        name: Option<String>,
    },
    BossBar {
        id: u64,
        action: BossBarAction,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum BossBarAction {
    Add {
        title: Component,
        progress: f32,
        color: BossBarColor,
        overlay: BossBarOverlay,
        flags: BossBarFlags,
    },
    Remove,
    UpdateProgress {
        progress: f32,
    },
    UpdateTitle {
        title: Component,
    },
    UpdateStyle {
        color: BossBarColor,
        overlay: BossBarOverlay,
    },
    UpdateFlags {
        added: BossBarFlags,
        removed: BossBarFlags,
    },
}

/// Where a chat line is displayed on the client.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ChatPosition {
    Chat,
    SystemMessage,
    GameInfo,
}

/// Classification of a message by whoever produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Chat,
    System,
}

impl From<MessageType> for ChatPosition {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Chat => ChatPosition::Chat,
            MessageType::System => ChatPosition::SystemMessage,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextColor {
    White,
    Gray,
    Red,
    Gold,
    Yellow,
    Green,
    Aqua,
    Blue,
    LightPurple,
}

/// Formatted text: a styled run of text followed by styled children.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Component {
    pub text: String,
    pub color: Option<TextColor>,
    pub bold: bool,
    pub extra: Vec<Component>,
}

impl Component {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn color(mut self, color: TextColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn append(mut self, child: Component) -> Self {
        self.extra.push(child);
        self
    }

    /// Flattens the component tree into unstyled text
    pub fn plain_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.extra {
            out.push_str(&child.plain_text());
        }
        out
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BossBarColor {
    Pink,
    Blue,
    Red,
    Green,
    Yellow,
    Purple,
    White,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BossBarOverlay {
    Progress,
    Notched6,
    Notched10,
    Notched12,
    Notched20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BossBarFlag {
    DarkenSky,
    PlayMusic,
    CreateFog,
}

impl BossBarFlag {
    pub const ALL: [BossBarFlag; 3] = [
        BossBarFlag::DarkenSky,
        BossBarFlag::PlayMusic,
        BossBarFlag::CreateFog,
    ];

    fn bit(self) -> u8 {
        match self {
            BossBarFlag::DarkenSky => 0x01,
            BossBarFlag::PlayMusic => 0x02,
            BossBarFlag::CreateFog => 0x04,
        }
    }
}

/// Set of boss bar flags, packed into a single byte on the wire
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BossBarFlags(u8);

impl BossBarFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: BossBarFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: BossBarFlag) -> bool {
        let had = self.contains(flag);
        self.0 |= flag.bit();
        !had
    }

    pub fn remove(&mut self, flag: BossBarFlag) -> bool {
        let had = self.contains(flag);
        self.0 &= !flag.bit();
        had
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = BossBarFlag> {
        BossBarFlag::ALL
            .into_iter()
            .filter(move |flag| self.contains(*flag))
    }
}

impl FromIterator<BossBarFlag> for BossBarFlags {
    fn from_iter<I: IntoIterator<Item = BossBarFlag>>(iter: I) -> Self {
        let mut flags = Self::empty();
        for flag in iter {
            flags.insert(flag);
        }
        flags
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundSource {
    Master,
    Music,
    Record,
    Weather,
    Block,
    Hostile,
    Neutral,
    Player,
    Ambient,
    Voice,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Sound {
    pub name: String,
    pub source: SoundSource,
    pub volume: f32,
    pub pitch: f32,
}

impl Sound {
    pub fn new(name: impl Into<String>, source: SoundSource, volume: f32, pitch: f32) -> Self {
        Self {
            name: name.into(),
            source,
            volume,
            pitch,
        }
    }
}

/// Selects which playing sounds a client should stop
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoundStop {
    pub source: Option<SoundSource>,
    pub name: Option<String>,
}

impl SoundStop {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn source(source: SoundSource) -> Self {
        Self {
            source: Some(source),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            source: None,
            name: Some(name.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_component_plain_text() {
        let component = Component::text("Round ")
            .color(TextColor::Gold)
            .append(Component::text("3").bold());
        assert_eq!(component.plain_text(), "Round 3");
        assert_eq!(component.color, Some(TextColor::Gold));
        assert!(component.extra[0].bold);
    }

    #[test]
    fn test_flags_insert_remove() {
        let mut flags = BossBarFlags::empty();
        assert!(flags.insert(BossBarFlag::DarkenSky));
        assert!(!flags.insert(BossBarFlag::DarkenSky));
        assert!(flags.contains(BossBarFlag::DarkenSky));
        assert!(!flags.contains(BossBarFlag::CreateFog));

        assert!(flags.remove(BossBarFlag::DarkenSky));
        assert!(!flags.remove(BossBarFlag::DarkenSky));
        assert!(flags.is_empty());
    }

    #[test]
    fn test_flags_set_operations() {
        let a: BossBarFlags = [BossBarFlag::DarkenSky, BossBarFlag::PlayMusic]
            .into_iter()
            .collect();
        let b: BossBarFlags = [BossBarFlag::PlayMusic, BossBarFlag::CreateFog]
            .into_iter()
            .collect();

        assert_eq!(a.union(b).bits(), 0x07);
        assert_eq!(a.difference(b).iter().collect::<Vec<_>>(), vec![BossBarFlag::DarkenSky]);
    }

    #[test]
    fn test_message_type_to_position() {
        assert_eq!(ChatPosition::from(MessageType::Chat), ChatPosition::Chat);
        assert_eq!(
            ChatPosition::from(MessageType::System),
            ChatPosition::SystemMessage
        );
    }

    #[test]
    fn test_packet_serialization_boss_bar_add() {
        let packet = Packet::BossBar {
            id: 7,
            action: BossBarAction::Add {
                title: Component::text("Lobby"),
                progress: 0.25,
                color: BossBarColor::Blue,
                overlay: BossBarOverlay::Notched10,
                flags: BossBarFlags::empty(),
            },
        };

        let serialized = encode_packet(&packet).unwrap();
        let deserialized = decode_packet(&serialized).unwrap();

        match deserialized {
            Packet::BossBar {
                id,
                action: BossBarAction::Add {
                    progress, overlay, ..
                },
            } => {
                assert_eq!(id, 7);
                assert_approx_eq!(progress, 0.25, 0.0001);
                assert_eq!(overlay, BossBarOverlay::Notched10);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_flags_diff_direction_is_distinguishable() {
        let darken: BossBarFlags = std::iter::once(BossBarFlag::DarkenSky).collect();
        let added = Packet::BossBar {
            id: 1,
            action: BossBarAction::UpdateFlags {
                added: darken,
                removed: BossBarFlags::empty(),
            },
        };
        let removed = Packet::BossBar {
            id: 1,
            action: BossBarAction::UpdateFlags {
                added: BossBarFlags::empty(),
                removed: darken,
            },
        };

        let added_bytes = encode_packet(&added).unwrap();
        let removed_bytes = encode_packet(&removed).unwrap();
        assert_ne!(added_bytes, removed_bytes);

        assert_eq!(decode_packet(&added_bytes).unwrap(), added);
        assert_eq!(decode_packet(&removed_bytes).unwrap(), removed);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_packet(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
