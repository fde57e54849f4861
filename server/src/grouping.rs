//! Encode-once, fan-out-many packet delivery
//!
//! [`PacketSender::send_grouped`] serializes a packet a single time and hands
//! the same reference-counted buffer to every target connection, so the
//! cost of a broadcast is one encode plus one queue push per recipient.
//!
//! [`PacketGroupingAudience`] layers the usual audience operations (chat,
//! action bar, titles, sounds, boss bars) on top of that for anything that
//! can list its current recipients. Targets are resolved when an operation
//! is invoked, never when the audience value was created.

use bytes::Bytes;
use log::debug;
use shared::{encode_packet, Component, MessageType, Packet, Sound, SoundStop};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bossbar::{BossBar, BossBarManager};
use crate::fault::{BroadcastError, FaultHandler};
use crate::recipient::{Connection, Recipient};

/// Operator switches for packet delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// When false every recipient gets its own encode of each packet
    pub grouped_packets: bool,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            grouped_packets: true,
        }
    }
}

/// Delivery counters for monitoring
#[derive(Debug, Default)]
pub struct BroadcastStats {
    packets_encoded: AtomicU64,
    packets_enqueued: AtomicU64,
    delivery_failures: AtomicU64,
}

impl BroadcastStats {
    pub fn packets_encoded(&self) -> u64 {
        self.packets_encoded.load(Ordering::Relaxed)
    }

    pub fn packets_enqueued(&self) -> u64 {
        self.packets_enqueued.load(Ordering::Relaxed)
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }
}

pub struct PacketSender {
    settings: BroadcastSettings,
    stats: BroadcastStats,
    faults: Arc<dyn FaultHandler>,
}

impl PacketSender {
    pub fn new(settings: BroadcastSettings, faults: Arc<dyn FaultHandler>) -> Self {
        Self {
            settings,
            stats: BroadcastStats::default(),
            faults,
        }
    }

    pub fn settings(&self) -> BroadcastSettings {
        self.settings
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    pub fn faults(&self) -> &Arc<dyn FaultHandler> {
        &self.faults
    }

    fn encode(&self, packet: &Packet) -> Result<Bytes, BroadcastError> {
        self.stats.packets_encoded.fetch_add(1, Ordering::Relaxed);
        Ok(Bytes::from(encode_packet(packet)?))
    }

    fn enqueue(&self, connection: &Connection, payload: Bytes) -> bool {
        match connection.enqueue(payload) {
            Ok(()) => {
                self.stats.packets_enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(fault) => {
                self.report(fault);
                false
            }
        }
    }

    /// Passes a failure to the fault handler
    pub fn report(&self, fault: BroadcastError) {
        self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
        self.faults.handle_fault(fault);
    }

    /// Sends one packet to every connection, encoding it once
    ///
    /// Returns the number of connections the packet was queued for. A closed
    /// connection is reported and skipped; the rest still receive the packet.
    pub fn send_grouped<'a, I>(&self, connections: I, packet: &Packet) -> usize
    where
        I: IntoIterator<Item = &'a Connection>,
    {
        if !self.settings.grouped_packets {
            return connections
                .into_iter()
                .filter(|connection| self.send_to(connection, packet))
                .count();
        }

        let payload = match self.encode(packet) {
            Ok(payload) => payload,
            Err(fault) => {
                self.report(fault);
                return 0;
            }
        };

        connections
            .into_iter()
            .filter(|connection| self.enqueue(connection, payload.clone()))
            .count()
    }

    /// Encodes and sends a packet to a single connection
    pub fn send_to(&self, connection: &Connection, packet: &Packet) -> bool {
        match self.encode(packet) {
            Ok(payload) => self.enqueue(connection, payload),
            Err(fault) => {
                self.report(fault);
                false
            }
        }
    }
}

/// Shared services every audience broadcasts through
pub struct Broadcaster {
    packets: Arc<PacketSender>,
    bossbars: Arc<BossBarManager>,
}

impl Broadcaster {
    pub fn new(packets: Arc<PacketSender>) -> Self {
        let bossbars = Arc::new(BossBarManager::new(Arc::clone(&packets)));
        Self { packets, bossbars }
    }

    pub fn packets(&self) -> &Arc<PacketSender> {
        &self.packets
    }

    pub fn bossbars(&self) -> &Arc<BossBarManager> {
        &self.bossbars
    }
}

/// Title display durations, in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleTimes {
    pub fade_in: u32,
    pub stay: u32,
    pub fade_out: u32,
}

impl Default for TitleTimes {
    fn default() -> Self {
        Self {
            fade_in: 10,
            stay: 70,
            fade_out: 20,
        }
    }
}

/// One independently settable slot of the on-screen title
#[derive(Debug, Clone, PartialEq)]
pub enum TitlePart {
    Title(Component),
    Subtitle(Component),
    Times(TitleTimes),
}

impl TitlePart {
    fn into_packet(self) -> Packet {
        match self {
            TitlePart::Title(text) => Packet::SetTitleText { text },
            TitlePart::Subtitle(text) => Packet::SetSubtitleText { text },
            TitlePart::Times(times) => Packet::SetTitleTimes {
                fade_in: times.fade_in,
                stay: times.stay,
                fade_out: times.fade_out,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub title: Component,
    pub subtitle: Component,
    pub times: Option<TitleTimes>,
}

impl Title {
    pub fn new(title: Component, subtitle: Component) -> Self {
        Self {
            title,
            subtitle,
            times: None,
        }
    }

    pub fn with_times(mut self, times: TitleTimes) -> Self {
        self.times = Some(times);
        self
    }
}

/// Where a played sound is heard from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundEmitter {
    /// Each listener hears the sound from its own position
    Listener,
    /// The sound follows an entity
    Entity(u32),
}

/// Audience operations built on grouped packet delivery
///
/// Implementors only say who the recipients are right now and which
/// [`Broadcaster`] to use.
pub trait PacketGroupingAudience {
    /// The recipients as of this call
    fn recipients(&self) -> Vec<Recipient>;

    fn broadcaster(&self) -> &Broadcaster;

    /// Encodes `packet` once and queues it for every player recipient
    fn send_grouped_packet(&self, packet: &Packet) -> usize {
        let recipients = self.recipients();
        self.broadcaster()
            .packets()
            .send_grouped(recipients.iter().filter_map(Recipient::connection), packet)
    }

    /// Sends a chat line; the console receives it as a log entry
    fn send_message(&self, sender: Option<u32>, message: &Component, message_type: MessageType) {
        let recipients = self.recipients();
        let packets = self.broadcaster().packets();
        let packet = Packet::ChatMessage {
            position: message_type.into(),
            sender,
            message: message.clone(),
        };
        packets.send_grouped(recipients.iter().filter_map(Recipient::connection), &packet);

        for recipient in recipients.iter().filter(|r| r.connection().is_none()) {
            if let Err(fault) = recipient.send_message(sender, message, message_type) {
                packets.report(fault);
            }
        }
    }

    fn send_action_bar(&self, text: &Component) {
        self.send_grouped_packet(&Packet::ActionBar { text: text.clone() });
    }

    fn send_player_list_header_and_footer(&self, header: &Component, footer: &Component) {
        self.send_grouped_packet(&Packet::PlayerListHeaderAndFooter {
            header: header.clone(),
            footer: footer.clone(),
        });
    }

    fn send_title_part(&self, part: TitlePart) {
        self.send_grouped_packet(&part.into_packet());
    }

    /// Sends times (if any), subtitle and title, in that order
    fn show_title(&self, title: &Title) {
        if let Some(times) = title.times {
            self.send_title_part(TitlePart::Times(times));
        }
        self.send_title_part(TitlePart::Subtitle(title.subtitle.clone()));
        self.send_title_part(TitlePart::Title(title.title.clone()));
    }

    fn clear_title(&self) {
        self.send_grouped_packet(&Packet::ClearTitles { reset: false });
    }

    fn reset_title(&self) {
        self.send_grouped_packet(&Packet::ClearTitles { reset: true });
    }

    fn show_boss_bar(&self, bar: &BossBar) {
        self.broadcaster()
            .bossbars()
            .add_viewers(bar, self.recipients());
    }

    fn hide_boss_bar(&self, bar: &BossBar) {
        self.broadcaster()
            .bossbars()
            .remove_viewers(bar, self.recipients());
    }

    fn play_sound_at(&self, sound: &Sound, x: f64, y: f64, z: f64) {
        self.send_grouped_packet(&Packet::SoundEffect {
            sound: sound.clone(),
            x,
            y,
            z,
        });
    }

    fn play_sound_from(&self, sound: &Sound, emitter: SoundEmitter) {
        match emitter {
            SoundEmitter::Entity(entity_id) => {
                self.send_grouped_packet(&Packet::EntitySoundEffect {
                    sound: sound.clone(),
                    entity_id,
                });
            }
            // The packet differs per listener, so it cannot be grouped
            SoundEmitter::Listener => self.play_sound(sound),
        }
    }

    /// Plays a sound at each recipient's own position, one packet each
    fn play_sound(&self, sound: &Sound) {
        let recipients = self.recipients();
        debug!("Playing {} individually for {} recipients", sound.name, recipients.len());
        let packets = self.broadcaster().packets();
        for recipient in &recipients {
            if let Err(fault) = recipient.play_sound_at_self(sound) {
                packets.report(fault);
            }
        }
    }

    fn stop_sound(&self, stop: &SoundStop) {
        self.send_grouped_packet(&Packet::StopSound {
            source: stop.source,
            name: stop.name.clone(),
        });
    }
}
