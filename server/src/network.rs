//! Server network layer handling UDP communications and the lobby loop

use crate::audience::{Audience, AudienceProvider};
use crate::directory::ConnectionDirectory;
use crate::fault::{run_async, FaultHandler, LoggingFaultHandler};
use crate::game::GameState;
use crate::grouping::{BroadcastSettings, Broadcaster, PacketGroupingAudience, PacketSender};
use crate::recipient::{Console, Outbound, OutboundReceiver, OutboundSender, Player, Recipient};
use crate::registry::{AudienceRegistry, GroupKey, DEFAULT_NAMESPACE};
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::{
    decode_packet, encode_packet, Component, MessageType, Packet, PROTOCOL_VERSION,
    TICKS_PER_SECOND,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

pub const LOBBY_GROUP: &str = "lobby";

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    /// The player has already been removed from the directory
    ClientTimeout {
        player: Arc<Player>,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Runtime settings for [`Server`]
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub tick_duration: Duration,
    pub max_players: usize,
    pub client_timeout: Duration,
    pub countdown_seconds: u32,
    pub settings: BroadcastSettings,
}

impl ServerOptions {
    pub fn ticks_per_second(&self) -> u32 {
        let millis = self.tick_duration.as_millis().max(1) as u32;
        (1000 / millis).max(1)
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(1000 / TICKS_PER_SECOND as u64),
            max_players: 32,
            client_timeout: Duration::from_secs(5),
            countdown_seconds: 10,
            settings: BroadcastSettings::default(),
        }
    }
}

/// Main server coordinating networking and the lobby
pub struct Server {
    socket: Arc<UdpSocket>,
    directory: Arc<ConnectionDirectory>,
    audiences: AudienceProvider,
    lobby: GroupKey,
    game_state: GameState,
    faults: Arc<dyn FaultHandler>,
    options: ServerOptions,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: OutboundSender,
    outbound_rx: Option<OutboundReceiver>,
}

impl Server {
    pub async fn new(
        addr: &str,
        options: ServerOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let faults: Arc<dyn FaultHandler> = Arc::new(LoggingFaultHandler);
        let packets = Arc::new(PacketSender::new(options.settings, Arc::clone(&faults)));
        let directory = Arc::new(ConnectionDirectory::new(options.max_players));
        let audiences = AudienceProvider::new(
            Arc::clone(&directory),
            Arc::new(Console::new()),
            Arc::new(AudienceRegistry::new()),
            Arc::new(Broadcaster::new(packets)),
        );

        if !options.settings.grouped_packets {
            info!("Packet grouping disabled, every recipient gets its own encode");
        }

        Ok(Server {
            socket,
            directory,
            audiences,
            lobby: GroupKey::new(DEFAULT_NAMESPACE, LOBBY_GROUP)?,
            game_state: GameState::new(options.countdown_seconds, options.ticks_per_second()),
            faults,
            options,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn audiences(&self) -> &AudienceProvider {
        &self.audiences
    }

    fn lobby(&self) -> Audience {
        self.audiences.custom(&self.lobby)
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode_packet(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the shared outbound queue onto the socket
    fn spawn_network_sender(&mut self) {
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            warn!("Network sender already running");
            return;
        };
        let socket = Arc::clone(&self.socket);

        run_async(Arc::clone(&self.faults), async move {
            while let Some(Outbound { addr, payload }) = outbound_rx.recv().await {
                if let Err(e) = socket.send_to(&payload, addr).await {
                    warn!("Failed to send {} bytes to {}: {}", payload.len(), addr, e);
                }
            }
            Ok(())
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let directory = Arc::clone(&self.directory);
        let server_tx = self.server_tx.clone();
        let timeout = self.options.client_timeout;

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                for player in directory.sweep_timeouts(timeout) {
                    info!("Player {} timed out", player.id());
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { player }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Sends a packet to an address that has no player behind it
    fn send_unconnected(&self, packet: &Packet, addr: SocketAddr) {
        let payload = match encode_packet(packet) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                error!("Failed to encode packet for {}: {}", addr, e);
                return;
            }
        };
        if let Err(e) = self.outbound_tx.send(Outbound { addr, payload }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes incoming packets
    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                name,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    name, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_unconnected(&response, addr);
                    return;
                }

                // Remove existing connection if present
                if let Some(existing) = self.directory.find_by_addr(addr) {
                    info!("Removing existing player {} from {}", existing.id(), addr);
                    if let Some(player) = self.directory.disconnect(existing.id()) {
                        self.remove_player(player);
                    }
                }

                match self.directory.connect(&name, addr, self.outbound_tx.clone()) {
                    Some(player) => self.add_player(player),
                    None => {
                        let response = Packet::Disconnected {
                            reason: "Server full".to_string(),
                        };
                        self.send_unconnected(&response, addr);
                    }
                }
            }

            Packet::Heartbeat => match self.directory.find_by_addr(addr) {
                Some(player) => player.touch(),
                None => debug!("Heartbeat from unknown address {}", addr),
            },

            Packet::Disconnect => {
                let player = self
                    .directory
                    .find_by_addr(addr)
                    .and_then(|player| self.directory.disconnect(player.id()));

                if let Some(player) = player {
                    self.remove_player(player);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    fn add_player(&mut self, player: Arc<Player>) {
        let response = Packet::Connected {
            client_id: player.id(),
            entity_id: player.entity_id(),
        };
        self.audiences
            .broadcaster()
            .packets()
            .send_to(player.connection(), &response);

        let recipient = Recipient::Player(Arc::clone(&player));
        self.audiences
            .registry()
            .register(&self.lobby, recipient.clone());

        let lobby = self.lobby();
        self.game_state.add_player(&lobby, recipient);
        lobby.send_message(
            None,
            &Component::text(format!("{} joined the lobby", player.name())),
            MessageType::System,
        );
    }

    /// Drops a player that has left the directory from every group and bar
    fn remove_player(&mut self, player: Arc<Player>) {
        let recipient = Recipient::Player(Arc::clone(&player));
        let groups = self.audiences.registry().unregister_all(&recipient);
        let bars = self
            .audiences
            .broadcaster()
            .bossbars()
            .remove_all(&recipient);
        debug!(
            "Player {} left {} groups and {} boss bars",
            player.id(),
            groups.len(),
            bars.len()
        );

        self.lobby().send_message(
            None,
            &Component::text(format!("{} left the lobby", player.name())),
            MessageType::System,
        );
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.options.tick_duration);
        let mut last_tick = Instant::now();
        let monitor_every = self.options.ticks_per_second() * 5;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        },
                        Some(ServerMessage::ClientTimeout { player }) => {
                            self.remove_player(player);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    let lobby = self.lobby();
                    self.game_state.tick(&lobby);

                    // Periodic performance monitoring
                    if self.game_state.tick % monitor_every == 0 && !self.directory.is_empty() {
                        let stats = self.audiences.broadcaster().packets().stats();
                        debug!(
                            "Tick {}: {} players, {:.1}Hz, {} encoded, {} enqueued, {} failed",
                            self.game_state.tick,
                            self.directory.len(),
                            1.0 / dt.max(f32::EPSILON),
                            stats.packets_encoded(),
                            stats.packets_enqueued(),
                            stats.delivery_failures()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::BossBarAction;
    use std::net::{IpAddr, Ipv4Addr};

    async fn test_server(max_players: usize) -> Server {
        let options = ServerOptions {
            max_players,
            ..ServerOptions::default()
        };
        Server::new("127.0.0.1:0", options).await.unwrap()
    }

    fn drain(server: &mut Server) -> Vec<(SocketAddr, Packet)> {
        let rx = server.outbound_rx.as_mut().unwrap();
        let mut packets = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            packets.push((outbound.addr, decode_packet(&outbound.payload).unwrap()));
        }
        packets
    }

    fn client_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn connect(name: &str) -> Packet {
        Packet::Connect {
            client_version: PROTOCOL_VERSION,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_server_message_creation() {
        let packet = connect("alice");
        let addr = client_addr(8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_default_options() {
        let options = ServerOptions::default();
        assert_eq!(options.ticks_per_second(), TICKS_PER_SECOND);
        assert!(options.settings.grouped_packets);

        let slow = ServerOptions {
            tick_duration: Duration::from_secs(2),
            ..ServerOptions::default()
        };
        assert_eq!(slow.ticks_per_second(), 1);
    }

    #[tokio::test]
    async fn test_connect_joins_lobby() {
        let mut server = test_server(4).await;
        let addr = client_addr(30001);

        server.handle_packet(connect("alice"), addr);

        let packets = drain(&mut server);
        assert!(packets.iter().all(|(a, _)| *a == addr));
        match packets.as_slice() {
            [(_, Packet::Connected { client_id, .. }), (_, Packet::BossBar { action: BossBarAction::Add { .. }, .. }), (_, Packet::ChatMessage { message, .. })] =>
            {
                assert_eq!(*client_id, 1);
                assert_eq!(message.plain_text(), "alice joined the lobby");
            }
            other => panic!("Unexpected packets: {:?}", other),
        }
        assert_eq!(server.lobby().len(), 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let mut server = test_server(4).await;
        let addr = client_addr(30002);

        server.handle_packet(
            Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
                name: "old".to_string(),
            },
            addr,
        );

        assert_eq!(
            drain(&mut server),
            vec![(
                addr,
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string()
                }
            )]
        );
        assert!(server.directory.is_empty());
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut server = test_server(1).await;
        server.handle_packet(connect("alice"), client_addr(30003));
        drain(&mut server);

        let late = client_addr(30004);
        server.handle_packet(connect("bob"), late);

        assert_eq!(
            drain(&mut server),
            vec![(
                late,
                Packet::Disconnected {
                    reason: "Server full".to_string()
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_reconnect_replaces_existing_player() {
        let mut server = test_server(4).await;
        let addr = client_addr(30005);

        server.handle_packet(connect("alice"), addr);
        server.handle_packet(connect("alice"), addr);

        assert_eq!(server.directory.len(), 1);
        assert_eq!(server.directory.find_by_addr(addr).unwrap().id(), 2);
        assert_eq!(server.lobby().len(), 1);
        assert_eq!(server.audiences.broadcaster().bossbars().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let mut server = test_server(4).await;
        let alice = client_addr(30006);
        let bob = client_addr(30007);
        server.handle_packet(connect("alice"), alice);
        server.handle_packet(connect("bob"), bob);
        drain(&mut server);

        server.handle_packet(Packet::Disconnect, alice);

        assert_eq!(server.directory.len(), 1);
        assert_eq!(server.lobby().len(), 1);
        let bar = server.game_state.bar().clone();
        let viewers = server.audiences.broadcaster().bossbars().viewers_of(&bar);
        assert_eq!(viewers.len(), 1);

        // Only bob hears about it, and alice's bar is not removed with a packet
        let packets = drain(&mut server);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].0, bob);
    }

    #[tokio::test]
    async fn test_heartbeat_and_unexpected_packets() {
        let mut server = test_server(4).await;
        let addr = client_addr(30008);
        server.handle_packet(connect("alice"), addr);
        drain(&mut server);

        server.handle_packet(Packet::Heartbeat, addr);
        server.handle_packet(Packet::Heartbeat, client_addr(30009));
        server.handle_packet(Packet::ClearTitles { reset: true }, addr);

        assert!(drain(&mut server).is_empty());
        assert_eq!(server.directory.len(), 1);
    }

    #[test]
    fn test_address_validation() {
        let valid_addrs = vec!["127.0.0.1:8080", "0.0.0.0:0", "[::1]:8080"];
        for addr_str in valid_addrs {
            assert!(addr_str.parse::<SocketAddr>().is_ok(), "Failed to parse address: {}", addr_str);
        }

        let invalid_addrs = vec!["invalid", "127.0.0.1:99999", ""];
        for addr_str in invalid_addrs {
            assert!(addr_str.parse::<SocketAddr>().is_err(), "Should fail to parse: {}", addr_str);
        }
    }
}
