//! Directory of connected players
//!
//! This module tracks which players are currently connected:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Capacity management and address lookup
//! - Live and snapshot views of the online player set
//!
//! The player map is copy-on-write. Readers load the current map without
//! taking a lock, so a broadcast resolving its targets never waits on a
//! connect or disconnect. Writers serialize among themselves and publish a
//! new map in a single store, so no reader ever sees half of a change.

use arc_swap::ArcSwap;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::recipient::{Connection, OutboundSender, Player};

/// Entity ids are allocated above this offset so they never collide with
/// player ids in logs
pub const ENTITY_ID_BASE: u32 = 10_000;

pub struct ConnectionDirectory {
    /// Connected players indexed by their unique ID
    players: ArcSwap<HashMap<u32, Arc<Player>>>,
    /// Serializes writers; readers never touch it
    write_lock: Mutex<()>,
    /// Next available player ID for new connections
    next_player_id: AtomicU32,
    /// Maximum number of concurrent players allowed
    max_players: usize,
}

impl ConnectionDirectory {
    /// Creates an empty directory with the given capacity
    ///
    /// Player IDs start from 1 and increment for each new connection.
    pub fn new(max_players: usize) -> Self {
        Self {
            players: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            next_player_id: AtomicU32::new(1),
            max_players,
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Accepts a new connection
    ///
    /// Returns `None` if the server is at capacity. The player's connection
    /// shares `outbound` with every other player of this server.
    pub fn connect(
        &self,
        name: &str,
        addr: SocketAddr,
        outbound: OutboundSender,
    ) -> Option<Arc<Player>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.players.load().len() >= self.max_players {
            return None;
        }

        let id = self.next_player_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(id, addr, outbound);
        let player = Arc::new(Player::new(id, name, ENTITY_ID_BASE + id, connection));
        self.publish_insert(Arc::clone(&player));

        info!("Player {} ({}) connected from {}", id, name, addr);
        Some(player)
    }

    /// Adds an already constructed player, subject to the capacity limit
    ///
    /// Returns false if the directory is full or the ID is taken.
    pub fn insert(&self, player: Arc<Player>) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.players.load();
        if current.len() >= self.max_players || current.contains_key(&player.id()) {
            return false;
        }
        self.publish_insert(player);
        true
    }

    fn publish_insert(&self, player: Arc<Player>) {
        let mut next = HashMap::clone(&self.players.load());
        next.insert(player.id(), player);
        self.players.store(Arc::new(next));
    }

    /// Removes a player, returning it if it was connected
    pub fn disconnect(&self, player_id: u32) -> Option<Arc<Player>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.players.load();
        if !current.contains_key(&player_id) {
            return None;
        }

        let mut next = HashMap::clone(&current);
        let removed = next.remove(&player_id);
        self.players.store(Arc::new(next));

        if let Some(player) = &removed {
            info!("Player {} ({}) disconnected", player.id(), player.name());
        }
        removed
    }

    pub fn get(&self, player_id: u32) -> Option<Arc<Player>> {
        self.players.load().get(&player_id).cloned()
    }

    /// Finds a player by the address its packets arrive from
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<Arc<Player>> {
        self.players
            .load()
            .values()
            .find(|player| player.connection().addr() == addr)
            .cloned()
    }

    /// Records activity for a player; returns false if it is not connected
    pub fn touch(&self, player_id: u32) -> bool {
        match self.get(player_id) {
            Some(player) => {
                player.touch();
                true
            }
            None => false,
        }
    }

    /// Disconnects every player that has been silent longer than `timeout`
    ///
    /// Returns the removed players so other systems can clean up after them.
    pub fn sweep_timeouts(&self, timeout: Duration) -> Vec<Arc<Player>> {
        let timed_out: Vec<u32> = self
            .players
            .load()
            .values()
            .filter(|player| player.is_timed_out(timeout))
            .map(|player| player.id())
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.disconnect(id))
            .collect()
    }

    /// Materializes the online players as of this call, ordered by ID
    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        let mut players: Vec<Arc<Player>> = self.players.load().values().cloned().collect();
        players.sort_by_key(|player| player.id());
        players
    }

    /// A view that re-reads the directory every time it is iterated
    pub fn live_view(self: &Arc<Self>) -> LivePlayers {
        LivePlayers {
            directory: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.players.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.load().is_empty()
    }
}

/// Live view of the online players
///
/// Each call to [`LivePlayers::iter`] reflects connects and disconnects that
/// completed before it. An iteration already in progress keeps its own
/// consistent copy and is never disturbed by concurrent changes.
#[derive(Clone)]
pub struct LivePlayers {
    directory: Arc<ConnectionDirectory>,
}

impl LivePlayers {
    pub fn iter(&self) -> std::vec::IntoIter<Arc<Player>> {
        self.directory.snapshot().into_iter()
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }
}

impl IntoIterator for &LivePlayers {
    type Item = Arc<Player>;
    type IntoIter = std::vec::IntoIter<Arc<Player>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn outbound() -> OutboundSender {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn test_directory_creation() {
        let directory = ConnectionDirectory::new(5);
        assert_eq!(directory.max_players(), 5);
        assert!(directory.is_empty());
        assert_eq!(directory.len(), 0);
    }

    #[test]
    fn test_connect_assigns_ids() {
        let directory = ConnectionDirectory::new(3);

        let first = directory.connect("alice", test_addr(), outbound()).unwrap();
        let second = directory.connect("bob", test_addr2(), outbound()).unwrap();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(first.entity_id(), ENTITY_ID_BASE + 1);
        assert_eq!(second.name(), "bob");
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_connect_max_capacity() {
        let directory = ConnectionDirectory::new(1);

        assert!(directory.connect("alice", test_addr(), outbound()).is_some());
        assert!(directory.connect("bob", test_addr2(), outbound()).is_none());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_disconnect() {
        let directory = ConnectionDirectory::new(2);
        let player = directory.connect("alice", test_addr(), outbound()).unwrap();

        let removed = directory.disconnect(player.id()).unwrap();
        assert_eq!(removed.id(), player.id());
        assert!(directory.is_empty());
        assert!(directory.disconnect(player.id()).is_none());
        assert!(directory.disconnect(999).is_none());
    }

    #[test]
    fn test_find_by_addr() {
        let directory = ConnectionDirectory::new(2);
        let alice = directory.connect("alice", test_addr(), outbound()).unwrap();
        directory.connect("bob", test_addr2(), outbound()).unwrap();

        assert_eq!(directory.find_by_addr(test_addr()).unwrap().id(), alice.id());

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert!(directory.find_by_addr(unknown).is_none());
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let directory = ConnectionDirectory::new(4);
        let connection = Connection::new(42, test_addr(), outbound());
        let player = Arc::new(Player::new(42, "npc", 7, connection));

        assert!(directory.insert(Arc::clone(&player)));
        assert!(!directory.insert(player));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let directory = Arc::new(ConnectionDirectory::new(4));
        let alice = directory.connect("alice", test_addr(), outbound()).unwrap();
        directory.connect("bob", test_addr2(), outbound()).unwrap();

        let snapshot = directory.snapshot();
        let live = directory.live_view();
        directory.disconnect(alice.id());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(live.len(), 1);
        assert_eq!(live.iter().map(|p| p.id()).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_live_iteration_survives_disconnect() {
        let directory = Arc::new(ConnectionDirectory::new(8));
        for port in 0..4u16 {
            let addr = SocketAddr::from(([127, 0, 0, 1], 9000 + port));
            directory.connect("p", addr, outbound()).unwrap();
        }

        let live = directory.live_view();
        let mut seen = Vec::new();
        for player in &live {
            directory.disconnect(player.id() % 4 + 1);
            seen.push(player.id());
        }

        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_sweep_timeouts() {
        let directory = ConnectionDirectory::new(2);
        let alice = directory.connect("alice", test_addr(), outbound()).unwrap();
        directory.connect("bob", test_addr2(), outbound()).unwrap();

        assert!(directory.sweep_timeouts(Duration::from_secs(5)).is_empty());

        std::thread::sleep(Duration::from_millis(200));
        assert!(directory.touch(alice.id()));
        let removed = directory.sweep_timeouts(Duration::from_millis(100));

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name(), "bob");
        assert_eq!(directory.len(), 1);
        assert!(!directory.touch(removed[0].id()));
    }
}
