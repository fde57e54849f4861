//! Standard audiences over the connection directory and the registry
//!
//! Every accessor of [`AudienceProvider`] returns an [`Audience`]: a small
//! value that names where its members come from plus the shared
//! [`Broadcaster`]. Unfiltered player and group audiences are live and
//! re-resolve their members on every send. Filtered audiences and unions are
//! snapshots taken when the accessor is called, detached from later
//! connects, disconnects and group changes.

use std::collections::HashSet;
use std::sync::Arc;

use crate::directory::{ConnectionDirectory, LivePlayers};
use crate::grouping::{Broadcaster, PacketGroupingAudience};
use crate::recipient::{Console, Player, Recipient, RecipientId};
use crate::registry::{AudienceRegistry, GroupKey};

#[derive(Clone)]
enum Members {
    /// Every connected player, resolved on use
    Players(LivePlayers),
    /// One custom group, resolved on use
    Group {
        registry: Arc<AudienceRegistry>,
        key: GroupKey,
    },
    /// Fixed at creation
    Snapshot(Arc<[Recipient]>),
}

#[derive(Clone)]
pub struct Audience {
    members: Members,
    broadcaster: Arc<Broadcaster>,
}

impl Audience {
    /// Audience over an explicit list of recipients
    pub fn of(recipients: Vec<Recipient>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            members: Members::Snapshot(dedup(recipients).into()),
            broadcaster,
        }
    }

    pub fn players(players: LivePlayers, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            members: Members::Players(players),
            broadcaster,
        }
    }

    pub fn group(
        registry: Arc<AudienceRegistry>,
        key: GroupKey,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            members: Members::Group { registry, key },
            broadcaster,
        }
    }

    /// Whether membership is resolved at send time rather than fixed
    pub fn is_live(&self) -> bool {
        !matches!(self.members, Members::Snapshot(_))
    }

    /// Freezes the current membership into a detached audience
    pub fn snapshot(&self) -> Audience {
        Audience::of(self.recipients(), Arc::clone(&self.broadcaster))
    }

    pub fn contains(&self, id: RecipientId) -> bool {
        self.recipients().iter().any(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        match &self.members {
            Members::Players(players) => players.len(),
            Members::Group { registry, key } => registry.members_of(key).len(),
            Members::Snapshot(recipients) => recipients.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PacketGroupingAudience for Audience {
    fn recipients(&self) -> Vec<Recipient> {
        match &self.members {
            Members::Players(players) => players.iter().map(Recipient::Player).collect(),
            Members::Group { registry, key } => {
                let mut members: Vec<Recipient> =
                    registry.members_of(key).iter().cloned().collect();
                members.sort_by_key(Recipient::id);
                members
            }
            Members::Snapshot(recipients) => recipients.to_vec(),
        }
    }

    fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }
}

/// Removes repeated identities, keeping the first occurrence
fn dedup(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert(r.id()))
        .collect()
}

pub struct AudienceProvider {
    directory: Arc<ConnectionDirectory>,
    console: Recipient,
    registry: Arc<AudienceRegistry>,
    broadcaster: Arc<Broadcaster>,
}

impl AudienceProvider {
    pub fn new(
        directory: Arc<ConnectionDirectory>,
        console: Arc<Console>,
        registry: Arc<AudienceRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            directory,
            console: Recipient::Console(console),
            registry,
            broadcaster,
        }
    }

    pub fn registry(&self) -> &Arc<AudienceRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    fn snapshot_of(&self, recipients: Vec<Recipient>) -> Audience {
        Audience::of(recipients, Arc::clone(&self.broadcaster))
    }

    fn player_recipients(&self) -> Vec<Recipient> {
        self.directory
            .snapshot()
            .into_iter()
            .map(Recipient::Player)
            .collect()
    }

    /// Players, the console and every custom group member, each once
    pub fn all(&self) -> Audience {
        let mut recipients = self.player_recipients();
        recipients.push(self.console.clone());
        recipients.extend(self.registry.all());
        self.snapshot_of(recipients)
    }

    pub fn all_filtered<P>(&self, predicate: P) -> Audience
    where
        P: Fn(&Recipient) -> bool,
    {
        let recipients = self.all().recipients();
        self.snapshot_of(recipients.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Live view of the connected players
    pub fn players(&self) -> Audience {
        Audience::players(self.directory.live_view(), Arc::clone(&self.broadcaster))
    }

    pub fn players_filtered<P>(&self, predicate: P) -> Audience
    where
        P: Fn(&Player) -> bool,
    {
        let recipients = self
            .directory
            .snapshot()
            .into_iter()
            .filter(|player| predicate(player))
            .map(Recipient::Player)
            .collect();
        self.snapshot_of(recipients)
    }

    pub fn console(&self) -> Audience {
        self.snapshot_of(vec![self.console.clone()])
    }

    /// Players and the console
    pub fn server(&self) -> Audience {
        let mut recipients = self.player_recipients();
        recipients.push(self.console.clone());
        self.snapshot_of(recipients)
    }

    /// Live view of one custom group
    pub fn custom(&self, key: &GroupKey) -> Audience {
        Audience::group(
            Arc::clone(&self.registry),
            key.clone(),
            Arc::clone(&self.broadcaster),
        )
    }

    pub fn custom_filtered<P>(&self, key: &GroupKey, predicate: P) -> Audience
    where
        P: Fn(&Recipient) -> bool,
    {
        let recipients = self
            .registry
            .members_of(key)
            .iter()
            .filter(|r| predicate(*r))
            .cloned()
            .collect();
        self.snapshot_of(recipients)
    }

    /// Members of every custom group, each once
    pub fn customs(&self) -> Audience {
        self.snapshot_of(self.registry.all())
    }

    pub fn customs_filtered<P>(&self, predicate: P) -> Audience
    where
        P: Fn(&Recipient) -> bool,
    {
        self.snapshot_of(self.registry.filter(predicate))
    }
}
