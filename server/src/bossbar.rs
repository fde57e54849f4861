//! Boss bars and the manager that keeps viewers in sync with them
//!
//! A [`BossBar`] is a shared handle to mutable bar state. Mutating it yields
//! a [`BossBarChange`] describing exactly what changed; the
//! [`BossBarManager`] turns that change into the one minimal packet for it,
//! filled in from the bar's current state, and sends it grouped to the
//! bar's current viewers.
//!
//! ## Holders
//!
//! The manager keeps a holder per bar that has at least one viewer. A holder
//! records the viewer set. It is created by the first `add_viewers` and
//! removed as soon as its viewer set is empty. Its presence in the holder
//! table is the bar's subscription: changes to a bar without a holder are
//! dropped.
//!
//! ## Ordering
//!
//! Viewers always see `Add`, then zero or more updates, then `Remove`.
//! Adding or removing viewers, [`BossBarManager::update`] and
//! [`BossBarManager::on_change`] all run while holding the bar's own lock,
//! so for a single bar those operations are linearized and the packets they
//! emit are queued in that same order.
//! Different bars never contend on each other's locks.

use dashmap::DashMap;
use log::debug;
use shared::{
    BossBarAction, BossBarColor, BossBarFlag, BossBarFlags, BossBarOverlay, Component, Packet,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::grouping::PacketSender;
use crate::recipient::Recipient;

static NEXT_BOSS_BAR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BossBarId(u64);

impl BossBarId {
    fn next() -> Self {
        Self(NEXT_BOSS_BAR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a single mutation did to a bar
#[derive(Debug, Clone, PartialEq)]
pub enum BossBarChange {
    TitleChanged { old: Component, new: Component },
    ProgressChanged { old: f32, new: f32 },
    ColorChanged { old: BossBarColor, new: BossBarColor },
    OverlayChanged { old: BossBarOverlay, new: BossBarOverlay },
    FlagsChanged { added: BossBarFlags, removed: BossBarFlags },
}

/// Full state of a bar
///
/// Setters return `None` when the new value equals the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct BossBarState {
    title: Component,
    progress: f32,
    color: BossBarColor,
    overlay: BossBarOverlay,
    flags: BossBarFlags,
}

/// Progress is always in [0, 1]; NaN counts as empty
fn clamp_progress(progress: f32) -> f32 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

impl BossBarState {
    pub fn new(
        title: Component,
        progress: f32,
        color: BossBarColor,
        overlay: BossBarOverlay,
    ) -> Self {
        Self {
            title,
            progress: clamp_progress(progress),
            color,
            overlay,
            flags: BossBarFlags::empty(),
        }
    }

    pub fn title(&self) -> &Component {
        &self.title
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn color(&self) -> BossBarColor {
        self.color
    }

    pub fn overlay(&self) -> BossBarOverlay {
        self.overlay
    }

    pub fn flags(&self) -> BossBarFlags {
        self.flags
    }

    pub fn set_title(&mut self, title: Component) -> Option<BossBarChange> {
        if self.title == title {
            return None;
        }
        let old = std::mem::replace(&mut self.title, title.clone());
        Some(BossBarChange::TitleChanged { old, new: title })
    }

    pub fn set_progress(&mut self, progress: f32) -> Option<BossBarChange> {
        let new = clamp_progress(progress);
        if self.progress == new {
            return None;
        }
        let old = std::mem::replace(&mut self.progress, new);
        Some(BossBarChange::ProgressChanged { old, new })
    }

    pub fn set_color(&mut self, color: BossBarColor) -> Option<BossBarChange> {
        if self.color == color {
            return None;
        }
        let old = std::mem::replace(&mut self.color, color);
        Some(BossBarChange::ColorChanged { old, new: color })
    }

    pub fn set_overlay(&mut self, overlay: BossBarOverlay) -> Option<BossBarChange> {
        if self.overlay == overlay {
            return None;
        }
        let old = std::mem::replace(&mut self.overlay, overlay);
        Some(BossBarChange::OverlayChanged { old, new: overlay })
    }

    /// Replaces the flag set, reporting which flags were added and removed
    pub fn set_flags(&mut self, flags: BossBarFlags) -> Option<BossBarChange> {
        let added = flags.difference(self.flags);
        let removed = self.flags.difference(flags);
        if added.is_empty() && removed.is_empty() {
            return None;
        }
        self.flags = flags;
        Some(BossBarChange::FlagsChanged { added, removed })
    }

    pub fn add_flag(&mut self, flag: BossBarFlag) -> Option<BossBarChange> {
        let mut flags = self.flags;
        flags.insert(flag);
        self.set_flags(flags)
    }

    pub fn remove_flag(&mut self, flag: BossBarFlag) -> Option<BossBarChange> {
        let mut flags = self.flags;
        flags.remove(flag);
        self.set_flags(flags)
    }

    fn add_action(&self) -> BossBarAction {
        BossBarAction::Add {
            title: self.title.clone(),
            progress: self.progress,
            color: self.color,
            overlay: self.overlay,
            flags: self.flags,
        }
    }

    /// Update packet bringing a viewer in line with this state for `change`
    ///
    /// Values come from the state, not the change, so a change routed late
    /// never sends a value the bar no longer has. Flag diffs are narrowed to
    /// the flags that still match the state; `None` if nothing is left.
    fn update_action(&self, change: &BossBarChange) -> Option<BossBarAction> {
        let action = match change {
            BossBarChange::TitleChanged { .. } => BossBarAction::UpdateTitle {
                title: self.title.clone(),
            },
            BossBarChange::ProgressChanged { .. } => BossBarAction::UpdateProgress {
                progress: self.progress,
            },
            BossBarChange::ColorChanged { .. } | BossBarChange::OverlayChanged { .. } => {
                BossBarAction::UpdateStyle {
                    color: self.color,
                    overlay: self.overlay,
                }
            }
            BossBarChange::FlagsChanged { added, removed } => {
                let added = added.intersection(self.flags);
                let removed = removed.difference(self.flags);
                if added.is_empty() && removed.is_empty() {
                    return None;
                }
                BossBarAction::UpdateFlags { added, removed }
            }
        };
        Some(action)
    }
}

/// Shared handle to one bar; clones refer to the same bar
#[derive(Debug, Clone)]
pub struct BossBar {
    id: BossBarId,
    state: Arc<Mutex<BossBarState>>,
}

impl BossBar {
    pub fn new(
        title: Component,
        progress: f32,
        color: BossBarColor,
        overlay: BossBarOverlay,
    ) -> Self {
        Self::from_state(BossBarState::new(title, progress, color, overlay))
    }

    pub fn from_state(state: BossBarState) -> Self {
        Self {
            id: BossBarId::next(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn id(&self) -> BossBarId {
        self.id
    }

    /// Copy of the current state
    pub fn state(&self) -> BossBarState {
        self.lock().clone()
    }

    /// Applies a mutation without notifying anyone
    ///
    /// The returned change must be passed to [`BossBarManager::on_change`] for
    /// viewers to see it. Prefer [`BossBarManager::update`], which does both
    /// under the bar's lock.
    pub fn mutate<F>(&self, mutation: F) -> Option<BossBarChange>
    where
        F: FnOnce(&mut BossBarState) -> Option<BossBarChange>,
    {
        mutation(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BossBarState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for BossBar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BossBar {}

struct Holder {
    viewers: HashSet<Recipient>,
    /// Set once the holder has left the table; late arrivals must not use it
    retired: bool,
}

impl Holder {
    fn shared() -> Arc<Mutex<Holder>> {
        Arc::new(Mutex::new(Holder {
            viewers: HashSet::new(),
            retired: false,
        }))
    }
}

fn lock_holder(holder: &Mutex<Holder>) -> MutexGuard<'_, Holder> {
    holder.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BossBarManager {
    packets: Arc<PacketSender>,
    holders: DashMap<BossBarId, Arc<Mutex<Holder>>>,
}

impl BossBarManager {
    pub fn new(packets: Arc<PacketSender>) -> Self {
        Self {
            packets,
            holders: DashMap::new(),
        }
    }

    /// Shows a bar to each recipient that is not already viewing it
    ///
    /// Every new viewer gets its own full-state `Add` packet. Returns the
    /// number of new viewers. Recipients without a connection are skipped.
    pub fn add_viewers<I>(&self, bar: &BossBar, recipients: I) -> usize
    where
        I: IntoIterator<Item = Recipient>,
    {
        let state = bar.lock();
        let recipients: Vec<Recipient> = recipients
            .into_iter()
            .filter(|r| r.connection().is_some())
            .collect();
        if recipients.is_empty() {
            return 0;
        }

        loop {
            let holder = Arc::clone(
                self.holders
                    .entry(bar.id())
                    .or_insert_with(|| {
                        debug!("Tracking boss bar {}", bar.id().get());
                        Holder::shared()
                    })
                    .value(),
            );
            let mut guard = lock_holder(&holder);
            if guard.retired {
                continue;
            }

            let packet = Packet::BossBar {
                id: bar.id().get(),
                action: state.add_action(),
            };

            let mut added = 0;
            for recipient in recipients {
                if guard.viewers.contains(&recipient) {
                    continue;
                }
                if let Some(connection) = recipient.connection() {
                    self.packets.send_to(connection, &packet);
                }
                guard.viewers.insert(recipient);
                added += 1;
            }
            return added;
        }
    }

    /// Hides a bar from each recipient that is currently viewing it
    ///
    /// Every removed viewer gets its own `Remove` packet; recipients that
    /// were not viewing the bar are ignored. Returns the number removed.
    pub fn remove_viewers<I>(&self, bar: &BossBar, recipients: I) -> usize
    where
        I: IntoIterator<Item = Recipient>,
    {
        let _state = bar.lock();
        let Some(holder) = self.holder(bar.id()) else {
            return 0;
        };
        let mut guard = lock_holder(&holder);
        if guard.retired {
            return 0;
        }

        let packet = Packet::BossBar {
            id: bar.id().get(),
            action: BossBarAction::Remove,
        };
        let mut removed = 0;
        for recipient in recipients {
            if !guard.viewers.remove(&recipient) {
                continue;
            }
            if let Some(connection) = recipient.connection() {
                self.packets.send_to(connection, &packet);
            }
            removed += 1;
        }

        if guard.viewers.is_empty() {
            self.retire(bar.id(), &holder, &mut guard);
        }
        removed
    }

    /// Applies a mutation to a bar and sends the resulting update
    ///
    /// The mutation and the send happen under the bar's lock, so concurrent
    /// updates to one bar reach every viewer in the order they were applied.
    pub fn update<F>(&self, bar: &BossBar, mutation: F) -> Option<BossBarChange>
    where
        F: FnOnce(&mut BossBarState) -> Option<BossBarChange>,
    {
        let mut state = bar.lock();
        let change = mutation(&mut *state)?;
        self.send_update(bar.id(), &state, &change);
        Some(change)
    }

    /// Sends the update for a change made through [`BossBar::mutate`]
    ///
    /// The packet is built from the bar's state at the time of this call,
    /// under the bar's lock, so routing changes late or out of order still
    /// leaves viewers showing what the bar shows. Returns false, sending
    /// nothing, when the bar has no viewers or the change is already undone.
    pub fn on_change(&self, bar: &BossBar, change: &BossBarChange) -> bool {
        let state = bar.lock();
        self.send_update(bar.id(), &state, change)
    }

    // Caller holds the bar's lock
    fn send_update(&self, id: BossBarId, state: &BossBarState, change: &BossBarChange) -> bool {
        let Some(holder) = self.holder(id) else {
            return false;
        };
        let guard = lock_holder(&holder);
        if guard.retired || guard.viewers.is_empty() {
            return false;
        }
        let Some(action) = state.update_action(change) else {
            return false;
        };

        let packet = Packet::BossBar {
            id: id.get(),
            action,
        };
        self.packets.send_grouped(
            guard.viewers.iter().filter_map(Recipient::connection),
            &packet,
        );
        true
    }

    /// Forgets a recipient everywhere without sending anything
    ///
    /// Used when a player disconnects. Returns the bars it was viewing.
    pub fn remove_all(&self, recipient: &Recipient) -> Vec<BossBarId> {
        let mut left = Vec::new();
        for (id, holder) in self.snapshot_holders() {
            let mut guard = lock_holder(&holder);
            if guard.retired || !guard.viewers.remove(recipient) {
                continue;
            }
            if guard.viewers.is_empty() {
                self.retire(id, &holder, &mut guard);
            }
            left.push(id);
        }
        left.sort();
        left
    }

    /// Bars the recipient is currently viewing
    pub fn bars_of(&self, recipient: &Recipient) -> Vec<BossBarId> {
        let mut bars: Vec<BossBarId> = self
            .snapshot_holders()
            .into_iter()
            .filter(|(_, holder)| lock_holder(holder).viewers.contains(recipient))
            .map(|(id, _)| id)
            .collect();
        bars.sort();
        bars
    }

    pub fn viewers_of(&self, bar: &BossBar) -> Vec<Recipient> {
        match self.holder(bar.id()) {
            Some(holder) => lock_holder(&holder).viewers.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Whether the bar currently has a holder, i.e. at least one viewer
    pub fn is_tracked(&self, bar: &BossBar) -> bool {
        self.holders.contains_key(&bar.id())
    }

    /// Number of bars with at least one viewer
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    // Holder mutexes are only ever locked after the table's shard lock has
    // been released; retiring takes the shard lock while holding a holder.
    fn snapshot_holders(&self) -> Vec<(BossBarId, Arc<Mutex<Holder>>)> {
        self.holders
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    fn holder(&self, id: BossBarId) -> Option<Arc<Mutex<Holder>>> {
        self.holders.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn retire(&self, id: BossBarId, holder: &Arc<Mutex<Holder>>, guard: &mut Holder) {
        guard.retired = true;
        self.holders
            .remove_if(&id, |_, current| Arc::ptr_eq(current, holder));
        debug!("Stopped tracking boss bar {}", id.get());
    }
}
