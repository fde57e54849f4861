//! Client-side view of the boss bars a server has shown
//!
//! Applies `BossBar` packets in arrival order and rejects any update that
//! arrives for a bar the client was never told to create.

use crate::{BossBarAction, BossBarColor, BossBarFlags, BossBarOverlay, Component};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("boss bar {0} is already shown")]
    AlreadyShown(u64),
    #[error("boss bar {0} is not shown")]
    UnknownBar(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BossBarView {
    pub title: Component,
    pub progress: f32,
    pub color: BossBarColor,
    pub overlay: BossBarOverlay,
    pub flags: BossBarFlags,
}

#[derive(Debug, Default)]
pub struct BossBarTracker {
    bars: HashMap<u64, BossBarView>,
}

impl BossBarTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, id: u64, action: &BossBarAction) -> Result<(), TrackerError> {
        match action {
            BossBarAction::Add {
                title,
                progress,
                color,
                overlay,
                flags,
            } => {
                if self.bars.contains_key(&id) {
                    return Err(TrackerError::AlreadyShown(id));
                }
                self.bars.insert(
                    id,
                    BossBarView {
                        title: title.clone(),
                        progress: *progress,
                        color: *color,
                        overlay: *overlay,
                        flags: *flags,
                    },
                );
            }
            BossBarAction::Remove => {
                self.bars.remove(&id).ok_or(TrackerError::UnknownBar(id))?;
            }
            BossBarAction::UpdateProgress { progress } => {
                self.view_mut(id)?.progress = *progress;
            }
            BossBarAction::UpdateTitle { title } => {
                self.view_mut(id)?.title = title.clone();
            }
            BossBarAction::UpdateStyle { color, overlay } => {
                let view = self.view_mut(id)?;
                view.color = *color;
                view.overlay = *overlay;
            }
            BossBarAction::UpdateFlags { added, removed } => {
                let view = self.view_mut(id)?;
                view.flags = view.flags.difference(*removed).union(*added);
            }
        }
        Ok(())
    }

    fn view_mut(&mut self, id: u64) -> Result<&mut BossBarView, TrackerError> {
        self.bars.get_mut(&id).ok_or(TrackerError::UnknownBar(id))
    }

    pub fn get(&self, id: u64) -> Option<&BossBarView> {
        self.bars.get(&id)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BossBarFlag;

    fn add_action() -> BossBarAction {
        BossBarAction::Add {
            title: Component::text("Boss"),
            progress: 1.0,
            color: BossBarColor::Red,
            overlay: BossBarOverlay::Progress,
            flags: BossBarFlags::empty(),
        }
    }

    #[test]
    fn test_update_before_add_is_rejected() {
        let mut tracker = BossBarTracker::new();
        let result = tracker.apply(3, &BossBarAction::UpdateProgress { progress: 0.5 });
        assert_eq!(result, Err(TrackerError::UnknownBar(3)));
    }

    #[test]
    fn test_add_update_remove() {
        let mut tracker = BossBarTracker::new();
        tracker.apply(1, &add_action()).unwrap();
        assert_eq!(tracker.apply(1, &add_action()), Err(TrackerError::AlreadyShown(1)));

        tracker
            .apply(1, &BossBarAction::UpdateProgress { progress: 0.5 })
            .unwrap();
        tracker
            .apply(
                1,
                &BossBarAction::UpdateStyle {
                    color: BossBarColor::Green,
                    overlay: BossBarOverlay::Notched6,
                },
            )
            .unwrap();

        let view = tracker.get(1).unwrap();
        assert_eq!(view.progress, 0.5);
        assert_eq!(view.color, BossBarColor::Green);
        assert_eq!(view.overlay, BossBarOverlay::Notched6);

        tracker.apply(1, &BossBarAction::Remove).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(
            tracker.apply(1, &BossBarAction::Remove),
            Err(TrackerError::UnknownBar(1))
        );
    }

    #[test]
    fn test_every_update_kind_needs_a_shown_bar() {
        let mut tracker = BossBarTracker::new();
        let updates = [
            BossBarAction::UpdateTitle {
                title: Component::text("Late"),
            },
            BossBarAction::UpdateStyle {
                color: BossBarColor::Blue,
                overlay: BossBarOverlay::Notched10,
            },
            BossBarAction::UpdateFlags {
                added: BossBarFlags::empty(),
                removed: BossBarFlags::empty(),
            },
        ];
        for update in &updates {
            assert_eq!(tracker.apply(7, update), Err(TrackerError::UnknownBar(7)));
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_flags_diff_applied_both_ways() {
        let mut tracker = BossBarTracker::new();
        tracker.apply(1, &add_action()).unwrap();

        let fog: BossBarFlags = std::iter::once(BossBarFlag::CreateFog).collect();
        tracker
            .apply(
                1,
                &BossBarAction::UpdateFlags {
                    added: fog,
                    removed: BossBarFlags::empty(),
                },
            )
            .unwrap();
        assert!(tracker.get(1).unwrap().flags.contains(BossBarFlag::CreateFog));

        tracker
            .apply(
                1,
                &BossBarAction::UpdateFlags {
                    added: BossBarFlags::empty(),
                    removed: fog,
                },
            )
            .unwrap();
        assert!(tracker.get(1).unwrap().flags.is_empty());
    }
}
