//! Lobby countdown
//!
//! The lobby shows every player a countdown bar. Each tick drains the bar;
//! during the final seconds it turns red and darkens the sky. When it runs
//! out a new round is announced with a title, a sound and a chat line, and
//! the countdown starts over.

use log::info;
use shared::{
    BossBarColor, BossBarFlag, BossBarOverlay, Component, MessageType, Sound, SoundSource,
    TextColor,
};

use crate::bossbar::BossBar;
use crate::grouping::{PacketGroupingAudience, Title, TitleTimes};
use crate::recipient::Recipient;

/// Seconds before the round starts at which the bar switches to its warning style
pub const WARNING_SECONDS: u32 = 3;

pub const ROUND_START_SOUND: &str = "entity.experience_orb.pickup";

fn bar_title(round: u32) -> Component {
    Component::text(format!("Round {} starts soon", round)).color(TextColor::Yellow)
}

#[derive(Debug)]
pub struct GameState {
    pub tick: u32,
    pub round: u32,
    ticks_per_second: u32,
    countdown_ticks: u32,
    remaining_ticks: u32,
    bar: BossBar,
}

impl GameState {
    pub fn new(countdown_seconds: u32, ticks_per_second: u32) -> Self {
        let ticks_per_second = ticks_per_second.max(1);
        let countdown_ticks = countdown_seconds.saturating_mul(ticks_per_second).max(1);
        Self {
            tick: 0,
            round: 0,
            ticks_per_second,
            countdown_ticks,
            remaining_ticks: countdown_ticks,
            bar: BossBar::new(
                bar_title(1),
                1.0,
                BossBarColor::Green,
                BossBarOverlay::Notched20,
            ),
        }
    }

    pub fn bar(&self) -> &BossBar {
        &self.bar
    }

    pub fn remaining_ticks(&self) -> u32 {
        self.remaining_ticks
    }

    pub fn countdown_ticks(&self) -> u32 {
        self.countdown_ticks
    }

    /// Shows the countdown to a newly joined player
    pub fn add_player(&self, lobby: &impl PacketGroupingAudience, player: Recipient) {
        lobby
            .broadcaster()
            .bossbars()
            .add_viewers(&self.bar, [player]);
    }

    /// Advances the countdown by one tick
    ///
    /// Returns the number of the round that started on this tick, if any.
    pub fn tick(&mut self, lobby: &impl PacketGroupingAudience) -> Option<u32> {
        self.tick += 1;
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);

        let bossbars = lobby.broadcaster().bossbars();
        let progress = self.remaining_ticks as f32 / self.countdown_ticks as f32;
        bossbars.update(&self.bar, |state| state.set_progress(progress));

        if self.remaining_ticks == 0 {
            return Some(self.start_round(lobby));
        }

        if self.remaining_ticks % self.ticks_per_second == 0 {
            let seconds = self.remaining_ticks / self.ticks_per_second;
            lobby.send_action_bar(&Component::text(format!("Next round in {}s", seconds)));

            if seconds == WARNING_SECONDS {
                bossbars.update(&self.bar, |state| state.set_color(BossBarColor::Red));
                bossbars.update(&self.bar, |state| state.add_flag(BossBarFlag::DarkenSky));
            }
        }
        None
    }

    fn start_round(&mut self, lobby: &impl PacketGroupingAudience) -> u32 {
        self.round += 1;
        let round = self.round;
        info!("Round {} started", round);

        let title = Title::new(
            Component::text(format!("Round {}", round))
                .color(TextColor::Gold)
                .bold(),
            Component::text("Good luck!"),
        )
        .with_times(TitleTimes::default());
        lobby.show_title(&title);
        lobby.play_sound(&Sound::new(ROUND_START_SOUND, SoundSource::Master, 1.0, 1.0));
        lobby.send_message(
            None,
            &Component::text(format!("Round {} has started", round)),
            MessageType::System,
        );

        self.remaining_ticks = self.countdown_ticks;
        let bossbars = lobby.broadcaster().bossbars();
        bossbars.update(&self.bar, |state| state.set_title(bar_title(round + 1)));
        bossbars.update(&self.bar, |state| state.set_color(BossBarColor::Green));
        bossbars.update(&self.bar, |state| state.remove_flag(BossBarFlag::DarkenSky));
        bossbars.update(&self.bar, |state| state.set_progress(1.0));
        round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audience::Audience;
    use crate::grouping::{BroadcastSettings, Broadcaster};
    use crate::test_support::{drain, test_player, test_sender};
    use assert_approx_eq::assert_approx_eq;
    use shared::{BossBarAction, Packet};
    use std::sync::Arc;

    fn lobby_of(recipients: Vec<Recipient>) -> Audience {
        let (sender, _faults) = test_sender(BroadcastSettings::default());
        Audience::of(recipients, Arc::new(Broadcaster::new(sender)))
    }

    fn bar_actions(packets: &[Packet]) -> Vec<BossBarAction> {
        packets
            .iter()
            .filter_map(|packet| match packet {
                Packet::BossBar { action, .. } => Some(action.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_game_state() {
        let game = GameState::new(10, 20);
        assert_eq!(game.tick, 0);
        assert_eq!(game.round, 0);
        assert_eq!(game.countdown_ticks(), 200);
        assert_eq!(game.remaining_ticks(), 200);
        assert_approx_eq!(game.bar().state().progress(), 1.0);

        let degenerate = GameState::new(0, 0);
        assert_eq!(degenerate.countdown_ticks(), 1);
    }

    #[test]
    fn test_huge_countdown_saturates() {
        let game = GameState::new(u32::MAX, 20);
        assert_eq!(game.countdown_ticks(), u32::MAX);
        assert_eq!(game.remaining_ticks(), u32::MAX);
    }

    #[test]
    fn test_add_player_shows_bar() {
        let (alice, mut rx) = test_player(1);
        let lobby = lobby_of(vec![alice.clone()]);
        let game = GameState::new(5, 20);

        game.add_player(&lobby, alice);

        match bar_actions(&drain(&mut rx)).as_slice() {
            [BossBarAction::Add { progress, color, .. }] => {
                assert_approx_eq!(*progress, 1.0);
                assert_eq!(*color, BossBarColor::Green);
            }
            other => panic!("Unexpected actions: {:?}", other),
        }
    }

    #[test]
    fn test_tick_drains_progress() {
        let (alice, mut rx) = test_player(1);
        let lobby = lobby_of(vec![alice.clone()]);
        let mut game = GameState::new(1, 4);
        game.add_player(&lobby, alice);
        drain(&mut rx);

        assert_eq!(game.tick(&lobby), None);
        match bar_actions(&drain(&mut rx)).as_slice() {
            [BossBarAction::UpdateProgress { progress }] => assert_approx_eq!(*progress, 0.75),
            other => panic!("Unexpected actions: {:?}", other),
        }
    }

    #[test]
    fn test_warning_style_in_final_seconds() {
        let (alice, mut rx) = test_player(1);
        let lobby = lobby_of(vec![alice.clone()]);
        let mut game = GameState::new(4, 2);
        game.add_player(&lobby, alice);
        drain(&mut rx);

        game.tick(&lobby);
        assert!(!drain(&mut rx)
            .iter()
            .any(|p| matches!(p, Packet::ActionBar { .. })));

        game.tick(&lobby);
        let packets = drain(&mut rx);
        assert!(packets.contains(&Packet::ActionBar {
            text: Component::text("Next round in 3s")
        }));
        let actions = bar_actions(&packets);
        assert!(actions.contains(&BossBarAction::UpdateStyle {
            color: BossBarColor::Red,
            overlay: BossBarOverlay::Notched20,
        }));
        assert!(actions.iter().any(|action| matches!(
            action,
            BossBarAction::UpdateFlags { added, removed }
                if added.contains(BossBarFlag::DarkenSky) && removed.is_empty()
        )));
    }

    #[test]
    fn test_round_start_announces_and_resets() {
        let (alice, mut rx) = test_player(1);
        let lobby = lobby_of(vec![alice.clone()]);
        let mut game = GameState::new(1, 2);
        game.add_player(&lobby, alice);
        drain(&mut rx);

        assert_eq!(game.tick(&lobby), None);
        assert_eq!(game.tick(&lobby), Some(1));
        assert_eq!(game.round, 1);
        assert_eq!(game.remaining_ticks(), game.countdown_ticks());

        let packets = drain(&mut rx);
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::SetTitleText { text } if text.plain_text() == "Round 1")));
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::EntitySoundEffect { sound, .. } if sound.name == ROUND_START_SOUND)));
        assert!(packets.iter().any(|p| matches!(
            p,
            Packet::ChatMessage { message, .. } if message.plain_text() == "Round 1 has started"
        )));

        let state = game.bar().state();
        assert_approx_eq!(state.progress(), 1.0);
        assert_eq!(state.title().plain_text(), "Round 2 starts soon");
        assert!(!state.flags().contains(BossBarFlag::DarkenSky));
    }

    #[test]
    fn test_tick_without_viewers_sends_nothing() {
        let lobby = lobby_of(Vec::new());
        let mut game = GameState::new(1, 1);

        assert_eq!(game.tick(&lobby), Some(1));
        assert_eq!(lobby.broadcaster().bossbars().len(), 0);
    }
}
