//! Game mode state machine and match outcome resolution

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Participant role, fixed once chosen from the menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Single,
    Host,
    Client,
}

impl Role {
    /// Whether this role generates pipes
    pub fn is_authority(self) -> bool {
        matches!(self, Role::Single | Role::Host)
    }

    pub fn is_multiplayer(self) -> bool {
        !matches!(self, Role::Single)
    }
}

/// Top-level mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Menu,
    Lobby,
    Joining,
    Countdown,
    Playing,
    Gameover,
}

impl GameMode {
    /// Legal edges of the mode graph. Any mode may return to MENU.
    pub fn can_transition(self, to: GameMode) -> bool {
        use GameMode::*;
        match (self, to) {
            (_, Menu) => true,
            (Menu, Lobby) | (Menu, Joining) | (Menu, Playing) => true,
            (Lobby, Countdown) => true,
            (Joining, Countdown) | (Joining, Playing) => true,
            (Countdown, Playing) => true,
            (Playing, Gameover) => true,
            (Gameover, Playing) => true,
            _ => false,
        }
    }

    /// Modes in which the simulator is stepped
    pub fn simulates(self) -> bool {
        matches!(self, GameMode::Playing | GameMode::Gameover)
    }
}

/// Who won a finished match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    You,
    Opponent,
    Draw,
    /// Single-player, or the opponent vanished before reporting a final score
    Undecided,
}

impl Winner {
    pub fn decide(local_score: u32, opponent_score: u32) -> Self {
        match local_score.cmp(&opponent_score) {
            std::cmp::Ordering::Greater => Winner::You,
            std::cmp::Ordering::Less => Winner::Opponent,
            std::cmp::Ordering::Equal => Winner::Draw,
        }
    }
}

/// Immutable result of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub final_score: u32,
    /// None in single-player or when the opponent never reported
    pub opponent_score: Option<u32>,
    pub winner: Winner,
}

impl Outcome {
    pub fn head_to_head(final_score: u32, opponent_score: u32) -> Self {
        Self {
            final_score,
            opponent_score: Some(opponent_score),
            winner: Winner::decide(final_score, opponent_score),
        }
    }

    pub fn solo(final_score: u32) -> Self {
        Self {
            final_score,
            opponent_score: None,
            winner: Winner::Undecided,
        }
    }
}

/// Deferred transition, cancelled by a return to MENU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delayed {
    /// Single-player death animation finished
    ShowGameover,
    /// Host countdown finished
    StartMatch,
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    action: Delayed,
    due_frame: u64,
}

/// Illegal mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal mode transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: GameMode,
    pub to: GameMode,
}

/// The game state machine. All mode changes go through [`Session::transition`].
#[derive(Debug, Clone)]
pub struct Session {
    mode: GameMode,
    role: Option<Role>,
    local_final: Option<u32>,
    opponent_final: Option<u32>,
    outcome: Option<Outcome>,
    scheduled: Option<Scheduled>,
    status: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            mode: GameMode::Menu,
            role: None,
            local_final: None,
            opponent_final: None,
            outcome: None,
            scheduled: None,
            status: String::new(),
        }
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn opponent_final(&self) -> Option<u32> {
        self.opponent_final
    }

    pub fn local_final(&self) -> Option<u32> {
        self.local_final
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// Frames until the pending delayed transition fires
    pub fn frames_until_scheduled(&self, now: u64) -> Option<u64> {
        self.scheduled.map(|s| s.due_frame.saturating_sub(now))
    }

    /// Validate and apply a mode change
    pub fn transition(&mut self, to: GameMode) -> Result<(), TransitionError> {
        let from = self.mode;
        if !from.can_transition(to) {
            return Err(TransitionError { from, to });
        }
        if from != to {
            debug!(from = ?from, to = ?to, "Mode transition");
        }
        self.mode = to;
        Ok(())
    }

    /// Leave the menu in the given role
    pub fn choose_role(&mut self, role: Role) -> Result<(), TransitionError> {
        let to = match role {
            Role::Single => GameMode::Playing,
            Role::Host => GameMode::Lobby,
            Role::Client => GameMode::Joining,
        };
        if self.mode != GameMode::Menu {
            return Err(TransitionError {
                from: self.mode,
                to,
            });
        }
        self.transition(to)?;
        self.role = Some(role);
        self.clear_match();
        Ok(())
    }

    /// Enter PLAYING with a clean slate of per-match results
    pub fn begin_match(&mut self) -> Result<(), TransitionError> {
        self.transition(GameMode::Playing)?;
        self.clear_match();
        Ok(())
    }

    /// Back to MENU from anywhere; drops the role, any pending delayed
    /// transition and the previous match's outcome
    pub fn return_to_menu(&mut self) {
        self.mode = GameMode::Menu;
        self.role = None;
        self.clear_match();
    }

    fn clear_match(&mut self) {
        self.local_final = None;
        self.opponent_final = None;
        self.outcome = None;
        self.scheduled = None;
    }

    pub fn schedule(&mut self, action: Delayed, due_frame: u64) {
        self.scheduled = Some(Scheduled { action, due_frame });
    }

    /// Take the pending delayed transition if it is due
    pub fn take_due(&mut self, now: u64) -> Option<Delayed> {
        match self.scheduled {
            Some(s) if s.due_frame <= now => {
                self.scheduled = None;
                Some(s.action)
            }
            _ => None,
        }
    }

    /// Record the local bird's final score. Later calls are ignored.
    pub fn record_local_death(&mut self, score: u32) {
        if self.local_final.is_none() {
            self.local_final = Some(score);
        }
    }

    /// Record the opponent's authoritative final score. Ignored once the outcome is fixed.
    pub fn record_opponent_final(&mut self, score: u32) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.opponent_final = Some(score);
        true
    }

    /// Resolve a multiplayer match once both sides are known dead.
    ///
    /// Safe to call from any trigger in any order; returns the outcome only
    /// on the call that actually resolved it.
    pub fn try_resolve_outcome(&mut self) -> Option<Outcome> {
        if self.outcome.is_some() || self.mode != GameMode::Playing {
            return None;
        }
        let (Some(local), Some(opponent)) = (self.local_final, self.opponent_final) else {
            return None;
        };
        self.transition(GameMode::Gameover).ok()?;
        let outcome = Outcome::head_to_head(local, opponent);
        self.outcome = Some(outcome);
        info!(
            score = local,
            opponent_score = opponent,
            winner = ?outcome.winner,
            "Match resolved"
        );
        Some(outcome)
    }

    /// Single-player game over after the death delay
    pub fn finish_solo(&mut self) -> Option<Outcome> {
        if self.outcome.is_some() {
            return None;
        }
        let score = self.local_final?;
        self.transition(GameMode::Gameover).ok()?;
        let outcome = Outcome::solo(score);
        self.outcome = Some(outcome);
        info!(score, "Single-player run over");
        Some(outcome)
    }

    /// The opponent is gone before reporting a final score
    pub fn abandon_match(&mut self, local_score: u32) -> Option<Outcome> {
        if self.outcome.is_some() {
            return None;
        }
        let outcome = Outcome::solo(self.local_final.unwrap_or(local_score));
        self.outcome = Some(outcome);
        Some(outcome)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_multiplayer() -> Session {
        let mut session = Session::new();
        session.choose_role(Role::Host).unwrap();
        session.transition(GameMode::Countdown).unwrap();
        session.begin_match().unwrap();
        session
    }

    #[test]
    fn winner_examples() {
        assert_eq!(Winner::decide(5, 5), Winner::Draw);
        assert_eq!(Winner::decide(7, 3), Winner::You);
        assert_eq!(Winner::decide(2, 6), Winner::Opponent);
    }

    #[test]
    fn dual_death_is_commutative() {
        for (local, remote) in [(5, 5), (7, 3), (2, 6), (0, 0), (11, 12)] {
            let mut local_first = playing_multiplayer();
            local_first.record_local_death(local);
            assert!(local_first.try_resolve_outcome().is_none());
            local_first.record_opponent_final(remote);
            let a = local_first.try_resolve_outcome().expect("resolved");

            let mut remote_first = playing_multiplayer();
            remote_first.record_opponent_final(remote);
            assert!(remote_first.try_resolve_outcome().is_none());
            remote_first.record_local_death(local);
            let b = remote_first.try_resolve_outcome().expect("resolved");

            assert_eq!(a, b);
            assert_eq!(local_first.mode(), GameMode::Gameover);
            assert_eq!(remote_first.mode(), GameMode::Gameover);
        }
    }

    #[test]
    fn resolution_runs_once_and_is_immutable() {
        let mut session = playing_multiplayer();
        session.record_local_death(4);
        session.record_opponent_final(2);
        assert!(session.try_resolve_outcome().is_some());
        assert!(session.try_resolve_outcome().is_none());
        assert!(!session.record_opponent_final(9));
        session.record_local_death(0);
        assert_eq!(session.outcome(), Some(Outcome::head_to_head(4, 2)));
    }

    #[test]
    fn local_death_recorded_once() {
        let mut session = playing_multiplayer();
        session.record_local_death(3);
        session.record_local_death(8);
        assert_eq!(session.local_final(), Some(3));
    }

    #[test]
    fn transition_table() {
        use GameMode::*;
        assert!(Menu.can_transition(Lobby));
        assert!(Menu.can_transition(Joining));
        assert!(Menu.can_transition(Playing));
        assert!(Lobby.can_transition(Countdown));
        assert!(Countdown.can_transition(Playing));
        assert!(Playing.can_transition(Gameover));
        assert!(Gameover.can_transition(Playing));
        for mode in [Menu, Lobby, Joining, Countdown, Playing, Gameover] {
            assert!(mode.can_transition(Menu));
        }
        assert!(!Menu.can_transition(Gameover));
        assert!(!Lobby.can_transition(Playing));
        assert!(!Gameover.can_transition(Countdown));
        assert!(!Playing.can_transition(Lobby));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut session = Session::new();
        let err = session.transition(GameMode::Gameover).unwrap_err();
        assert_eq!(err.from, GameMode::Menu);
        assert_eq!(session.mode(), GameMode::Menu);
    }

    #[test]
    fn menu_cancels_delayed_transition() {
        let mut session = Session::new();
        session.choose_role(Role::Single).unwrap();
        session.record_local_death(3);
        session.schedule(Delayed::ShowGameover, 10);
        session.return_to_menu();
        assert_eq!(session.take_due(100), None);
        assert_eq!(session.mode(), GameMode::Menu);
    }

    #[test]
    fn menu_drops_previous_outcome() {
        let mut session = Session::new();
        session.choose_role(Role::Single).unwrap();
        session.record_local_death(2);
        session.finish_solo().expect("outcome");

        session.return_to_menu();
        assert_eq!(session.outcome(), None);
        assert_eq!(session.local_final(), None);
        assert_eq!(session.role(), None);
    }

    #[test]
    fn solo_gameover_after_delay() {
        let mut session = Session::new();
        session.choose_role(Role::Single).unwrap();
        session.record_local_death(6);
        session.schedule(Delayed::ShowGameover, 48);
        assert_eq!(session.take_due(47), None);
        assert_eq!(session.take_due(48), Some(Delayed::ShowGameover));
        let outcome = session.finish_solo().expect("outcome");
        assert_eq!(outcome, Outcome::solo(6));
        assert_eq!(session.mode(), GameMode::Gameover);
    }

    #[test]
    fn replay_clears_previous_outcome() {
        let mut session = playing_multiplayer();
        session.record_local_death(1);
        session.record_opponent_final(1);
        session.try_resolve_outcome();
        session.begin_match().unwrap();
        assert_eq!(session.outcome(), None);
        assert_eq!(session.local_final(), None);
        assert_eq!(session.opponent_final(), None);
    }
}
