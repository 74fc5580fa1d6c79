//! Peer synchronisation: applies inbound messages to the session and
//! simulator, and turns simulation events into outbound messages.

use tracing::{debug, info};

use crate::game::sim::SimEvent;
use crate::game::{BirdState, GameMode, Outcome, Role, Session, Simulator};
use crate::util::time::UPDATE_INTERVAL_STEPS;

use super::protocol::PeerMsg;

/// Decides on which steps a periodic UPDATE goes out
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    steps_since_update: u32,
    interval: u32,
}

impl UpdateThrottle {
    pub fn new(interval: u32) -> Self {
        Self {
            steps_since_update: 0,
            interval: interval.max(1),
        }
    }

    /// Count a step; true when an update is due
    pub fn should_send(&mut self) -> bool {
        self.steps_since_update += 1;
        if self.steps_since_update >= self.interval {
            self.steps_since_update = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.steps_since_update = 0;
    }
}

impl Default for UpdateThrottle {
    fn default() -> Self {
        Self::new(UPDATE_INTERVAL_STEPS)
    }
}

/// Message handling for one side of a two-player session
#[derive(Debug, Clone, Default)]
pub struct SyncProtocol {
    throttle: UpdateThrottle,
}

impl SyncProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a message from the peer. Returns the outcome if this message
    /// completed the match.
    pub fn apply(
        &mut self,
        msg: PeerMsg,
        session: &mut Session,
        sim: &mut Simulator,
    ) -> Option<Outcome> {
        let Some(role) = session.role().filter(|r| r.is_multiplayer()) else {
            debug!(kind = msg.kind(), "Ignoring peer message outside multiplayer");
            return None;
        };

        match msg {
            PeerMsg::Prepare => {
                if role != Role::Client {
                    debug!("Ignoring PREPARE as host");
                    return None;
                }
                match session.transition(GameMode::Countdown) {
                    Ok(()) => session.set_status("Get ready"),
                    Err(e) => debug!(error = %e, "Ignoring PREPARE"),
                }
                None
            }
            PeerMsg::Start => {
                if !session.mode().can_transition(GameMode::Playing) {
                    debug!(mode = ?session.mode(), "Ignoring START");
                    return None;
                }
                self.reset_for_match(sim);
                if let Err(e) = session.begin_match() {
                    debug!(error = %e, "Ignoring START");
                    return None;
                }
                session.set_status("");
                info!(role = ?role, "Match started by peer");
                None
            }
            PeerMsg::Update {
                y,
                velocity,
                rotation,
                dead,
                score,
            } => {
                if !session.mode().simulates() {
                    return None;
                }
                let mut mirror = BirdState {
                    y,
                    velocity,
                    rotation,
                    dead,
                    score,
                };
                // A final score from GAMEOVER_SYNC outranks anything in UPDATE
                if let Some(final_score) = session.opponent_final() {
                    mirror.dead = true;
                    mirror.score = final_score;
                }
                sim.apply_opponent_update(mirror);
                None
            }
            PeerMsg::Pipe { gap_top, id } => {
                if role == Role::Client && session.mode() == GameMode::Playing {
                    sim.insert_remote_pipe(gap_top, id);
                } else {
                    debug!(id, "Ignoring PIPE");
                }
                None
            }
            PeerMsg::GameoverSync { score } => {
                if session.mode() != GameMode::Playing {
                    debug!(mode = ?session.mode(), "Ignoring GAMEOVER_SYNC");
                    return None;
                }
                if !session.record_opponent_final(score) {
                    return None;
                }
                sim.mark_opponent_dead(score);
                info!(opponent_score = score, "Opponent is out");
                session.try_resolve_outcome()
            }
            PeerMsg::Unknown => {
                debug!("Ignoring unknown peer message");
                None
            }
        }
    }

    /// Clear per-match sync state and the simulation
    pub fn reset_for_match(&mut self, sim: &mut Simulator) {
        sim.reset(true);
        self.throttle.reset();
    }

    /// Messages produced by one simulation step
    pub fn outbound(
        &mut self,
        session: &Session,
        sim: &Simulator,
        events: &[SimEvent],
    ) -> Vec<PeerMsg> {
        let mut out = Vec::new();
        let Some(role) = session.role().filter(|r| r.is_multiplayer()) else {
            return out;
        };

        let mut sent_state = false;
        for event in events {
            match *event {
                SimEvent::PipeSpawned { gap_top, id } if role == Role::Host => {
                    out.push(PeerMsg::Pipe { gap_top, id });
                }
                SimEvent::Died { score } => {
                    out.push(PeerMsg::update(sim.local()));
                    out.push(PeerMsg::GameoverSync { score });
                    sent_state = true;
                    self.throttle.reset();
                }
                _ => {}
            }
        }

        if session.mode() == GameMode::Playing && !sent_state && self.throttle.should_send() {
            out.push(PeerMsg::update(sim.local()));
        }
        out
    }
}
