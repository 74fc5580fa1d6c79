//! Read-only view of the game handed to the renderer each frame

use serde::Serialize;

use super::physics::BirdState;
use super::pipes::PipeData;
use super::session::{GameMode, Outcome, Role, Session};
use super::sim::Simulator;

/// Everything a renderer may look at. Owned copy, never the live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub frame: u64,
    pub mode: GameMode,
    pub role: Option<Role>,
    pub local: BirdState,
    pub opponent: Option<BirdState>,
    pub pipes: Vec<PipeData>,
    pub outcome: Option<Outcome>,
    pub room_code: Option<String>,
    pub status: String,
    /// Frames left on the pending countdown / death delay
    pub pending_frames: Option<u64>,
}

impl Snapshot {
    pub fn capture(frame: u64, session: &Session, sim: &Simulator, room_code: Option<&str>) -> Self {
        Self {
            frame,
            mode: session.mode(),
            role: session.role(),
            local: *sim.local(),
            opponent: sim.opponent().copied(),
            pipes: sim.pipes().iter().copied().collect(),
            outcome: session.outcome(),
            room_code: room_code.map(str::to_string),
            status: session.status().to_string(),
            pending_frames: session.frames_until_scheduled(frame),
        }
    }

    /// The first pipe the bird has not cleared yet
    pub fn next_pipe(&self) -> Option<&PipeData> {
        self.pipes
            .iter()
            .find(|pipe| pipe.trailing_edge() >= self.local.hitbox_left())
    }
}

/// Consumer of per-frame snapshots (drawing lives outside this crate)
pub trait RenderAdapter {
    fn render(&mut self, snapshot: &Snapshot);
}
