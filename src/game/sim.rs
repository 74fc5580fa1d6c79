//! Fixed-step simulator for the local player

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::physics::{BirdState, BoundaryContact, PhysicsSystem};
use super::pipes::{PipeData, PipeField};

/// Something that happened during a step and may need to leave the simulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    /// The local bird died this step
    Died { score: u32 },
    /// The local bird passed a pipe
    Scored { score: u32 },
    /// This simulator spawned a pipe (authority only)
    PipeSpawned { gap_top: f32, id: u64 },
}

/// Simulation state owned by exactly one process.
///
/// Only the local bird is ever advanced here. The opponent is a mirror that
/// changes only through [`Simulator::apply_opponent_update`] and friends.
pub struct Simulator {
    local: BirdState,
    opponent: Option<BirdState>,
    pipes: PipeField,
    rng: ChaCha8Rng,
    tick: u64,
}

impl Simulator {
    pub fn new(seed: u64) -> Self {
        Self {
            local: BirdState::new(),
            opponent: None,
            pipes: PipeField::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
        }
    }

    pub fn local(&self) -> &BirdState {
        &self.local
    }

    pub fn opponent(&self) -> Option<&BirdState> {
        self.opponent.as_ref()
    }

    pub fn pipes(&self) -> &PipeField {
        &self.pipes
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Reset for a new match. `with_opponent` sets up a fresh mirror.
    pub fn reset(&mut self, with_opponent: bool) {
        self.local = BirdState::new();
        self.opponent = with_opponent.then(BirdState::new);
        self.pipes.clear();
        self.tick = 0;
    }

    pub fn jump(&mut self) -> bool {
        self.local.jump()
    }

    /// Advance one fixed step. `spawn_pipes` is true only for the spawn
    /// authority while the match is live.
    pub fn step(&mut self, spawn_pipes: bool) -> Vec<SimEvent> {
        let mut events = Vec::new();
        self.tick += 1;

        if PhysicsSystem::step_bird(&mut self.local) == BoundaryContact::Floor {
            self.kill_local(&mut events);
        }

        // Single read of the alive flag for this step, after the floor check
        let alive = !self.local.dead;

        if alive {
            if spawn_pipes {
                if let Some(pipe) = self.pipes.tick_spawner(&mut self.rng) {
                    events.push(SimEvent::PipeSpawned {
                        gap_top: pipe.gap_top,
                        id: pipe.id,
                    });
                }
            }

            self.pipes.advance();

            if !self.local.dead && self.pipes.collides(&self.local) {
                self.kill_local(&mut events);
            }

            if !self.local.dead {
                let gained = self.pipes.mark_passed(&self.local);
                if gained > 0 {
                    self.local.score += gained;
                    events.push(SimEvent::Scored {
                        score: self.local.score,
                    });
                }
            }
        }

        self.pipes.cull();
        events
    }

    fn kill_local(&mut self, events: &mut Vec<SimEvent>) {
        if self.local.kill() {
            events.push(SimEvent::Died {
                score: self.local.score,
            });
        }
    }

    /// Append a pipe received from the authority
    pub fn insert_remote_pipe(&mut self, gap_top: f32, id: u64) -> PipeData {
        self.pipes.insert_remote(gap_top, id)
    }

    /// Overwrite the mirrored opponent bird
    pub fn apply_opponent_update(&mut self, state: BirdState) {
        self.opponent = Some(state);
    }

    /// Lock in the opponent's final score and mark the mirror dead
    pub fn mark_opponent_dead(&mut self, final_score: u32) {
        let mirror = self.opponent.get_or_insert_with(BirdState::new);
        mirror.dead = true;
        mirror.score = final_score;
    }
}
