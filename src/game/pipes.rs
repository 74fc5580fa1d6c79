//! Pipe lifecycle: spawning, advection, collision and scoring

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::physics::{BirdState, GROUND_Y, PLAYFIELD_WIDTH};

/// Horizontal thickness of a pipe body
pub const PIPE_WIDTH: f32 = 64.0;
/// Fixed vertical size of the passable gap
pub const GAP_HEIGHT: f32 = 150.0;
/// Leftward movement per step
pub const PIPE_SPEED: f32 = 2.5;
/// Minimum distance between the gap and the playfield top or ground line
pub const PIPE_MARGIN: f32 = 50.0;
/// Steps between two spawns (1.5 s at 60 FPS)
pub const PIPE_SPAWN_INTERVAL_STEPS: u32 = 90;
/// A pipe whose trailing edge is left of this is discarded
pub const PIPE_DESPAWN_EDGE: f32 = -PIPE_WIDTH;

/// A single obstacle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipeData {
    /// Leading (left) edge
    pub x: f32,
    /// Bottom edge of the top pipe, i.e. top edge of the gap
    pub gap_top: f32,
    pub passed: bool,
    pub id: u64,
}

impl PipeData {
    /// A new pipe at the right edge of the playfield
    pub fn at_right_edge(gap_top: f32, id: u64) -> Self {
        Self {
            x: PLAYFIELD_WIDTH,
            gap_top,
            passed: false,
            id,
        }
    }

    pub fn trailing_edge(&self) -> f32 {
        self.x + PIPE_WIDTH
    }

    pub fn gap_bottom(&self) -> f32 {
        self.gap_top + GAP_HEIGHT
    }

    /// Axis-aligned hit test against the bird hitbox
    pub fn hits(&self, bird: &BirdState) -> bool {
        let overlaps_x = bird.hitbox_right() > self.x && bird.hitbox_left() < self.trailing_edge();
        if !overlaps_x {
            return false;
        }
        bird.hitbox_top() < self.gap_top || bird.hitbox_bottom() > self.gap_bottom()
    }
}

/// Band `gap_top` is drawn from so the whole gap stays inside the sky
pub fn gap_top_range() -> RangeInclusive<f32> {
    PIPE_MARGIN..=(GROUND_Y - PIPE_MARGIN - GAP_HEIGHT)
}

/// Ordered pipe list, oldest at the front
#[derive(Debug, Clone)]
pub struct PipeField {
    pipes: VecDeque<PipeData>,
    next_id: u64,
    steps_since_spawn: u32,
}

impl PipeField {
    pub fn new() -> Self {
        Self {
            pipes: VecDeque::new(),
            next_id: 0,
            // First pipe spawns on the first eligible step
            steps_since_spawn: PIPE_SPAWN_INTERVAL_STEPS,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipeData> {
        self.pipes.iter()
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn front(&self) -> Option<&PipeData> {
        self.pipes.front()
    }

    /// Advance the spawn timer; spawns and returns a pipe when it is due
    pub fn tick_spawner<R: Rng>(&mut self, rng: &mut R) -> Option<PipeData> {
        self.steps_since_spawn = self.steps_since_spawn.saturating_add(1);
        if self.steps_since_spawn < PIPE_SPAWN_INTERVAL_STEPS {
            return None;
        }
        self.steps_since_spawn = 0;

        let gap_top = rng.gen_range(gap_top_range());
        let pipe = PipeData::at_right_edge(gap_top, self.next_id);
        self.push(pipe);
        Some(pipe)
    }

    /// Append a pipe chosen by the remote authority
    pub fn insert_remote(&mut self, gap_top: f32, id: u64) -> PipeData {
        let pipe = PipeData::at_right_edge(gap_top, id);
        self.push(pipe);
        pipe
    }

    /// Append at the back. Pipes must arrive in spawn order.
    pub fn push(&mut self, pipe: PipeData) {
        self.next_id = self.next_id.max(pipe.id.saturating_add(1));
        self.pipes.push_back(pipe);
    }

    pub fn advance(&mut self) {
        for pipe in self.pipes.iter_mut() {
            pipe.x -= PIPE_SPEED;
        }
    }

    pub fn collides(&self, bird: &BirdState) -> bool {
        self.pipes.iter().any(|pipe| pipe.hits(bird))
    }

    /// Flag pipes whose trailing edge is now strictly left of the bird hitbox.
    /// Returns how many pipes were newly passed.
    pub fn mark_passed(&mut self, bird: &BirdState) -> u32 {
        let mut newly_passed = 0;
        for pipe in self.pipes.iter_mut() {
            if !pipe.passed && pipe.trailing_edge() < bird.hitbox_left() {
                pipe.passed = true;
                newly_passed += 1;
            }
        }
        newly_passed
    }

    /// Drop off-screen pipes from the head only
    pub fn cull(&mut self) -> usize {
        let mut removed = 0;
        while let Some(front) = self.pipes.front() {
            if front.trailing_edge() >= PIPE_DESPAWN_EDGE {
                break;
            }
            self.pipes.pop_front();
            removed += 1;
        }
        removed
    }
}

impl Default for PipeField {
    fn default() -> Self {
        Self::new()
    }
}
