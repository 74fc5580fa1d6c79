//! Bird physics over a fixed logical playfield
//!
//! All units are logical playfield units and one step is one frame; nothing
//! here knows about display scaling.

use serde::{Deserialize, Serialize};

/// Logical playfield width
pub const PLAYFIELD_WIDTH: f32 = 480.0;
/// Logical playfield height (including the ground strip)
pub const PLAYFIELD_HEIGHT: f32 = 640.0;
/// Height of the ground strip at the bottom of the playfield
pub const GROUND_HEIGHT: f32 = 80.0;
/// Y of the ground line
pub const GROUND_Y: f32 = PLAYFIELD_HEIGHT - GROUND_HEIGHT;

/// Fixed horizontal position of every bird
pub const BIRD_X: f32 = 120.0;
/// Vertical spawn position
pub const BIRD_START_Y: f32 = 280.0;
/// Collision box, smaller than the sprite
pub const HITBOX_WIDTH: f32 = 26.0;
pub const HITBOX_HEIGHT: f32 = 18.0;

/// Velocity added every step
pub const GRAVITY: f32 = 0.45;
/// Velocity set by a flap
pub const JUMP_VELOCITY: f32 = -7.5;

/// "Looking up" limit in radians
pub const MIN_ROTATION: f32 = -0.45;
/// Nose-dive limit in radians
pub const MAX_ROTATION: f32 = std::f32::consts::FRAC_PI_2;
/// Below this velocity the bird rotates up, at or above it dives
pub const ROTATION_THRESHOLD: f32 = 0.4;
/// Angular rate toward MIN_ROTATION (radians per step)
pub const ROTATION_UP_RATE: f32 = 0.12;
/// Angular rate toward MAX_ROTATION (radians per step)
pub const ROTATION_DOWN_RATE: f32 = 0.05;

/// Per-participant bird state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BirdState {
    /// Vertical centre of the hitbox
    pub y: f32,
    pub velocity: f32,
    /// Radians, always within [MIN_ROTATION, MAX_ROTATION]
    pub rotation: f32,
    pub dead: bool,
    pub score: u32,
}

impl BirdState {
    pub fn new() -> Self {
        Self {
            y: BIRD_START_Y,
            velocity: 0.0,
            rotation: 0.0,
            dead: false,
            score: 0,
        }
    }

    pub fn hitbox_top(&self) -> f32 {
        self.y - HITBOX_HEIGHT / 2.0
    }

    pub fn hitbox_bottom(&self) -> f32 {
        self.y + HITBOX_HEIGHT / 2.0
    }

    pub fn hitbox_left(&self) -> f32 {
        BIRD_X - HITBOX_WIDTH / 2.0
    }

    pub fn hitbox_right(&self) -> f32 {
        BIRD_X + HITBOX_WIDTH / 2.0
    }

    /// Flap. Returns false (and changes nothing) when the bird is dead.
    pub fn jump(&mut self) -> bool {
        if self.dead {
            return false;
        }
        self.velocity = JUMP_VELOCITY;
        self.rotation = MIN_ROTATION;
        true
    }

    /// Mark the bird dead. Returns true only for the call that actually killed it.
    pub fn kill(&mut self) -> bool {
        if self.dead {
            return false;
        }
        self.dead = true;
        true
    }
}

impl Default for BirdState {
    fn default() -> Self {
        Self::new()
    }
}

/// Which playfield boundary the bird touched during a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryContact {
    None,
    /// Lethal
    Floor,
    /// Blocking only
    Ceiling,
}

/// Physics system for advancing a bird one fixed step
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Integrate gravity, rotation and playfield bounds for one step.
    ///
    /// Dead birds keep falling so the death animation settles on the ground;
    /// the caller decides what a floor contact means.
    pub fn step_bird(bird: &mut BirdState) -> BoundaryContact {
        bird.velocity += GRAVITY;
        bird.y += bird.velocity;
        bird.rotation = Self::next_rotation(bird.rotation, bird.velocity);

        if bird.hitbox_bottom() >= GROUND_Y {
            bird.y = GROUND_Y - HITBOX_HEIGHT / 2.0;
            bird.velocity = 0.0;
            return BoundaryContact::Floor;
        }

        if bird.hitbox_top() <= 0.0 {
            bird.y = HITBOX_HEIGHT / 2.0;
            bird.velocity = 0.0;
            return BoundaryContact::Ceiling;
        }

        BoundaryContact::None
    }

    /// Rotation after one step at the given (already updated) velocity
    pub fn next_rotation(rotation: f32, velocity: f32) -> f32 {
        let next = if velocity < ROTATION_THRESHOLD {
            rotation - ROTATION_UP_RATE
        } else {
            rotation + ROTATION_DOWN_RATE
        };
        next.clamp(MIN_ROTATION, MAX_ROTATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_approaches_max_without_input() {
        let mut bird = BirdState::new();
        let mut last = bird.rotation;
        for _ in 0..200 {
            PhysicsSystem::step_bird(&mut bird);
            assert!(bird.rotation >= last, "rotation went back up");
            assert!(bird.rotation <= MAX_ROTATION);
            last = bird.rotation;
        }
        assert_eq!(bird.rotation, MAX_ROTATION);
    }

    #[test]
    fn rotation_never_leaves_range_after_flaps() {
        let mut bird = BirdState::new();
        for i in 0..300 {
            if i % 17 == 0 {
                bird.jump();
            }
            PhysicsSystem::step_bird(&mut bird);
            assert!((MIN_ROTATION..=MAX_ROTATION).contains(&bird.rotation));
        }
    }

    #[test]
    fn jump_overrides_prior_state() {
        let mut bird = BirdState {
            y: 400.0,
            velocity: 9.0,
            rotation: 1.2,
            dead: false,
            score: 3,
        };
        assert!(bird.jump());
        assert_eq!(bird.velocity, JUMP_VELOCITY);
        assert_eq!(bird.rotation, MIN_ROTATION);
        assert_eq!(bird.y, 400.0);
    }

    #[test]
    fn jump_is_noop_when_dead() {
        let mut bird = BirdState::new();
        bird.velocity = 3.0;
        bird.rotation = 0.7;
        bird.kill();
        let before = bird;
        assert!(!bird.jump());
        assert_eq!(bird, before);
    }

    #[test]
    fn kill_is_idempotent() {
        let mut once = BirdState::new();
        let mut twice = BirdState::new();
        assert!(once.kill());
        assert!(twice.kill());
        assert!(!twice.kill());
        assert_eq!(once, twice);
    }

    #[test]
    fn floor_clamps_and_reports_contact() {
        let mut bird = BirdState::new();
        bird.y = GROUND_Y - HITBOX_HEIGHT / 2.0 - 1.0;
        bird.velocity = 5.0;
        assert_eq!(PhysicsSystem::step_bird(&mut bird), BoundaryContact::Floor);
        assert_eq!(bird.y, GROUND_Y - HITBOX_HEIGHT / 2.0);
    }

    #[test]
    fn ceiling_blocks_without_killing() {
        let mut bird = BirdState::new();
        bird.y = HITBOX_HEIGHT / 2.0 + 2.0;
        bird.velocity = JUMP_VELOCITY;
        assert_eq!(PhysicsSystem::step_bird(&mut bird), BoundaryContact::Ceiling);
        assert_eq!(bird.y, HITBOX_HEIGHT / 2.0);
        assert_eq!(bird.velocity, 0.0);
        assert!(!bird.dead);
    }
}
