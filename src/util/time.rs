//! Time utilities for the fixed-step game loop

use std::time::{Duration, Instant};

/// Process start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize process start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Frame rate configuration: one simulation step per frame
pub const SIMULATION_FPS: u32 = 60;
pub const UPDATE_RATE: u32 = 15; // UPDATE messages per second
pub const UPDATE_INTERVAL_STEPS: u32 = SIMULATION_FPS / UPDATE_RATE;

/// Host countdown between PREPARE and START
pub const COUNTDOWN_MS: u64 = 3_000;
/// Single-player pause between death and the results screen
pub const DEATH_DELAY_MS: u64 = 800;

/// Duration of one frame
pub fn frame_duration() -> Duration {
    Duration::from_micros(1_000_000 / SIMULATION_FPS as u64)
}

/// Convert a wall-clock delay into a whole number of frames (rounded up)
pub fn ms_to_frames(ms: u64) -> u64 {
    (ms * SIMULATION_FPS as u64).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_convert_to_frames() {
        assert_eq!(ms_to_frames(COUNTDOWN_MS), 180);
        assert_eq!(ms_to_frames(DEATH_DELAY_MS), 48);
        assert_eq!(ms_to_frames(1), 1);
        assert_eq!(UPDATE_INTERVAL_STEPS, 4);
    }
}
