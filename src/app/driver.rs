//! Headless frame driver: runs game clients at a fixed rate with an
//! autopilot standing in for the player.

use anyhow::{bail, Context};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, RunMode};
use crate::game::pipes::GAP_HEIGHT;
use crate::game::physics::BIRD_START_Y;
use crate::game::{GameMode, Outcome, RenderAdapter, Role, Snapshot};
use crate::net::transport::LocalNetwork;
use crate::net::ws_transport::{RelayConnector, RetryPolicy};
use crate::util::time::frame_duration;

use super::client::{GameClient, UiAction};

/// Frames spent on the results screen before the autopilot replays
const REPLAY_PAUSE_FRAMES: u32 = 60;
/// Frames the autopilot stops flapping after a blunder
const BLUNDER_FRAMES: u32 = 25;

/// Flaps toward the middle of the next gap, with occasional blunders so
/// runs end on their own.
pub struct Autopilot {
    rng: ChaCha8Rng,
    blunder_rate: f64,
    blunder_left: u32,
}

impl Autopilot {
    pub fn new(seed: u64, blunder_rate: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            blunder_rate: blunder_rate.clamp(0.0, 1.0),
            blunder_left: 0,
        }
    }

    /// Never blunders
    pub fn flawless(seed: u64) -> Self {
        Self::new(seed, 0.0)
    }

    pub fn wants_jump(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.mode != GameMode::Playing || snapshot.local.dead {
            return false;
        }
        if self.blunder_left > 0 {
            self.blunder_left -= 1;
            return false;
        }
        if self.rng.gen_bool(self.blunder_rate) {
            self.blunder_left = BLUNDER_FRAMES;
            return false;
        }

        let target = snapshot
            .next_pipe()
            .map(|pipe| pipe.gap_top + GAP_HEIGHT * 0.6)
            .unwrap_or(BIRD_START_Y + 10.0);
        snapshot.local.y > target && snapshot.local.velocity > 0.0
    }
}

/// Renderer that writes the interesting frames to the log
pub struct TraceRenderer {
    label: &'static str,
    last_mode: Option<GameMode>,
    last_score: u32,
}

impl TraceRenderer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            last_mode: None,
            last_score: 0,
        }
    }
}

impl RenderAdapter for TraceRenderer {
    fn render(&mut self, snapshot: &Snapshot) {
        if self.last_mode != Some(snapshot.mode) {
            info!(
                player = self.label,
                mode = ?snapshot.mode,
                room = ?snapshot.room_code,
                status = %snapshot.status,
                "Mode changed"
            );
            self.last_mode = Some(snapshot.mode);
        }
        if snapshot.local.score != self.last_score {
            debug!(player = self.label, score = snapshot.local.score, "Score");
            self.last_score = snapshot.local.score;
        }
        if let Some(outcome) = snapshot.outcome.filter(|_| snapshot.mode == GameMode::Gameover) {
            debug!(
                player = self.label,
                frame = snapshot.frame,
                winner = ?outcome.winner,
                "Results screen"
            );
        }
    }
}

/// A client together with its input source and renderer
pub struct Player {
    client: GameClient,
    pilot: Autopilot,
    renderer: TraceRenderer,
    outcomes: Vec<Outcome>,
    gameover_frames: u32,
    started: bool,
}

impl Player {
    pub fn new(label: &'static str, client: GameClient, pilot: Autopilot) -> Self {
        Self {
            client,
            pilot,
            renderer: TraceRenderer::new(label),
            outcomes: Vec::new(),
            gameover_frames: 0,
            started: false,
        }
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Back in the menu after having left it: the run is over
    pub fn dropped_out(&self) -> bool {
        self.started && self.client.mode() == GameMode::Menu
    }

    pub fn act(&mut self, action: UiAction) -> anyhow::Result<()> {
        self.client.handle(action)?;
        self.started = true;
        Ok(())
    }

    /// One frame: step the client, render, then feed input for the next frame
    pub fn tick(&mut self, rounds: usize) {
        let snapshot = self.client.frame();
        self.renderer.render(&snapshot);
        self.outcomes.extend(self.client.drain_outcomes());

        if self.pilot.wants_jump(&snapshot) {
            let _ = self.client.handle(UiAction::Jump);
        }

        if snapshot.mode != GameMode::Gameover {
            self.gameover_frames = 0;
            return;
        }
        self.gameover_frames += 1;

        // The client waits for the host's START
        let replays = snapshot.role != Some(Role::Client);
        if replays && self.outcomes.len() < rounds && self.gameover_frames >= REPLAY_PAUSE_FRAMES {
            if let Err(e) = self.client.handle(UiAction::Replay) {
                warn!(error = %e, "Replay failed");
            }
        }
    }
}

/// Host and client in one process over an in-memory network
pub struct DuelRig {
    pub host: Player,
    pub client: Player,
}

impl DuelRig {
    pub fn new(seed: u64, blunder_rate: f64) -> anyhow::Result<Self> {
        let network = LocalNetwork::new();
        let mut host = Player::new(
            "host",
            GameClient::new(Box::new(network.clone()), seed),
            Autopilot::new(seed.wrapping_add(1), blunder_rate),
        );
        let mut client = Player::new(
            "client",
            GameClient::new(Box::new(network), seed.wrapping_add(2)),
            Autopilot::new(seed.wrapping_add(3), blunder_rate),
        );

        host.act(UiAction::Host)?;
        let code = host
            .client
            .snapshot()
            .room_code
            .context("host has no room code")?;
        client.act(UiAction::Join(code))?;

        Ok(Self { host, client })
    }

    pub fn tick(&mut self, rounds: usize) {
        self.host.tick(rounds);
        self.client.tick(rounds);
    }

    pub fn finished(&self, rounds: usize) -> bool {
        (self.host.outcomes.len() >= rounds && self.client.outcomes.len() >= rounds)
            || self.host.dropped_out()
            || self.client.dropped_out()
    }
}

fn frame_ticker() -> tokio::time::Interval {
    let mut ticker = interval(frame_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn seed_from(config: &Config) -> u64 {
    config.seed.unwrap_or_else(rand::random)
}

/// Single, host or join over the relay with the autopilot at the controls
pub async fn run_headless(config: &Config) -> anyhow::Result<Vec<Outcome>> {
    let first = match config.mode {
        RunMode::Single => UiAction::PlaySingle,
        RunMode::Host => UiAction::Host,
        RunMode::Join => UiAction::Join(
            config
                .room_code
                .clone()
                .context("ROOM_CODE is required to join")?,
        ),
        other => bail!("{:?} is not a headless player mode", other),
    };

    let seed = seed_from(config);
    let rounds = config.rounds.max(1) as usize;
    let connector = RelayConnector::new(config.relay_url.clone(), RetryPolicy::default());
    let mut player = Player::new(
        "local",
        GameClient::new(Box::new(connector), seed),
        Autopilot::new(seed.wrapping_add(1), 0.004),
    );
    player.act(first)?;
    info!(mode = ?config.mode, seed, rounds, "Headless run started");

    let mut ticker = frame_ticker();
    while player.outcomes.len() < rounds && player.client.frame_count() < config.max_frames {
        ticker.tick().await;
        player.tick(rounds);
        if player.dropped_out() {
            warn!(status = %player.client.snapshot().status, "Left the match");
            break;
        }
    }

    if player.outcomes.len() < rounds {
        warn!(
            played = player.outcomes.len(),
            rounds,
            frames = player.client.frame_count(),
            "Run ended early"
        );
    }
    Ok(player.outcomes)
}

/// Outcomes of a local duel, one list per side
#[derive(Debug, Clone)]
pub struct DuelReport {
    pub host: Vec<Outcome>,
    pub client: Vec<Outcome>,
}

/// HOST and CLIENT in this process, connected over [`LocalNetwork`]
pub async fn run_duel(config: &Config) -> anyhow::Result<DuelReport> {
    let seed = seed_from(config);
    let rounds = config.rounds.max(1) as usize;
    let mut rig = DuelRig::new(seed, 0.004)?;
    info!(seed, rounds, "Local duel started");

    let mut ticker = frame_ticker();
    while !rig.finished(rounds) && rig.host.client.frame_count() < config.max_frames {
        ticker.tick().await;
        rig.tick(rounds);
    }

    Ok(DuelReport {
        host: rig.host.outcomes,
        client: rig.client.outcomes,
    })
}
