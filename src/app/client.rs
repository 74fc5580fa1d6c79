//! The per-frame game loop body and player actions

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::game::session::{Delayed, TransitionError};
use crate::game::sim::SimEvent;
use crate::game::{GameMode, Outcome, Role, Session, Simulator, Snapshot};
use crate::net::protocol::PeerMsg;
use crate::net::room::{RoomCode, RoomCodeError};
use crate::net::sync::SyncProtocol;
use crate::net::transport::{Connector, Transport, TransportError, TransportEvent};
use crate::util::time::{ms_to_frames, COUNTDOWN_MS, DEATH_DELAY_MS};

/// Player input, already mapped from keys/buttons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    PlaySingle,
    Host,
    Join(String),
    Jump,
    Replay,
    Menu,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Invalid room code: {0}")]
    RoomCode(#[from] RoomCodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One game instance: session, simulator and the peer link.
pub struct GameClient {
    session: Session,
    sim: Simulator,
    sync: SyncProtocol,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    rng: ChaCha8Rng,
    frame: u64,
    room_code: Option<RoomCode>,
    pending_join: Option<RoomCode>,
    resolved: Vec<Outcome>,
}

impl GameClient {
    pub fn new(connector: Box<dyn Connector>, seed: u64) -> Self {
        Self {
            session: Session::new(),
            sim: Simulator::new(seed),
            sync: SyncProtocol::new(),
            connector,
            transport: None,
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x5eed),
            frame: 0,
            room_code: None,
            pending_join: None,
            resolved: Vec::new(),
        }
    }

    pub fn mode(&self) -> GameMode {
        self.session.mode()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Outcomes resolved since the last call, oldest first
    pub fn drain_outcomes(&mut self) -> Vec<Outcome> {
        std::mem::take(&mut self.resolved)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(
            self.frame,
            &self.session,
            &self.sim,
            self.room_code.as_ref().map(RoomCode::as_str),
        )
    }

    /// Apply a player action. Failures leave the session in a valid mode and
    /// are also reflected in the status line.
    pub fn handle(&mut self, action: UiAction) -> Result<(), ClientError> {
        let result = match action {
            UiAction::PlaySingle => self.play_single(),
            UiAction::Host => self.host(),
            UiAction::Join(code) => self.join(&code),
            UiAction::Jump => {
                if self.session.mode() == GameMode::Playing {
                    self.sim.jump();
                }
                Ok(())
            }
            UiAction::Replay => self.replay(),
            UiAction::Menu => {
                self.teardown();
                self.session.set_status("");
                Ok(())
            }
        };
        if let Err(e) = &result {
            self.session.set_status(e.to_string());
        }
        result
    }

    fn play_single(&mut self) -> Result<(), ClientError> {
        self.session.choose_role(Role::Single)?;
        self.sim.reset(false);
        self.session.set_status("");
        info!("Single-player run started");
        Ok(())
    }

    fn host(&mut self) -> Result<(), ClientError> {
        self.session.choose_role(Role::Host)?;
        let code = RoomCode::generate(&mut self.rng);
        match self.connector.open(code.clone()) {
            Ok(transport) => {
                info!(room = %code, "Opening room");
                self.transport = Some(transport);
                self.room_code = Some(code);
                self.session.set_status("Opening room...");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e.into())
            }
        }
    }

    fn join(&mut self, input: &str) -> Result<(), ClientError> {
        let target = RoomCode::parse(input)?;
        self.session.choose_role(Role::Client)?;

        let local_id = loop {
            let id = RoomCode::generate(&mut self.rng);
            if id != target {
                break id;
            }
        };
        match self.connector.open(local_id) {
            Ok(transport) => {
                info!(room = %target, "Joining room");
                self.transport = Some(transport);
                self.room_code = Some(target.clone());
                self.pending_join = Some(target);
                self.session.set_status("Connecting...");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e.into())
            }
        }
    }

    fn replay(&mut self) -> Result<(), ClientError> {
        if self.session.mode() != GameMode::Gameover {
            return Err(TransitionError {
                from: self.session.mode(),
                to: GameMode::Playing,
            }
            .into());
        }
        match self.session.role() {
            Some(Role::Single) | None => {
                self.sim.reset(false);
                self.session.begin_match()?;
            }
            Some(_) => {
                if !self.transport.as_ref().is_some_and(|t| t.is_connected()) {
                    return Err(TransportError::NotOpen.into());
                }
                self.sync.reset_for_match(&mut self.sim);
                self.send(&PeerMsg::Start);
                self.session.begin_match()?;
            }
        }
        self.session.set_status("");
        info!("Replay");
        Ok(())
    }

    /// Run one loop iteration: network, timers, one fixed step, outbound messages.
    pub fn frame(&mut self) -> Snapshot {
        self.frame += 1;

        self.drain_transport();
        self.fire_due();

        if self.session.mode().simulates() {
            let spawn = self.session.mode() == GameMode::Playing
                && self.session.role().is_some_and(Role::is_authority);
            let events = self.sim.step(spawn);

            for msg in self.sync.outbound(&self.session, &self.sim, &events) {
                self.send(&msg);
            }
            for event in &events {
                if let SimEvent::Died { score } = *event {
                    self.on_local_death(score);
                }
            }
        }

        self.snapshot()
    }

    fn drain_transport(&mut self) {
        let mut events = Vec::new();
        if let Some(transport) = self.transport.as_mut() {
            while let Some(event) = transport.poll_event() {
                events.push(event);
            }
        }
        for event in events {
            self.on_transport_event(event);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open { local_id } => {
                debug!(local_id = %local_id, "Transport open");
                if let Some(target) = self.pending_join.take() {
                    let result = match self.transport.as_mut() {
                        Some(transport) => transport.connect(&target),
                        None => Err(TransportError::NotOpen),
                    };
                    if let Err(e) = result {
                        self.fail(e.to_string());
                    }
                } else if self.session.role() == Some(Role::Host) {
                    self.session.set_status("Waiting for opponent");
                }
            }
            TransportEvent::Connected { peer_id } => {
                info!(peer = %peer_id, "Peer connected");
                if self.session.role() == Some(Role::Host)
                    && self.session.mode() == GameMode::Lobby
                {
                    self.send(&PeerMsg::Prepare);
                    if let Err(e) = self.session.transition(GameMode::Countdown) {
                        warn!(error = %e, "Could not start countdown");
                        return;
                    }
                    self.session.schedule(
                        Delayed::StartMatch,
                        self.frame + ms_to_frames(COUNTDOWN_MS),
                    );
                    self.session.set_status("Get ready");
                } else {
                    self.session.set_status("Connected, waiting for host");
                }
            }
            TransportEvent::Data(msg) => {
                if let Some(outcome) = self.sync.apply(msg, &mut self.session, &mut self.sim) {
                    self.resolved.push(outcome);
                }
            }
            TransportEvent::Closed => self.fail("disconnected".to_string()),
            TransportEvent::Error(e) => self.fail(e.to_string()),
        }
    }

    fn fire_due(&mut self) {
        match self.session.take_due(self.frame) {
            Some(Delayed::ShowGameover) => {
                if let Some(outcome) = self.session.finish_solo() {
                    self.resolved.push(outcome);
                }
            }
            Some(Delayed::StartMatch) => {
                self.sync.reset_for_match(&mut self.sim);
                self.send(&PeerMsg::Start);
                match self.session.begin_match() {
                    Ok(()) => {
                        self.session.set_status("");
                        info!(room = ?self.room_code.as_ref().map(RoomCode::as_str), "Match started");
                    }
                    Err(e) => warn!(error = %e, "Could not start match"),
                }
            }
            None => {}
        }
    }

    fn on_local_death(&mut self, score: u32) {
        self.session.record_local_death(score);
        match self.session.role() {
            Some(Role::Single) => {
                self.session.schedule(
                    Delayed::ShowGameover,
                    self.frame + ms_to_frames(DEATH_DELAY_MS),
                );
            }
            Some(_) => match self.session.try_resolve_outcome() {
                Some(outcome) => self.resolved.push(outcome),
                None => self.session.set_status("Waiting for opponent"),
            },
            None => {}
        }
    }

    fn send(&mut self, msg: &PeerMsg) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.send(msg) {
            debug!(kind = msg.kind(), error = %e, "Dropped outbound message");
        }
    }

    /// Recoverable network failure: record an unresolved result if a match
    /// was running, then back to the menu.
    fn fail(&mut self, status: String) {
        warn!(status = %status, mode = ?self.session.mode(), "Peer link lost");
        let in_match = self.session.mode() == GameMode::Playing
            && self.session.role().is_some_and(Role::is_multiplayer);
        if in_match {
            if let Some(outcome) = self.session.abandon_match(self.sim.local().score) {
                self.resolved.push(outcome);
            }
        }
        self.teardown();
        self.session.set_status(status);
    }

    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.pending_join = None;
        self.room_code = None;
        self.session.return_to_menu();
        self.sim.reset(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::BIRD_START_Y;
    use crate::game::Winner;
    use crate::net::transport::LocalNetwork;

    fn pair() -> (GameClient, GameClient) {
        let net = LocalNetwork::new();
        (
            GameClient::new(Box::new(net.clone()), 1),
            GameClient::new(Box::new(net), 2),
        )
    }

    fn run_both(a: &mut GameClient, b: &mut GameClient, frames: usize) {
        for _ in 0..frames {
            a.frame();
            b.frame();
        }
    }

    /// Host and join, then run until both sides are playing
    fn start_duel() -> (GameClient, GameClient) {
        let (mut host, mut client) = pair();
        host.handle(UiAction::Host).unwrap();
        let code = host.frame().room_code.unwrap();
        assert_eq!(host.mode(), GameMode::Lobby);

        client.handle(UiAction::Join(code.to_lowercase())).unwrap();
        assert_eq!(client.mode(), GameMode::Joining);
        run_both(&mut client, &mut host, 2);
        assert_eq!(host.mode(), GameMode::Countdown);
        assert_eq!(client.mode(), GameMode::Countdown);

        for _ in 0..200 {
            if host.mode() == GameMode::Playing && client.mode() == GameMode::Playing {
                break;
            }
            run_both(&mut host, &mut client, 1);
        }
        assert_eq!(host.mode(), GameMode::Playing);
        assert_eq!(client.mode(), GameMode::Playing);
        (host, client)
    }

    #[test]
    fn single_player_gameover_after_death_delay() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        game.handle(UiAction::PlaySingle).unwrap();

        let mut died_at = None;
        for _ in 0..200 {
            let snap = game.frame();
            if snap.local.dead {
                died_at = Some(snap.frame);
                break;
            }
        }
        let died_at = died_at.expect("bird never hit the floor");

        for _ in 0..ms_to_frames(DEATH_DELAY_MS) - 1 {
            assert_eq!(game.frame().mode, GameMode::Playing);
        }
        let snap = game.frame();
        assert_eq!(snap.frame, died_at + ms_to_frames(DEATH_DELAY_MS));
        assert_eq!(snap.mode, GameMode::Gameover);
        let outcome = snap.outcome.unwrap();
        assert_eq!(outcome.winner, Winner::Undecided);
        assert_eq!(outcome.opponent_score, None);
        assert_eq!(game.drain_outcomes(), vec![outcome]);
    }

    #[test]
    fn menu_after_gameover_clears_results() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        game.handle(UiAction::PlaySingle).unwrap();
        while game.frame().mode != GameMode::Gameover {}
        assert!(game.snapshot().outcome.is_some());

        game.handle(UiAction::Menu).unwrap();
        assert_eq!(game.frame().outcome, None);
        assert_eq!(game.drain_outcomes().len(), 1);
    }

    #[test]
    fn menu_cancels_pending_gameover() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        game.handle(UiAction::PlaySingle).unwrap();
        while !game.frame().local.dead {}

        game.handle(UiAction::Menu).unwrap();
        for _ in 0..100 {
            let snap = game.frame();
            assert_eq!(snap.mode, GameMode::Menu);
            assert_eq!(snap.outcome, None);
        }
    }

    #[test]
    fn single_replay_resets_everything() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        game.handle(UiAction::PlaySingle).unwrap();
        while game.frame().mode != GameMode::Gameover {}

        game.handle(UiAction::Replay).unwrap();
        let snap = game.snapshot();
        assert_eq!(snap.mode, GameMode::Playing);
        assert_eq!(snap.local.score, 0);
        assert_eq!(snap.local.y, BIRD_START_Y);
        assert!(!snap.local.dead);
        assert!(snap.pipes.is_empty());
        assert_eq!(snap.outcome, None);
    }

    #[test]
    fn jump_ignored_outside_play() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        game.handle(UiAction::Jump).unwrap();
        assert_eq!(game.snapshot().local.velocity, 0.0);
        assert!(game.handle(UiAction::Replay).is_err());
        assert_eq!(game.mode(), GameMode::Menu);
    }

    #[test]
    fn bad_room_code_stays_in_menu() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        assert!(matches!(
            game.handle(UiAction::Join("TOOLONG".into())),
            Err(ClientError::RoomCode(_))
        ));
        assert_eq!(game.mode(), GameMode::Menu);
        assert!(!game.snapshot().status.is_empty());
    }

    #[test]
    fn join_unknown_room_returns_to_menu() {
        let mut game = GameClient::new(Box::new(LocalNetwork::new()), 7);
        game.handle(UiAction::Join("NOPE".into())).unwrap();
        let snap = game.frame();
        assert_eq!(snap.mode, GameMode::Menu);
        assert!(snap.status.contains("NOPE"));
        assert_eq!(snap.outcome, None);
    }

    #[test]
    fn duel_resolves_identically_on_both_sides() {
        let (mut host, mut client) = start_duel();

        // The client mirrors the host's pipes
        run_both(&mut host, &mut client, 3);
        assert_eq!(client.snapshot().pipes.len(), 1);
        assert_eq!(client.snapshot().pipes, host.snapshot().pipes);

        // Host flaps for a while, client just falls
        for i in 0..60 {
            if i % 20 == 0 {
                host.handle(UiAction::Jump).unwrap();
            }
            run_both(&mut host, &mut client, 1);
        }
        assert!(client.snapshot().local.dead);
        assert_eq!(client.mode(), GameMode::Playing);

        for _ in 0..300 {
            if host.mode() == GameMode::Gameover && client.mode() == GameMode::Gameover {
                break;
            }
            run_both(&mut host, &mut client, 1);
        }
        let host_outcome = host.snapshot().outcome.unwrap();
        let client_outcome = client.snapshot().outcome.unwrap();
        assert_eq!(host_outcome.opponent_score, Some(client_outcome.final_score));
        assert_eq!(client_outcome.opponent_score, Some(host_outcome.final_score));
        assert_eq!(host.drain_outcomes(), vec![host_outcome]);
        assert_eq!(client.drain_outcomes(), vec![client_outcome]);

        let expected_host = Winner::decide(host_outcome.final_score, client_outcome.final_score);
        assert_eq!(host_outcome.winner, expected_host);
    }

    #[test]
    fn multiplayer_replay_restarts_both_sides() {
        let (mut host, mut client) = start_duel();
        for _ in 0..400 {
            if host.mode() == GameMode::Gameover && client.mode() == GameMode::Gameover {
                break;
            }
            run_both(&mut host, &mut client, 1);
        }
        assert_eq!(host.snapshot().outcome.unwrap().winner, Winner::Draw);

        client.handle(UiAction::Replay).unwrap();
        assert_eq!(client.mode(), GameMode::Playing);
        host.frame();
        let snap = host.snapshot();
        assert_eq!(snap.mode, GameMode::Playing);
        assert_eq!(snap.local.score, 0);
        assert_eq!(snap.outcome, None);
        assert!(!snap.opponent.unwrap().dead);
    }

    #[test]
    fn disconnect_mid_match_leaves_outcome_unresolved() {
        let (mut host, mut client) = start_duel();
        run_both(&mut host, &mut client, 5);

        host.handle(UiAction::Menu).unwrap();
        let snap = client.frame();
        assert_eq!(snap.mode, GameMode::Menu);
        assert_eq!(snap.status, "disconnected");
        assert_eq!(snap.outcome, None);

        let outcomes = client.drain_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winner, Winner::Undecided);
        assert_eq!(outcomes[0].opponent_score, None);
    }
}
