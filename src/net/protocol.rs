//! Wire message definitions
//! Peer messages are what the two game instances say to each other; relay
//! frames are the envelope used between a game instance and the relay broker.

use serde::{Deserialize, Serialize};

use crate::game::BirdState;

/// Messages exchanged between the two participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMsg {
    /// Host tells the client a countdown is starting
    Prepare,

    /// (Re)start a match: receiver resets its simulation
    Start,

    /// Throttled bird state of the sender
    Update {
        y: f32,
        velocity: f32,
        rotation: f32,
        dead: bool,
        score: u32,
    },

    /// Host-spawned pipe
    Pipe {
        #[serde(rename = "gapTop")]
        gap_top: f32,
        id: u64,
    },

    /// Sender's bird is dead; `score` is final
    GameoverSync { score: u32 },

    /// Any `type` this build does not know about
    #[serde(other)]
    Unknown,
}

impl PeerMsg {
    pub fn update(bird: &BirdState) -> Self {
        PeerMsg::Update {
            y: bird.y,
            velocity: bird.velocity,
            rotation: bird.rotation,
            dead: bird.dead,
            score: bird.score,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerMsg::Prepare => "PREPARE",
            PeerMsg::Start => "START",
            PeerMsg::Update { .. } => "UPDATE",
            PeerMsg::Pipe { .. } => "PIPE",
            PeerMsg::GameoverSync { .. } => "GAMEOVER_SYNC",
            PeerMsg::Unknown => "UNKNOWN",
        }
    }
}

/// Frames between a game instance and the relay broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Relay -> instance: identity registered
    Open { id: String },

    /// Instance -> relay: link me with this id
    Connect { to: String },

    /// Relay -> instance: link established
    Connected { peer: String },

    /// Either direction: opaque peer message
    Data { payload: serde_json::Value },

    /// Relay -> instance: the linked peer went away
    Closed,

    /// Relay -> instance: request failed
    Error { message: String },
}

/// Decoding failures at the transport boundary
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn decode_peer(text: &str) -> Result<PeerMsg, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_peer_value(value: serde_json::Value) -> Result<PeerMsg, ProtocolError> {
    Ok(serde_json::from_value(value)?)
}

pub fn encode_peer(msg: &PeerMsg) -> Result<serde_json::Value, ProtocolError> {
    Ok(serde_json::to_value(msg)?)
}
