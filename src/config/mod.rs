//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// What this process does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Serve the relay broker
    Relay,
    /// Headless single-player run
    Single,
    /// Headless host over the relay
    Host,
    /// Headless client over the relay
    Join,
    /// Host and client in one process over an in-memory transport
    Duel,
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" => Ok(RunMode::Relay),
            "single" => Ok(RunMode::Single),
            "host" => Ok(RunMode::Host),
            "join" => Ok(RunMode::Join),
            "duel" => Ok(RunMode::Duel),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub mode: RunMode,
    /// Relay binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed browser origins for the relay's HTTP routes
    pub client_origin: Option<String>,

    /// Base WebSocket URL of the relay (host/join)
    pub relay_url: String,
    /// Room to join (join mode)
    pub room_code: Option<String>,
    /// Matches to play before exiting (headless modes)
    pub rounds: u32,
    /// Hard stop for headless runs, in frames
    pub max_frames: u64,
    /// Simulation seed; random when unset
    pub seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match env::var("MODE") {
            Ok(value) => value.parse()?,
            Err(_) => RunMode::Relay,
        };

        // PORT wins over SERVER_ADDR, like most hosting platforms expect
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let room_code = env::var("ROOM_CODE").ok().filter(|s| !s.trim().is_empty());
        if mode == RunMode::Join && room_code.is_none() {
            return Err(ConfigError::Missing("ROOM_CODE"));
        }

        Ok(Self {
            mode,
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").ok(),

            relay_url: env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080".to_string()),
            room_code,
            rounds: parse_var("ROUNDS", 1)?,
            max_frames: parse_var("MAX_FRAMES", 60 * 60 * 5)?,
            seed: match env::var("SEED") {
                Ok(v) => Some(v.parse().map_err(|_| ConfigError::Invalid("SEED"))?),
                Err(_) => None,
            },
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Unknown MODE {0:?} (expected relay, single, host, join or duel)")]
    InvalidMode(String),

    #[error("Invalid server address format")]
    InvalidAddress,
}
