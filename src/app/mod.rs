//! Application layer: game client loop, headless driver, relay server state

pub mod client;
pub mod driver;
pub mod state;

pub use state::AppState;
