//! Game simulation modules

pub mod physics;
pub mod pipes;
pub mod session;
pub mod sim;
pub mod snapshot;

pub use physics::BirdState;
pub use session::{GameMode, Outcome, Role, Session, Winner};
pub use sim::{SimEvent, Simulator};
pub use snapshot::{RenderAdapter, Snapshot};
