//! Networking: peer protocol, transports and the relay broker

pub mod handler;
pub mod protocol;
pub mod relay;
pub mod room;
pub mod sync;
pub mod transport;
pub mod ws_transport;

