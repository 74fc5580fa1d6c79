//! HTTP layer for the relay broker

pub mod routes;

pub use routes::build_router;
