//! deskmcp Server - Axum-based HTTP API and signaling WebSocket server
//!
//! This crate exposes the pairing/device-management API and the persistent
//! signaling connection that authenticated devices use to exchange
//! negotiation payloads with the orchestrating side.

pub mod http;
pub mod relay;
pub mod sessions;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use relay::{RelayEvent, SignalingRelay};
pub use sessions::{ConnectionHandle, SessionRegistry};
pub use state::AppState;
