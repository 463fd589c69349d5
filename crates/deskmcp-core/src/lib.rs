//! deskmcp Core - Shared types and protocol definitions
//!
//! This crate provides the foundational types used across all deskmcp components.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{DeviceMessage, ServerMessage};
