//! Signaling protocol message types
//!
//! All messages are JSON objects carrying a `type` field. Control messages
//! (`auth`, `pair`, `ping`, `pong`) are parsed into typed structs; everything
//! else (`offer`, `answer`, `ice-candidate`, tool commands) is treated as an
//! opaque payload and relayed without inspecting its contents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// WebSocket close code sent on authentication failure or timeout
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Authentication request carrying a previously issued bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

/// Device details supplied when completing a pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEnrollment {
    /// Human-readable device name (e.g., "Workstation", "Build Agent 3")
    pub device_name: String,
    /// Platform hint ("linux", "macos", "windows")
    #[serde(default)]
    pub platform: Option<String>,
    /// Client software version
    #[serde(default)]
    pub version: Option<String>,
}

/// Pairing request carrying the 6-digit code and device details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub code: String,
    pub data: DeviceEnrollment,
}

/// Inbound message from a device connection
#[derive(Debug, Clone)]
pub enum DeviceMessage {
    /// Authenticate with a bearer token
    Auth(AuthRequest),
    /// Complete pairing with a code
    Pair(PairRequest),
    /// Keepalive ping
    Ping,
    /// Reply to a server ping
    Pong,
    /// Any other typed message; the full envelope is kept as-is for relaying
    Signal { kind: String, payload: Value },
}

/// Parse a raw JSON text frame into a [`DeviceMessage`]
///
/// Unknown `type` values are not an error: they become `Signal` messages
/// whose payload is the unmodified envelope.
pub fn parse_device_message(text: &str) -> Result<DeviceMessage> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidMessage("missing 'type' field".to_string()))?
        .to_string();

    match kind.as_str() {
        "auth" => {
            let req: AuthRequest = serde_json::from_value(value)
                .map_err(|e| Error::InvalidMessage(format!("bad auth message: {e}")))?;
            Ok(DeviceMessage::Auth(req))
        }
        "pair" => {
            let req: PairRequest = serde_json::from_value(value)
                .map_err(|e| Error::InvalidMessage(format!("bad pair message: {e}")))?;
            Ok(DeviceMessage::Pair(req))
        }
        "ping" => Ok(DeviceMessage::Ping),
        "pong" => Ok(DeviceMessage::Pong),
        _ => Ok(DeviceMessage::Signal {
            kind,
            payload: value,
        }),
    }
}

/// Server-to-device control messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Result of an `auth` request
    #[serde(rename_all = "camelCase")]
    AuthResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_info: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Result of a `pair` request; `token` is present exactly once, on success
    #[serde(rename_all = "camelCase")]
    PairResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_info: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Error message for malformed or premature frames
    Error { message: String },
    /// Keepalive ping
    Ping,
    /// Reply to a device ping
    Pong,
}

impl ServerMessage {
    /// Successful auth response with the redacted device record
    pub fn auth_ok(device_info: Value) -> Self {
        ServerMessage::AuthResponse {
            success: true,
            device_info: Some(device_info),
            error: None,
        }
    }

    /// Failed auth response
    pub fn auth_err(error: impl Into<String>) -> Self {
        ServerMessage::AuthResponse {
            success: false,
            device_info: None,
            error: Some(error.into()),
        }
    }

    /// Successful pair response carrying the one-time raw token
    pub fn pair_ok(token: String, device_info: Value) -> Self {
        ServerMessage::PairResponse {
            success: true,
            token: Some(token),
            device_info: Some(device_info),
            error: None,
        }
    }

    /// Failed pair response
    pub fn pair_err(error: impl Into<String>) -> Self {
        ServerMessage::PairResponse {
            success: false,
            token: None,
            device_info: None,
            error: Some(error.into()),
        }
    }
}
