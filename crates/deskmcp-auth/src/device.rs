//! Device identity and registry records
//!
//! A device is a distinct remote endpoint identified by a generated opaque
//! identifier, independent of its network address.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Unique identifier for a paired device: 8 random bytes, hex-encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a new random device ID (16 lowercase hex chars)
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse an existing identifier, rejecting anything that is not
    /// 16 lowercase hex characters
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.len() == 16 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("invalid device id: {s}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A paired device record
///
/// `token_hash` never leaves this crate; API responses use the redacted
/// [`DeviceInfo`] projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier
    pub id: DeviceId,
    /// Human-readable device name
    pub name: String,
    /// Platform hint ("linux", "macos", "windows")
    pub platform: Option<String>,
    /// Client software version at pairing time
    pub client_version: Option<String>,
    /// HMAC of the issued bearer token
    pub token_hash: String,
    /// When this device was first paired
    pub paired_at: DateTime<Utc>,
    /// Last successful token verification
    pub last_seen: DateTime<Utc>,
    /// Source address observed at the last verification
    pub ip: Option<String>,
    /// Cleared by the cleanup sweep after prolonged inactivity
    pub is_active: bool,
}

impl Device {
    pub fn new(
        id: DeviceId,
        name: String,
        platform: Option<String>,
        client_version: Option<String>,
        token_hash: String,
        ip: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            platform,
            client_version,
            token_hash,
            paired_at: now,
            last_seen: now,
            ip,
            is_active: true,
        }
    }

    /// Record a successful verification from the given address
    pub fn touch(&mut self, ip: Option<&str>) {
        self.last_seen = Utc::now();
        self.is_active = true;
        if let Some(ip) = ip {
            self.ip = Some(ip.to_string());
        }
    }
}

/// Redacted device record for API responses; carries no token material
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub platform: Option<String>,
    pub client_version: Option<String>,
    pub paired_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ip: Option<String>,
    pub is_active: bool,
}

impl From<&Device> for DeviceInfo {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.to_string(),
            name: device.name.clone(),
            platform: device.platform.clone(),
            client_version: device.client_version.clone(),
            paired_at: device.paired_at,
            last_seen: device.last_seen,
            ip: device.ip.clone(),
            is_active: device.is_active,
        }
    }
}
