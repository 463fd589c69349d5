//! Pairing code issuance and token verification
//!
//! Implements the trust bootstrap flow:
//! 1. Operator starts a pairing window, producing a one-time 6-digit code
//! 2. Client submits the code with its device details
//! 3. Upon verification the server issues a bearer token and stores only
//!    its HMAC, bound to the new device record
//! 4. The token authenticates all subsequent connections
//!
//! Only one code can be pending at a time. Starting a new window replaces
//! it (last-write-wins); the replacement is logged so an operator display
//! can refresh.

use crate::device::{Device, DeviceId, DeviceInfo};
use crate::secret::SecretStore;
use crate::storage::DeviceStorage;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default pairing code validity in seconds
pub const CODE_TTL_SECONDS: i64 = 120;

/// Default inactivity threshold before the sweep flags a device inactive
pub const INACTIVE_AFTER_SECONDS: i64 = 600;

/// Prefix of every issued bearer token
pub const TOKEN_PREFIX: &str = "dmcp";

/// Pairing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("No pairing code is active")]
    NoActiveCode,
    #[error("Pairing code has expired")]
    Expired,
    #[error("Pairing code does not match")]
    CodeMismatch,
}

pub type PairingResult<T> = Result<T, PairingError>;

/// The single pending pairing code
#[derive(Debug, Clone)]
struct ActiveCode {
    /// The 6-digit code, leading zeros allowed
    code: String,
    /// Device identity pre-bound to this code, if any
    device_id: Option<DeviceId>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ActiveCode {
    fn new(ttl_secs: i64, device_id: Option<DeviceId>) -> Self {
        let mut rng = rand::thread_rng();
        let code: u32 = rng.gen_range(0..1_000_000);
        let now = Utc::now();

        Self {
            code: format!("{:06}", code),
            device_id,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Response when starting a pairing window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingWindow {
    /// The 6-digit code to display/share
    pub code: String,
    /// Seconds until this code expires
    pub expires_in: i64,
}

/// Device details supplied by the client when completing a pairing
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub platform: Option<String>,
    pub version: Option<String>,
}

/// Result of a successful pairing
#[derive(Debug, Clone)]
pub struct PairedDevice {
    /// The raw bearer token; returned exactly once, never re-displayed
    pub token: String,
    /// The redacted record of the newly paired device
    pub device: DeviceInfo,
}

/// Single source of truth for who is allowed in
///
/// Owns the pending pairing code slot and the device registry, and is the
/// only component that ever sees token hashes.
pub struct PairingManager {
    /// The one pending code; issuing a new one replaces it
    active: RwLock<Option<ActiveCode>>,
    /// Device registry
    storage: Arc<DeviceStorage>,
    /// Symmetric secret for token hashing
    secret: Arc<SecretStore>,
    /// Inactivity threshold applied by the sweep
    inactive_after: Duration,
}

impl PairingManager {
    pub fn new(storage: Arc<DeviceStorage>, secret: Arc<SecretStore>) -> Self {
        Self {
            active: RwLock::new(None),
            storage,
            secret,
            inactive_after: Duration::seconds(INACTIVE_AFTER_SECONDS),
        }
    }

    /// Override the inactivity threshold used by [`Self::sweep`]
    pub fn with_inactive_after(mut self, secs: i64) -> Self {
        self.inactive_after = Duration::seconds(secs);
        self
    }

    /// Start a pairing window, replacing any pending code.
    ///
    /// `device_id` pre-binds the code to an existing identity (re-pairing);
    /// normally a fresh identity is allocated on completion.
    pub async fn start_pairing(&self, ttl_secs: i64, device_id: Option<DeviceId>) -> PairingWindow {
        let code = ActiveCode::new(ttl_secs, device_id);
        let window = PairingWindow {
            code: code.code.clone(),
            expires_in: ttl_secs,
        };

        let mut active = self.active.write().await;
        if let Some(old) = active.replace(code) {
            if !old.is_expired() {
                warn!("Pairing code {} superseded before use", old.code);
            }
        }

        info!("Started pairing window ({}s)", ttl_secs);
        window
    }

    /// Verify a code and complete pairing.
    ///
    /// The code is consumed on success; an expired code is discarded as a
    /// side effect of checking it. A mismatched code stays active so the
    /// client can retry within the window.
    pub async fn complete_pairing(
        &self,
        code: &str,
        profile: DeviceProfile,
        ip: Option<&str>,
    ) -> PairingResult<PairedDevice> {
        let pending = {
            let mut active = self.active.write().await;
            match active.take() {
                None => return Err(PairingError::NoActiveCode),
                Some(current) if current.is_expired() => {
                    debug!("Discarding expired pairing code");
                    return Err(PairingError::Expired);
                }
                Some(current) if current.code != code => {
                    warn!("Pairing attempt with mismatched code");
                    *active = Some(current);
                    return Err(PairingError::CodeMismatch);
                }
                Some(current) => current,
            }
        };

        let device_id = pending.device_id.unwrap_or_else(DeviceId::generate);
        let token = generate_token(&device_id);
        let token_hash = self.secret.token_hash(&token);

        let device = Device::new(
            device_id.clone(),
            profile.name,
            profile.platform,
            profile.version,
            token_hash,
            ip.map(str::to_string),
        );
        let info = DeviceInfo::from(&device);
        self.storage.save_device(device).await;

        info!("Device {} paired successfully", device_id);

        Ok(PairedDevice {
            token,
            device: info,
        })
    }

    /// Verify a bearer token and record the sighting.
    ///
    /// Recomputes the HMAC and looks for the single matching record. Updates
    /// `last_seen`, `ip` and the activity flag on success; the stored hash is
    /// never modified.
    pub async fn verify_token(&self, token: &str, ip: Option<&str>) -> Option<DeviceInfo> {
        let token_hash = self.secret.token_hash(token);
        let device = self.storage.find_by_token_hash(&token_hash).await?;
        let updated = self.storage.record_seen(&device.id, ip).await?;
        Some(DeviceInfo::from(&updated))
    }

    /// Revoke a single device; returns false if it was not registered.
    ///
    /// Live sessions for the device are the caller's responsibility.
    pub async fn revoke_device(&self, id: &DeviceId) -> bool {
        self.storage.remove_device(id).await
    }

    /// Revoke every paired device, returning how many were removed
    pub async fn revoke_all(&self) -> usize {
        self.storage.clear().await
    }

    /// List paired devices, redacted
    pub async fn list_devices(&self) -> Vec<DeviceInfo> {
        self.storage
            .list_devices()
            .await
            .iter()
            .map(DeviceInfo::from)
            .collect()
    }

    /// Flag a device inactive after its connection closed
    pub async fn mark_disconnected(&self, id: &DeviceId) {
        self.storage.set_active(id, false).await;
    }

    /// Whether a non-expired pairing code is pending
    pub async fn pairing_active(&self) -> bool {
        let active = self.active.read().await;
        active.as_ref().is_some_and(|c| !c.is_expired())
    }

    /// Get the number of paired devices
    pub async fn device_count(&self) -> usize {
        self.storage.device_count().await
    }

    /// Periodic cleanup: drop an expired pending code and flag idle devices
    /// inactive. Never deletes device records.
    pub async fn sweep(&self) {
        {
            let mut active = self.active.write().await;
            if active.as_ref().is_some_and(|c| c.is_expired()) {
                debug!("Sweep discarded expired pairing code");
                *active = None;
            }
        }
        self.storage.deactivate_idle(self.inactive_after).await;
    }

    /// Force the pending code to be expired (test hook)
    #[cfg(test)]
    async fn expire_active(&self) {
        let mut active = self.active.write().await;
        if let Some(code) = active.as_mut() {
            code.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

/// Generate a bearer token: `dmcp_<device id hex>_<base64url secret>`
fn generate_token(device_id: &DeviceId) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{}_{}_{}",
        TOKEN_PREFIX,
        device_id,
        URL_SAFE_NO_PAD.encode(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    async fn create_test_manager() -> (PairingManager, TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_devices.json");
        let storage = Arc::new(DeviceStorage::with_path(path).await.unwrap());
        let secret = Arc::new(SecretStore::ephemeral());
        (PairingManager::new(storage, secret), dir)
    }

    fn laptop() -> DeviceProfile {
        DeviceProfile {
            name: "Laptop".to_string(),
            platform: Some("linux".to_string()),
            version: Some("1.0".to_string()),
        }
    }

    #[tokio::test]
    async fn test_code_format() {
        let (manager, _dir) = create_test_manager().await;
        for _ in 0..20 {
            let window = manager.start_pairing(120, None).await;
            assert_eq!(window.code.len(), 6);
            assert!(window.code.bytes().all(|b| b.is_ascii_digit()));
            assert!(window.expires_in > 0);
        }
    }

    #[tokio::test]
    async fn test_pairing_flow() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        let paired = manager
            .complete_pairing(&window.code, laptop(), Some("10.1.2.3"))
            .await
            .unwrap();

        // Token format: dmcp_<16 hex>_<base64url>
        let parts: Vec<&str> = paired.token.splitn(3, '_').collect();
        assert_eq!(parts[0], TOKEN_PREFIX);
        assert_eq!(parts[1].len(), 16);
        assert!(parts[1].bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(!parts[2].is_empty());
        assert_eq!(parts[1], paired.device.id);

        assert_eq!(manager.list_devices().await.len(), 1);

        let verified = manager.verify_token(&paired.token, None).await.unwrap();
        assert_eq!(verified.id, paired.device.id);
        assert_eq!(verified.name, "Laptop");
    }

    #[tokio::test]
    async fn test_no_active_code() {
        let (manager, _dir) = create_test_manager().await;
        let result = manager.complete_pairing("123456", laptop(), None).await;
        assert_eq!(result.unwrap_err(), PairingError::NoActiveCode);
    }

    #[tokio::test]
    async fn test_mismatched_code_keeps_window_open() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        let wrong = if window.code == "000000" { "000001" } else { "000000" };

        let result = manager.complete_pairing(wrong, laptop(), None).await;
        assert_eq!(result.unwrap_err(), PairingError::CodeMismatch);

        // The correct code still works after a failed guess
        assert!(manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_new_window_supersedes_old_code() {
        let (manager, _dir) = create_test_manager().await;

        let first = manager.start_pairing(120, None).await;
        let second = manager.start_pairing(120, None).await;

        if first.code != second.code {
            let result = manager.complete_pairing(&first.code, laptop(), None).await;
            assert_eq!(result.unwrap_err(), PairingError::CodeMismatch);
        }

        assert!(manager
            .complete_pairing(&second.code, laptop(), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();

        let result = manager.complete_pairing(&window.code, laptop(), None).await;
        assert_eq!(result.unwrap_err(), PairingError::NoActiveCode);
    }

    #[tokio::test]
    async fn test_expired_code_is_discarded() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        manager.expire_active().await;

        let result = manager.complete_pairing(&window.code, laptop(), None).await;
        assert_eq!(result.unwrap_err(), PairingError::Expired);
        assert_eq!(manager.list_devices().await.len(), 0);

        // The expiry check consumed the code
        let result = manager.complete_pairing(&window.code, laptop(), None).await;
        assert_eq!(result.unwrap_err(), PairingError::NoActiveCode);
    }

    #[tokio::test]
    async fn test_sweep_discards_expired_code() {
        let (manager, _dir) = create_test_manager().await;

        manager.start_pairing(120, None).await;
        assert!(manager.pairing_active().await);

        manager.expire_active().await;
        manager.sweep().await;
        assert!(!manager.pairing_active().await);
    }

    #[tokio::test]
    async fn test_verify_is_idempotent_and_monotone() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        let paired = manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();

        let first = manager.verify_token(&paired.token, Some("10.0.0.1")).await.unwrap();
        let second = manager.verify_token(&paired.token, Some("10.0.0.2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(second.ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();

        assert!(manager.verify_token("dmcp_0000000000000000_bogus", None).await.is_none());
        assert!(manager.verify_token("", None).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_device() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        let paired = manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();
        let id = DeviceId::parse(&paired.device.id).unwrap();

        assert!(manager.revoke_device(&id).await);
        assert!(!manager.revoke_device(&id).await);
        assert_eq!(manager.list_devices().await.len(), 0);
        assert!(manager.verify_token(&paired.token, None).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let (manager, _dir) = create_test_manager().await;

        let mut tokens = Vec::new();
        for name in ["Laptop", "Tablet"] {
            let window = manager.start_pairing(120, None).await;
            let profile = DeviceProfile {
                name: name.to_string(),
                platform: None,
                version: None,
            };
            let paired = manager
                .complete_pairing(&window.code, profile, None)
                .await
                .unwrap();
            tokens.push(paired.token);
        }

        assert_eq!(manager.revoke_all().await, 2);
        assert_eq!(manager.list_devices().await.len(), 0);
        for token in &tokens {
            assert!(manager.verify_token(token, None).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_listing_never_leaks_token_hash() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();

        let json = serde_json::to_string(&manager.list_devices().await).unwrap();
        assert!(!json.contains("token_hash"));
        assert!(!json.contains("tokenHash"));
    }

    #[tokio::test]
    async fn test_prebound_device_id() {
        let (manager, _dir) = create_test_manager().await;

        let id = DeviceId::generate();
        let window = manager.start_pairing(120, Some(id.clone())).await;
        let paired = manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();
        assert_eq!(paired.device.id, id.to_string());
    }

    #[tokio::test]
    async fn test_mark_disconnected() {
        let (manager, _dir) = create_test_manager().await;

        let window = manager.start_pairing(120, None).await;
        let paired = manager
            .complete_pairing(&window.code, laptop(), None)
            .await
            .unwrap();
        let id = DeviceId::parse(&paired.device.id).unwrap();

        manager.mark_disconnected(&id).await;
        let listed = manager.list_devices().await;
        assert!(!listed[0].is_active);

        // A later verification reactivates the device
        let verified = manager.verify_token(&paired.token, None).await.unwrap();
        assert!(verified.is_active);
    }
}
