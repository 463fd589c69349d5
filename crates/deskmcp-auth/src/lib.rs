//! deskmcp Auth - Device pairing and token authentication
//!
//! Implements the trust bootstrap for the control service:
//!
//! 1. The operator starts a pairing window, producing a one-time 6-digit code
//! 2. A client submits the code together with its device details
//! 3. On success the server issues a long-lived bearer token; only the
//!    HMAC of the token is stored, bound to the new device record
//! 4. The token authenticates all subsequent HTTP requests and signaling
//!    connections; revoking the device record invalidates the token
//!
//! At most one pairing code is active at a time. Issuing a new code silently
//! replaces the pending one.
//!
//! # Example
//!
//! ```no_run
//! use deskmcp_auth::{DeviceProfile, DeviceStorage, PairingManager, SecretStore};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let secret = Arc::new(SecretStore::load_or_create("secret.key".as_ref()).unwrap());
//!     let storage = Arc::new(DeviceStorage::new().await.unwrap());
//!     let manager = PairingManager::new(storage, secret);
//!
//!     let window = manager.start_pairing(120, None).await;
//!     println!("Enter code on device: {}", window.code);
//!
//!     // Later, when a client submits the code
//!     let profile = DeviceProfile {
//!         name: "Laptop".to_string(),
//!         platform: Some("linux".to_string()),
//!         version: Some("1.0".to_string()),
//!     };
//!     if let Ok(paired) = manager.complete_pairing(&window.code, profile, None).await {
//!         println!("Issued token for device {}", paired.device.id);
//!     }
//! }
//! ```

pub mod device;
pub mod pairing;
pub mod secret;
pub mod storage;

pub use device::{Device, DeviceId, DeviceInfo};
pub use pairing::{
    DeviceProfile, PairedDevice, PairingError, PairingManager, PairingResult, PairingWindow,
    TOKEN_PREFIX,
};
pub use secret::{SecretError, SecretStore};
pub use storage::{DeviceStorage, StorageError, StorageResult};
