//! Persistent storage for the device registry
//!
//! JSON file storage in ~/.config/deskmcp/devices.json. Writes are
//! best-effort: a failed disk write is logged but never fails the in-memory
//! operation that triggered it, so authentication decisions stay available
//! even on a read-only filesystem.

use crate::device::{Device, DeviceId};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration directory not found")]
    NoConfigDir,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stored data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredData {
    /// Paired devices indexed by ID
    devices: HashMap<String, Device>,
}

/// Device registry with file persistence
pub struct DeviceStorage {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory registry, the authoritative copy
    data: Arc<RwLock<StoredData>>,
}

impl DeviceStorage {
    /// Create a new device storage instance at the default path
    ///
    /// Loads existing data from disk if present.
    pub async fn new() -> StorageResult<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Create storage at a specific path
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded device registry from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse device registry, starting fresh: {}", e);
                    StoredData::default()
                }
            }
        } else {
            debug!("No existing device registry, creating new");
            StoredData::default()
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Get the default storage path (~/.config/deskmcp/devices.json)
    fn default_path() -> StorageResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(config_dir.join("deskmcp").join("devices.json"))
    }

    /// Write the current state to disk, best-effort
    async fn persist(&self) {
        let data = self.data.read().await;
        let json = match serde_json::to_string_pretty(&*data) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize device registry: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!("Failed to persist device registry to {:?}: {}", self.path, e);
        } else {
            debug!("Persisted device registry to {:?}", self.path);
        }
    }

    /// Add or update a device
    pub async fn save_device(&self, device: Device) {
        let id = device.id.to_string();
        {
            let mut data = self.data.write().await;
            data.devices.insert(id.clone(), device);
        }
        self.persist().await;
        info!("Saved device {}", id);
    }

    /// Get a device by ID
    pub async fn get_device(&self, id: &DeviceId) -> Option<Device> {
        let data = self.data.read().await;
        data.devices.get(id.as_str()).cloned()
    }

    /// Find the device matching a token hash, if exactly one exists
    pub async fn find_by_token_hash(&self, token_hash: &str) -> Option<Device> {
        let data = self.data.read().await;
        data.devices
            .values()
            .find(|d| d.token_hash == token_hash)
            .cloned()
    }

    /// List all paired devices
    pub async fn list_devices(&self) -> Vec<Device> {
        let data = self.data.read().await;
        data.devices.values().cloned().collect()
    }

    /// Remove a device by ID; returns false if it was not registered
    pub async fn remove_device(&self, id: &DeviceId) -> bool {
        let removed = {
            let mut data = self.data.write().await;
            data.devices.remove(id.as_str()).is_some()
        };
        if removed {
            self.persist().await;
            info!("Removed device {}", id);
        }
        removed
    }

    /// Remove all devices, returning how many were registered
    pub async fn clear(&self) -> usize {
        let count = {
            let mut data = self.data.write().await;
            let count = data.devices.len();
            data.devices.clear();
            count
        };
        if count > 0 {
            self.persist().await;
            info!("Cleared {} paired devices", count);
        }
        count
    }

    /// Record a successful verification, returning the updated record
    pub async fn record_seen(&self, id: &DeviceId, ip: Option<&str>) -> Option<Device> {
        let updated = {
            let mut data = self.data.write().await;
            let device = data.devices.get_mut(id.as_str())?;
            device.touch(ip);
            Some(device.clone())
        };
        if updated.is_some() {
            self.persist().await;
        }
        updated
    }

    /// Set the activity flag for a device
    pub async fn set_active(&self, id: &DeviceId, active: bool) {
        let changed = {
            let mut data = self.data.write().await;
            match data.devices.get_mut(id.as_str()) {
                Some(device) if device.is_active != active => {
                    device.is_active = active;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.persist().await;
        }
    }

    /// Flag devices idle for longer than `threshold` as inactive.
    ///
    /// Records are never deleted here, only their activity flag changes.
    pub async fn deactivate_idle(&self, threshold: Duration) -> usize {
        let cutoff = Utc::now() - threshold;
        let flipped = {
            let mut data = self.data.write().await;
            let mut flipped = 0;
            for device in data.devices.values_mut() {
                if device.is_active && device.last_seen < cutoff {
                    device.is_active = false;
                    flipped += 1;
                }
            }
            flipped
        };
        if flipped > 0 {
            self.persist().await;
            debug!("Flagged {} idle devices inactive", flipped);
        }
        flipped
    }

    /// Get the number of paired devices
    pub async fn device_count(&self) -> usize {
        let data = self.data.read().await;
        data.devices.len()
    }

    /// Check if any devices are paired
    pub async fn has_devices(&self) -> bool {
        let data = self.data.read().await;
        !data.devices.is_empty()
    }
}
