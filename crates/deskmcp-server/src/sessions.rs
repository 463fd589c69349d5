//! Live session tracking for authenticated devices
//!
//! Two registries with different identity granularity:
//!
//! - the connection registry holds one entry per device for the persistent
//!   signaling transport; a reconnect supersedes (never merges with) the
//!   existing entry
//! - the channel registry holds one entry per `(device, session-id)` pair for
//!   the request/response transport, created lazily on first contact
//!
//! Revoking a device clears both registries under both write guards, so a
//! revoked device is never observable as still routable.

use chrono::{DateTime, Utc};
use deskmcp_auth::DeviceId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a live signaling connection
///
/// Dropping the last clone of the handle closes the outbound channel, which
/// ends the connection's write loop and closes the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub device_id: DeviceId,
    /// Distinguishes this connection from an earlier one for the same device,
    /// so a superseded connection's teardown cannot evict its successor
    pub conn_id: u64,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(device_id: DeviceId, tx: mpsc::Sender<String>) -> Self {
        Self {
            device_id,
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            connected_at: Utc::now(),
            tx,
        }
    }

    /// Queue a text frame for delivery; false if the connection is gone
    pub async fn send(&self, text: String) -> bool {
        self.tx.send(text).await.is_ok()
    }
}

/// A logical request/response stream multiplexed over HTTP
#[derive(Debug, Clone)]
pub struct ChannelSession {
    pub device_id: DeviceId,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Tracks live authenticated sessions across both transport shapes
#[derive(Default)]
pub struct SessionRegistry {
    connections: RwLock<HashMap<DeviceId, ConnectionHandle>>,
    channels: RwLock<HashMap<(DeviceId, String), ChannelSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning the superseded handle if the device
    /// was already connected. The caller is responsible for closing it.
    pub async fn insert_connection(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        let old = connections.insert(handle.device_id.clone(), handle);
        if old.is_some() {
            debug!("Connection registry entry replaced");
        }
        old
    }

    /// Get the live connection for a device
    pub async fn get_connection(&self, device_id: &DeviceId) -> Option<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections.get(device_id).cloned()
    }

    /// Deregister a connection, but only if `conn_id` still matches the
    /// registered entry. Returns whether an entry was removed.
    pub async fn remove_connection(&self, device_id: &DeviceId, conn_id: u64) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(device_id) {
            Some(handle) if handle.conn_id == conn_id => {
                connections.remove(device_id);
                true
            }
            _ => false,
        }
    }

    /// List currently connected device ids
    pub async fn connected_devices(&self) -> Vec<DeviceId> {
        let connections = self.connections.read().await;
        connections.keys().cloned().collect()
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Create or refresh a multiplexed channel session.
    ///
    /// Entries are created lazily on first contact and refreshed on every
    /// request; idle expiry is a deployment policy, not enforced here.
    pub async fn touch_channel(&self, device_id: &DeviceId, session_id: &str) {
        let mut channels = self.channels.write().await;
        let key = (device_id.clone(), session_id.to_string());
        let now = Utc::now();
        channels
            .entry(key)
            .and_modify(|s| s.last_activity = now)
            .or_insert_with(|| {
                debug!("New channel session {} for device {}", session_id, device_id);
                ChannelSession {
                    device_id: device_id.clone(),
                    session_id: session_id.to_string(),
                    created_at: now,
                    last_activity: now,
                }
            });
    }

    /// Get a multiplexed channel session
    pub async fn get_channel(&self, device_id: &DeviceId, session_id: &str) -> Option<ChannelSession> {
        let channels = self.channels.read().await;
        channels
            .get(&(device_id.clone(), session_id.to_string()))
            .cloned()
    }

    /// Number of multiplexed channel sessions for a device
    pub async fn channel_count(&self, device_id: &DeviceId) -> usize {
        let channels = self.channels.read().await;
        channels.keys().filter(|(id, _)| id == device_id).count()
    }

    /// Remove everything for a device from both registries.
    ///
    /// Both write guards are held across the mutation, so there is no
    /// intermediate state with a revoked device still routable. Returns the
    /// removed connection handle (dropping it closes the socket) and the
    /// number of channel sessions removed.
    pub async fn remove_device(&self, device_id: &DeviceId) -> (Option<ConnectionHandle>, usize) {
        let mut connections = self.connections.write().await;
        let mut channels = self.channels.write().await;

        let handle = connections.remove(device_id);
        let before = channels.len();
        channels.retain(|(id, _), _| id != device_id);
        let removed = before - channels.len();

        (handle, removed)
    }

    /// Clear both registries, returning the removed connection handles
    pub async fn clear_all(&self) -> Vec<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        let mut channels = self.channels.write().await;

        channels.clear();
        connections.drain().map(|(_, handle)| handle).collect()
    }
}
