//! Shared application state

use deskmcp_auth::PairingManager;
use deskmcp_core::Config;
use std::sync::Arc;

use crate::relay::SignalingRelay;
use crate::sessions::SessionRegistry;

/// Shared application state, owned by the process root and injected into
/// every handler. No ambient globals; tests build independent instances.
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Pairing and token authority
    pub pairing: Arc<PairingManager>,
    /// Live session tracking
    pub sessions: Arc<SessionRegistry>,
    /// Message relay toward the orchestrator
    pub relay: SignalingRelay,
}

impl AppState {
    pub fn new(
        config: Config,
        pairing: Arc<PairingManager>,
        sessions: Arc<SessionRegistry>,
        relay: SignalingRelay,
    ) -> Self {
        Self {
            config,
            pairing,
            sessions,
            relay,
        }
    }

    /// Revoke a device everywhere: registry record, live connection and
    /// multiplexed channel sessions. Returns false for an unknown device.
    pub async fn revoke_device(&self, id: &deskmcp_auth::DeviceId) -> bool {
        let revoked = self.pairing.revoke_device(id).await;
        if revoked {
            let (handle, _channels) = self.sessions.remove_device(id).await;
            if let Some(handle) = handle {
                // Dropping the handle closes the live connection
                drop(handle);
                self.relay.device_disconnected(id.clone()).await;
            }
        }
        revoked
    }

    /// Revoke every paired device, returning how many records were removed
    pub async fn revoke_all(&self) -> usize {
        let count = self.pairing.revoke_all().await;
        for handle in self.sessions.clear_all().await {
            let device_id = handle.device_id.clone();
            // Dropping the handle closes the live connection
            drop(handle);
            self.relay.device_disconnected(device_id).await;
        }
        count
    }
}
