//! Signaling relay between authenticated devices and the orchestrating side
//!
//! The relay never interprets payloads beyond the `type` discriminator used
//! for routing. Inbound messages are published as [`RelayEvent`]s on a
//! channel owned by the orchestrator, in arrival order per connection;
//! outbound delivery is fire-and-forget with no acknowledgment or retry.

use deskmcp_auth::DeviceId;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sessions::SessionRegistry;

/// Events published by the relay
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A device completed authentication on the signaling transport
    Connected { device_id: DeviceId },
    /// A device's signaling connection closed
    Disconnected { device_id: DeviceId },
    /// An opaque typed message arrived from a device; `payload` is the full
    /// unmodified envelope
    Signal {
        device_id: DeviceId,
        kind: String,
        payload: Value,
    },
}

/// Forwards opaque negotiation/command payloads between device connections
/// and the orchestrator's event channel
#[derive(Clone)]
pub struct SignalingRelay {
    sessions: Arc<SessionRegistry>,
    events: mpsc::Sender<RelayEvent>,
}

impl SignalingRelay {
    pub fn new(sessions: Arc<SessionRegistry>, events: mpsc::Sender<RelayEvent>) -> Self {
        Self { sessions, events }
    }

    /// Send a message to a device's live signaling connection.
    ///
    /// Returns false when the device has no live connection or the transport
    /// is no longer writable; true means the message was queued, best-effort.
    pub async fn send_to_device(&self, device_id: &DeviceId, message: &Value) -> bool {
        let Some(handle) = self.sessions.get_connection(device_id).await else {
            debug!("No live connection for device {}", device_id);
            return false;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize relay message: {}", e);
                return false;
            }
        };
        handle.send(text).await
    }

    /// Publish a device's authentication to the orchestrator
    pub async fn device_connected(&self, device_id: DeviceId) {
        self.publish(RelayEvent::Connected { device_id }).await;
    }

    /// Publish a device's disconnect to the orchestrator
    pub async fn device_disconnected(&self, device_id: DeviceId) {
        self.publish(RelayEvent::Disconnected { device_id }).await;
    }

    /// Forward an inbound typed message without inspecting its payload
    pub async fn dispatch(&self, device_id: DeviceId, kind: String, payload: Value) {
        self.publish(RelayEvent::Signal {
            device_id,
            kind,
            payload,
        })
        .await;
    }

    async fn publish(&self, event: RelayEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Relay event channel closed, dropping event");
        }
    }
}
