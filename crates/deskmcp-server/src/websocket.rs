//! Signaling WebSocket handler
//!
//! Implements the per-connection handshake state machine: a fresh connection
//! is unauthenticated and may only send `auth` or `pair`. Authentication must
//! complete within the configured timeout or the connection is closed with a
//! policy-violation code. Once authenticated, the connection is registered
//! and all further traffic flows through the signaling relay.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use deskmcp_auth::{DeviceId, DeviceInfo, DeviceProfile};
use deskmcp_core::protocol::{
    parse_device_message, DeviceMessage, ServerMessage, CLOSE_POLICY_VIOLATION,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sessions::ConnectionHandle;
use crate::state::AppState;

/// Upgrade handler for the signaling endpoint.
///
/// No upfront auth; the handshake happens over the socket itself so that
/// unpaired clients can pair on their first connection.
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_signaling_socket(socket, state, addr))
}

/// Outcome of one pre-authentication message
#[derive(Debug)]
pub(crate) enum GateVerdict {
    /// Transition to AUTHENTICATED; `reply` carries the auth/pair response
    Authenticated {
        device: DeviceInfo,
        reply: ServerMessage,
    },
    /// Reply, then close with the policy-violation code
    Reject { reply: ServerMessage },
    /// Reply and stay unauthenticated (pairing retry, premature message)
    Reply(ServerMessage),
}

/// Evaluate a single message from an unauthenticated connection
pub(crate) async fn pre_auth_verdict(
    state: &AppState,
    text: &str,
    ip: &str,
) -> GateVerdict {
    match parse_device_message(text) {
        Ok(DeviceMessage::Auth(req)) => {
            match state.pairing.verify_token(&req.token, Some(ip)).await {
                Some(device) => {
                    let info = serde_json::to_value(&device).unwrap_or_default();
                    GateVerdict::Authenticated {
                        device,
                        reply: ServerMessage::auth_ok(info),
                    }
                }
                None => {
                    warn!("Rejected invalid token from {}", ip);
                    GateVerdict::Reject {
                        reply: ServerMessage::auth_err("Invalid or revoked token"),
                    }
                }
            }
        }
        Ok(DeviceMessage::Pair(req)) => {
            let profile = DeviceProfile {
                name: req.data.device_name,
                platform: req.data.platform,
                version: req.data.version,
            };
            match state
                .pairing
                .complete_pairing(&req.code, profile, Some(ip))
                .await
            {
                Ok(paired) => {
                    let info = serde_json::to_value(&paired.device).unwrap_or_default();
                    GateVerdict::Authenticated {
                        device: paired.device,
                        reply: ServerMessage::pair_ok(paired.token, info),
                    }
                }
                // The connection stays open so the client can retry within
                // the authentication window
                Err(e) => GateVerdict::Reply(ServerMessage::pair_err(e.to_string())),
            }
        }
        // Includes json ping: no liveness before authentication. Transport
        // Ping frames are still answered in the socket loop.
        Ok(_) => GateVerdict::Reply(ServerMessage::Error {
            message: "Authentication required".to_string(),
        }),
        Err(e) => GateVerdict::Reply(ServerMessage::Error {
            message: e.to_string(),
        }),
    }
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize server message: {}", e);
            false
        }
    }
}

async fn close_policy_violation(sender: &mut SplitSink<WebSocket, Message>, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: reason.into(),
        })))
        .await;
}

pub async fn handle_signaling_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let ip = addr.ip().to_string();

    debug!("Signaling connection opened from {}", ip);

    // UNAUTHENTICATED: only auth/pair make progress, everything else is
    // rejected with an error reply until the timer fires.
    let auth_timeout = tokio::time::sleep(Duration::from_secs(state.config.auth_timeout_secs));
    tokio::pin!(auth_timeout);

    let device = loop {
        tokio::select! {
            _ = &mut auth_timeout => {
                warn!("Authentication timeout from {}", ip);
                close_policy_violation(&mut sender, "authentication timeout").await;
                return;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match pre_auth_verdict(&state, &text, &ip).await {
                            GateVerdict::Authenticated { device, reply } => {
                                if !send_message(&mut sender, &reply).await {
                                    return;
                                }
                                break device;
                            }
                            GateVerdict::Reject { reply } => {
                                send_message(&mut sender, &reply).await;
                                close_policy_violation(&mut sender, "authentication failed").await;
                                return;
                            }
                            GateVerdict::Reply(reply) => {
                                if !send_message(&mut sender, &reply).await {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection from {} closed before authentication", ip);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error from {}: {}", ip, e);
                        return;
                    }
                }
            }
        }
    };

    // AUTHENTICATED
    let device_id = match DeviceId::parse(&device.id) {
        Ok(id) => id,
        Err(e) => {
            warn!("Registry produced unparseable device id: {}", e);
            return;
        }
    };

    let (tx, mut outbound_rx) = mpsc::channel::<String>(64);
    let handle = ConnectionHandle::new(device_id.clone(), tx);
    let conn_id = handle.conn_id;
    if let Some(old) = state.sessions.insert_connection(handle).await {
        info!("Superseding existing connection for device {}", device_id);
        // Dropping the old handle closes its outbound channel; in-flight
        // messages addressed to it are dropped silently
        drop(old);
    }
    state.relay.device_connected(device_id.clone()).await;
    info!("Device {} ({}) authenticated from {}", device_id, device.name, ip);

    let mut ping = tokio::time::interval(Duration::from_secs(state.config.ping_interval_secs));
    ping.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Our registry entry was dropped: superseded or revoked
                        debug!("Outbound channel closed for device {}", device_id);
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match parse_device_message(&text) {
                            Ok(DeviceMessage::Signal { kind, payload }) => {
                                state.relay.dispatch(device_id.clone(), kind, payload).await;
                            }
                            Ok(DeviceMessage::Ping) => {
                                if !send_message(&mut sender, &ServerMessage::Pong).await {
                                    break;
                                }
                            }
                            Ok(DeviceMessage::Pong) => {}
                            Ok(DeviceMessage::Auth(_)) | Ok(DeviceMessage::Pair(_)) => {
                                debug!("Ignoring auth/pair from authenticated device {}", device_id);
                            }
                            Err(e) => {
                                let reply = ServerMessage::Error { message: e.to_string() };
                                if !send_message(&mut sender, &reply).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error from {}: {}", device_id, e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                // Keepalive; an unresponsive peer surfaces as a transport
                // error on a later send and is handled like a close
                if !send_message(&mut sender, &ServerMessage::Ping).await {
                    break;
                }
            }
        }
    }

    // CLOSED: deregister only if we are still the current connection, so a
    // superseded connection's teardown leaves its successor intact.
    if state.sessions.remove_connection(&device_id, conn_id).await {
        state.pairing.mark_disconnected(&device_id).await;
        state.relay.device_disconnected(device_id.clone()).await;
        info!("Device {} disconnected", device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayEvent;
    use deskmcp_auth::{DeviceStorage, PairingManager, SecretStore};
    use deskmcp_core::Config;
    use tempfile::{tempdir, TempDir};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WireMessage};

    async fn test_state_with(
        config: Config,
    ) -> (Arc<AppState>, tokio::sync::mpsc::Receiver<RelayEvent>, TempDir) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            DeviceStorage::with_path(dir.path().join("devices.json"))
                .await
                .unwrap(),
        );
        let secret = Arc::new(SecretStore::ephemeral());
        let pairing = Arc::new(PairingManager::new(storage, secret));
        let sessions = Arc::new(crate::sessions::SessionRegistry::new());
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(16);
        let relay = crate::relay::SignalingRelay::new(sessions.clone(), events_tx);
        let state = Arc::new(AppState::new(config, pairing, sessions, relay));
        (state, events_rx, dir)
    }

    async fn test_state() -> (Arc<AppState>, tokio::sync::mpsc::Receiver<RelayEvent>, TempDir) {
        test_state_with(Config::default()).await
    }

    /// Serve the full router on an ephemeral port for client-driven tests
    async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
        let router = crate::http::create_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_premature_message_is_rejected_not_fatal() {
        let (state, _rx, _dir) = test_state().await;
        let verdict =
            pre_auth_verdict(&state, r#"{"type":"offer","data":{}}"#, "127.0.0.1").await;
        assert!(matches!(
            verdict,
            GateVerdict::Reply(ServerMessage::Error { .. })
        ));
    }

    #[tokio::test]
    async fn test_bad_token_closes_connection() {
        let (state, _rx, _dir) = test_state().await;
        let verdict = pre_auth_verdict(
            &state,
            r#"{"type":"auth","token":"dmcp_0000000000000000_nope"}"#,
            "127.0.0.1",
        )
        .await;
        match verdict {
            GateVerdict::Reject { reply: ServerMessage::AuthResponse { success, error, .. } } => {
                assert!(!success);
                assert!(error.is_some());
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pair_failure_keeps_connection_open() {
        let (state, _rx, _dir) = test_state().await;
        // No pairing window active
        let verdict = pre_auth_verdict(
            &state,
            r#"{"type":"pair","code":"123456","data":{"deviceName":"Laptop"}}"#,
            "127.0.0.1",
        )
        .await;
        assert!(matches!(
            verdict,
            GateVerdict::Reply(ServerMessage::PairResponse { success: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_pair_then_auth_succeed() {
        let (state, _rx, _dir) = test_state().await;
        let window = state.pairing.start_pairing(120, None).await;

        let pair_msg = format!(
            r#"{{"type":"pair","code":"{}","data":{{"deviceName":"Laptop","platform":"linux","version":"1.0"}}}}"#,
            window.code
        );
        let token = match pre_auth_verdict(&state, &pair_msg, "10.0.0.9").await {
            GateVerdict::Authenticated {
                reply: ServerMessage::PairResponse { success: true, token: Some(token), .. },
                ..
            } => token,
            other => panic!("unexpected verdict: {:?}", other),
        };

        // The issued token authenticates a reconnect
        let auth_msg = format!(r#"{{"type":"auth","token":"{token}"}}"#);
        match pre_auth_verdict(&state, &auth_msg, "10.0.0.9").await {
            GateVerdict::Authenticated { device, .. } => {
                assert_eq!(device.name, "Laptop");
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_reply() {
        let (state, _rx, _dir) = test_state().await;
        let verdict = pre_auth_verdict(&state, "not json", "127.0.0.1").await;
        assert!(matches!(
            verdict,
            GateVerdict::Reply(ServerMessage::Error { .. })
        ));
    }

    #[tokio::test]
    async fn test_pre_auth_ping_gets_error_not_pong() {
        let (state, _rx, _dir) = test_state().await;
        let verdict = pre_auth_verdict(&state, r#"{"type":"ping"}"#, "127.0.0.1").await;
        assert!(matches!(
            verdict,
            GateVerdict::Reply(ServerMessage::Error { .. })
        ));
    }

    #[tokio::test]
    async fn test_idle_unauthenticated_connection_gets_policy_close() {
        let (state, _rx, _dir) = test_state_with(Config::default().with_auth_timeout(1)).await;
        let addr = spawn_server(state).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        // Send nothing; the handshake deadline must close the connection
        let frame = loop {
            match ws.next().await {
                Some(Ok(WireMessage::Close(frame))) => break frame,
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {:?}", other),
            }
        };
        let frame = frame.expect("close frame carries a code");
        assert_eq!(u16::from(frame.code), CLOSE_POLICY_VIOLATION);
    }

    #[tokio::test]
    async fn test_invalid_token_over_socket_gets_policy_close() {
        let (state, _rx, _dir) = test_state().await;
        let addr = spawn_server(state).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        ws.send(WireMessage::text(
            r#"{"type":"auth","token":"dmcp_0000000000000000_nope"}"#,
        ))
        .await
        .unwrap();

        let mut refused = false;
        let frame = loop {
            match ws.next().await {
                Some(Ok(WireMessage::Text(text))) => {
                    assert!(text.as_str().contains(r#""success":false"#));
                    refused = true;
                }
                Some(Ok(WireMessage::Close(frame))) => break frame,
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {:?}", other),
            }
        };
        assert!(refused);
        let frame = frame.expect("close frame carries a code");
        assert_eq!(u16::from(frame.code), CLOSE_POLICY_VIOLATION);
    }

    #[tokio::test]
    async fn test_socket_disconnect_deregisters_device() {
        let (state, mut events, _dir) = test_state().await;
        let addr = spawn_server(state.clone()).await;
        let window = state.pairing.start_pairing(120, None).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        ws.send(WireMessage::text(format!(
            r#"{{"type":"pair","code":"{}","data":{{"deviceName":"Laptop","platform":"linux","version":"1.0"}}}}"#,
            window.code
        )))
        .await
        .unwrap();

        match ws.next().await {
            Some(Ok(WireMessage::Text(text))) => {
                assert!(text.as_str().contains("pair-response"));
                assert!(text.as_str().contains(r#""success":true"#));
            }
            other => panic!("expected pair response, got {:?}", other),
        }
        assert!(matches!(events.recv().await, Some(RelayEvent::Connected { .. })));
        assert_eq!(state.sessions.connection_count().await, 1);

        ws.close(None).await.unwrap();

        // Teardown deregisters the connection and reports the departure
        assert!(matches!(events.recv().await, Some(RelayEvent::Disconnected { .. })));
        assert_eq!(state.sessions.connection_count().await, 0);
        let devices = state.pairing.list_devices().await;
        assert!(!devices[0].is_active);
    }
}
