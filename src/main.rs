//! deskmcp - pairing, token authentication and signaling relay for
//! remote desktop control
//!
//! Grants a remote controller authenticated access to a desktop-control
//! service: clients pair with a short one-time code, receive a long-lived
//! bearer token, and then connect to the signaling endpoint where opaque
//! negotiation payloads are relayed to the orchestrating side.

use anyhow::{Context, Result};
use clap::Parser;
use deskmcp_auth::{DeviceStorage, PairingManager, SecretStore};
use deskmcp_core::Config;
use deskmcp_server::{create_router, AppState, RelayEvent, SessionRegistry, SignalingRelay};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// deskmcp - pair devices and relay control-channel signaling
#[derive(Parser, Debug)]
#[command(name = "deskmcp")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8787")]
    port: u16,

    /// Directory for the device registry and secret key
    /// (default: ~/.config/deskmcp)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Pairing code lifetime in seconds
    #[arg(long, default_value = "120")]
    pairing_ttl: i64,

    /// Seconds an unauthenticated signaling connection may linger
    #[arg(long, default_value = "30")]
    auth_timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("deskmcp v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .context("No configuration directory available")?
            .join("deskmcp"),
    };

    let config = Config::new()
        .with_port(args.port)
        .with_data_dir(data_dir.clone())
        .with_pairing_ttl(args.pairing_ttl)
        .with_auth_timeout(args.auth_timeout);

    // The secret is the root of all token verification; failing to obtain it
    // aborts startup.
    let secret = Arc::new(
        SecretStore::load_or_create(&data_dir.join("secret.key"))
            .context("Failed to load or create the secret key")?,
    );

    let storage = Arc::new(
        DeviceStorage::with_path(data_dir.join("devices.json"))
            .await
            .context("Failed to initialize device storage")?,
    );

    let pairing = Arc::new(
        PairingManager::new(storage, secret).with_inactive_after(config.inactive_after_secs),
    );

    let sessions = Arc::new(SessionRegistry::new());
    let (events_tx, mut events_rx) = mpsc::channel::<RelayEvent>(256);
    let relay = SignalingRelay::new(sessions.clone(), events_tx);

    let state = Arc::new(AppState::new(
        config.clone(),
        pairing.clone(),
        sessions,
        relay,
    ));

    // Orchestrator hook: the control side consumes relay events here. The
    // standalone binary logs them.
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                RelayEvent::Connected { device_id } => {
                    info!("Device {} connected to signaling", device_id);
                }
                RelayEvent::Disconnected { device_id } => {
                    info!("Device {} left signaling", device_id);
                }
                RelayEvent::Signal { device_id, kind, .. } => {
                    debug!("Signal '{}' from device {}", kind, device_id);
                }
            }
        }
    });

    // Periodic cleanup sweep
    let sweeper = pairing.clone();
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            sweeper.sweep().await;
        }
    });

    let paired_count = pairing.device_count().await;
    info!("{} paired device(s)", paired_count);

    // Bootstrap: with no paired devices nobody can call the API, so open a
    // pairing window at startup and keep it fresh until a device pairs.
    if paired_count == 0 {
        let pm = pairing.clone();
        let ttl = config.pairing_ttl_secs;
        tokio::spawn(async move {
            loop {
                let window = pm.start_pairing(ttl, None).await;
                info!("");
                info!("  ╔══════════════════════════════╗");
                info!("  ║     PAIRING CODE: {}     ║", window.code);
                info!("  ╚══════════════════════════════╝");
                info!("");
                info!("  Code expires in {} seconds", window.expires_in);

                tokio::time::sleep(Duration::from_secs(ttl.max(1) as u64)).await;
                if pm.device_count().await > 0 {
                    info!("Device paired, closing bootstrap pairing window");
                    break;
                }
            }
        });
    }

    let router = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind server port")?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Server error")?;

    if pairing.pairing_active().await {
        warn!("Shutting down with an open pairing window");
    }

    info!("Goodbye!");
    Ok(())
}
