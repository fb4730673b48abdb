//! Broker daemon entry point.
//!
//! Wires together the pieces every other `pimd-*` crate only describes in
//! isolation: opens the SQLite-backed [`DataStore`], binds the Unix-domain
//! socket, and spawns one [`pimd_server::run_connection`] task per accepted
//! client. Shutdown is cooperative (§4.6 "fatal connection errors" aside,
//! nothing here force-kills an in-flight connection): a `SIGINT`/`SIGTERM`
//! stops accepting new connections and lets existing ones drain on their
//! own EOF.

use std::path::PathBuf;
use std::sync::Arc;

use pimd_core::config::ServerConfig;
use pimd_core::ids::ConnectionIdGenerator;
use pimd_notify::ChangeBus;
use pimd_storage::DataStore;
use pimd_transport::BrokerListener;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How many in-flight change notifications a lagging connection can fall
/// behind by before it starts missing events (§4.10, mirrored from
/// `ChangeBus`'s own default capacity).
const CHANGE_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pimd_core::logging::init();

    let config = load_config();
    info!(socket = %config.socket_path.display(), database = %config.database_path.display(), "starting pimd-broker");

    let bus = ChangeBus::new(CHANGE_BUS_CAPACITY);
    let store = Arc::new(open_store(&config, bus.clone()).await?);
    let listener = BrokerListener::bind(&config.socket_path)?;
    let connection_ids = ConnectionIdGenerator::new();
    let shutdown = CancellationToken::new();

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, no longer accepting new connections");
            ctrl_c_shutdown.cancel();
        }
    });

    let server_name: Arc<str> = Arc::from(format!("pimd ({})", config.instance));
    let generation = std::process::id() as u64;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("broker shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let connection_id = connection_ids.next();
                        let conn_config = pimd_server::ConnectionConfig {
                            store: Arc::clone(&store),
                            bus: bus.clone(),
                            server_name: Arc::clone(&server_name),
                            generation,
                            external_payload_threshold: config.external_payload_threshold,
                        };
                        info!(%connection_id, peer_pid = ?stream.peer_pid, "accepted connection");
                        tokio::spawn(pimd_server::run_connection(connection_id, stream.stream, conn_config));
                    }
                    Err(err) => {
                        warn!(%err, "failed to accept connection");
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config() -> ServerConfig {
    match std::env::var("PIMD_CONFIG").map(PathBuf::from) {
        Ok(path) => ServerConfig::load(&path).unwrap_or_else(|err| {
            warn!(%err, path = %path.display(), "failed to load config file, falling back to defaults");
            ServerConfig::from_defaults()
        }),
        Err(_) => ServerConfig::from_defaults(),
    }
}

async fn open_store(config: &ServerConfig, bus: ChangeBus) -> Result<DataStore, Box<dyn std::error::Error>> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data_root = config
        .database_path
        .parent()
        .map(|parent| parent.join("parts"))
        .unwrap_or_else(|| PathBuf::from("parts"));
    std::fs::create_dir_all(&data_root)?;

    let connect_options = SqliteConnectOptions::new()
        .filename(&config.database_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(connect_options)
        .await
        .map_err(|err| {
            error!(%err, "failed to open database");
            err
        })?;
    let driver = pimd_query::SqliteDriver::new(pool);
    let store = DataStore::initialize(driver, bus, data_root).await?;
    store.set_external_payload_threshold(config.external_payload_threshold);
    Ok(store)
}
