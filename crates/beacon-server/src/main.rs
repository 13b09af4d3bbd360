//! Beacon broker binary.
//!
//! Wires the broker core to its cache, background tasks and HTTP surface,
//! then runs until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `beacon-config.yaml` (or `BEACON_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `Dragonfly`, if enabled; continue in memory when unreachable
//! 4. Restore active incidents from the cache snapshot
//! 5. Start heartbeat and housekeeping loops
//! 6. Serve HTTP and `WebSocket` until Ctrl-C or SIGTERM
//! 7. Close every session, stop the loops, flush the cache writer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beacon_cache::{CacheBridge, CacheWriter, DragonflyPool, restore_active_incidents};
use beacon_core::cache::{NoopSink, SnapshotSink};
use beacon_core::config::{CacheConfig, LoggingConfig};
use beacon_core::heartbeat::spawn_maintenance;
use beacon_core::{Broker, BrokerConfig};
use beacon_gateway::{AppState, start_server};
use beacon_types::DisconnectReason;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Config file read when `BEACON_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "beacon-config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1-2. Configuration, then logging at the configured level.
    let (config, config_source) = load_config()?;
    init_tracing(&config.logging);
    info!(
        source = %config_source,
        host = %config.server.host,
        port = config.server.port,
        auth_mode = ?config.auth.mode,
        emergency_mode = config.session.emergency_mode,
        "beacon-server starting"
    );
    if config.auth.api_keys.is_empty() {
        warn!("no API keys configured; integration routes will refuse every request");
    }

    // 3. Cache.
    let cache = connect_cache(&config.cache).await;
    let (sink, writer): (Arc<dyn SnapshotSink>, Option<CacheWriter>) = match &cache {
        Some(pool) => {
            let (bridge, writer) = CacheBridge::spawn(pool.clone(), &config.cache);
            (Arc::new(bridge), Some(writer))
        }
        None => (Arc::new(NoopSink), None),
    };
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let broker = Arc::new(Broker::new(config, sink));

    // 4. Restore.
    if let Some(pool) = &cache {
        match restore_active_incidents(pool, broker.incidents()).await {
            Ok(restored) => info!(restored, "incident registry seeded from cache"),
            Err(err) => warn!(error = %err, "cache restore failed, starting empty"),
        }
    }

    // 5. Background loops.
    let shutdown = CancellationToken::new();
    let maintenance = spawn_maintenance(&broker, &shutdown);

    // 6. Serve.
    let mut state = AppState::new(Arc::clone(&broker));
    if let Some(pool) = cache.clone() {
        state = state.with_cache_probe(Arc::new(move || pool.is_connected()));
    }
    let mut server = tokio::spawn(start_server(Arc::new(state), shutdown.clone()));

    let early_exit = tokio::select! {
        () = shutdown_signal() => None,
        joined = &mut server => Some(joined),
    };

    // 7. Shutdown.
    info!("shutting down");
    shutdown.cancel();
    let closed = broker.disconnect_all(DisconnectReason::ServerShutdown);
    info!(sessions = closed, "sessions closed");

    for handle in maintenance {
        if let Err(err) = handle.await {
            warn!(error = %err, "background task failed");
        }
    }

    let served = match early_exit {
        Some(joined) => joined,
        None => match tokio::time::timeout(grace, &mut server).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                warn!(grace_secs = grace.as_secs(), "HTTP server did not drain in time");
                server.abort();
                Ok(Ok(()))
            }
        },
    };

    if let Some(writer) = writer {
        let applied = writer.flush().await;
        info!(applied, "cache writer flushed");
    }
    if let Some(pool) = &cache {
        pool.quit().await;
    }

    served
        .context("HTTP server task failed")?
        .context("HTTP server stopped with an error")?;
    info!("beacon-server stopped");
    Ok(())
}

/// Load configuration from `BEACON_CONFIG` or [`DEFAULT_CONFIG_PATH`].
///
/// A missing file means defaults; environment overrides apply either way.
/// Returns the config and a description of where it came from.
fn load_config() -> anyhow::Result<(BrokerConfig, String)> {
    let path = std::env::var("BEACON_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = BrokerConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?;
        return Ok((config, path.display().to_string()));
    }
    let mut config = BrokerConfig::default();
    config
        .apply_env_overrides(|var| std::env::var(var).ok())
        .context("applying environment overrides")?;
    Ok((config, "defaults".to_owned()))
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Connect to the cache when enabled. Failure is logged and the broker
/// runs without it.
async fn connect_cache(config: &CacheConfig) -> Option<DragonflyPool> {
    if !config.enabled {
        info!("cache disabled");
        return None;
    }
    match DragonflyPool::connect(&config.url).await {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(url = %config.url, error = %err, "cache unreachable, running in memory only");
            None
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received"),
        () = terminate => info!("SIGTERM received"),
    }
}
