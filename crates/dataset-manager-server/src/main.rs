// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use dataset_manager_core::env::env_bool;
use dataset_manager_server::{ControlServer, DatasetCache, ManagerConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "signal handlers unavailable; falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = sigint.recv() => info!("SIGINT received"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("DSM_LOG_JSON", true) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();

    let cfg = ManagerConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;
    info!(
        socket = %cfg.control.socket_path.display(),
        cache_dir = %cfg.cache.root.display(),
        store = ?cfg.store.spec,
        prefix = %cfg.store.prefix,
        max_open_files = cfg.cache.max_open_files,
        verify_on_hit = cfg.cache.verify_on_hit,
        "dataset manager starting"
    );

    let store = cfg
        .store
        .build_backend()
        .map_err(|e| format!("object store setup failed: {e}"))?;
    let cache = DatasetCache::new(cfg.cache.clone(), store)
        .map_err(|e| format!("cache setup failed: {e}"))?;
    cache.spawn_background_tasks();

    let server = ControlServer::bind(&cfg.control, cache.clone())
        .map_err(|e| format!("control socket bind failed: {e}"))?;
    server
        .serve_until(wait_for_shutdown_signal())
        .await
        .map_err(|e| format!("control plane failed: {e}"))?;

    let stats = cache.stats().await;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        remote_fetches = stats.remote_fetches,
        integrity_failures = stats.integrity_failures,
        "dataset manager stopped"
    );
    Ok(())
}
