use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use plcwatch::{
    actors::{ProberHandle, TagMonitorHandle},
    adapter::sim::SimulatedAdapter,
    config::{StorageConfig, read_config_file},
    registry::{EndpointRegistry, StaticRegistry},
    storage::{StorageBackend, memory::MemoryBackend},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("plcwatch", LevelFilter::TRACE),
        ("engine", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let (storage, retention_days) = build_storage(&config.storage).await?;
    let registry: Arc<dyn EndpointRegistry> = Arc::new(StaticRegistry::from_config(
        config.endpoints.as_deref().unwrap_or(&[]),
    ));

    // Connectivity is unconditional: every configured endpoint gets probed
    let prober = ProberHandle::spawn(registry.clone(), storage.clone(), config.monitor.clone());

    // The simulator stands in until a real protocol client is wired up
    let adapter = Arc::new(SimulatedAdapter::new());

    let endpoints = registry
        .list_endpoints()
        .await
        .context("failed to read initial endpoint snapshot")?;

    let mut monitors = Vec::new();
    for endpoint in endpoints {
        debug!("starting tag monitor for {} ({})", endpoint.name, endpoint.address);
        monitors.push(TagMonitorHandle::spawn(
            endpoint,
            registry.clone(),
            adapter.clone(),
            storage.clone(),
            config.monitor.clone(),
        ));
    }

    if let Some(days) = retention_days {
        tokio::spawn(retention_loop(storage.clone(), days));
    }

    info!("engine running with {} tag monitors", monitors.len());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    for monitor in &monitors {
        if let Err(e) = monitor.shutdown().await {
            warn!("monitor shutdown failed: {e}");
        }
    }
    if let Err(e) = prober.shutdown().await {
        warn!("prober shutdown failed: {e}");
    }

    // Give the actors a moment to tear down their connections
    tokio::time::sleep(Duration::from_millis(200)).await;
    if let Err(e) = storage.close().await {
        warn!("storage close failed: {e}");
    }

    Ok(())
}

async fn build_storage(
    config: &Option<StorageConfig>,
) -> anyhow::Result<(Arc<dyn StorageBackend>, Option<u32>)> {
    match config.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("storage disabled, history kept in memory only");
            Ok((Arc::new(MemoryBackend::new()), None))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
        } => {
            let backend = plcwatch::storage::sqlite::SqliteBackend::new(&path)
                .await
                .context("failed to initialize SQLite storage")?;
            Ok((Arc::new(backend), Some(retention_days)))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("config requests sqlite storage but the storage-sqlite feature is off")
        }
    }
}

/// Delete samples and readings older than the retention period, once a day.
async fn retention_loop(storage: Arc<dyn StorageBackend>, retention_days: u32) {
    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));

    loop {
        ticker.tick().await;

        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
        match storage.cleanup_history(cutoff).await {
            Ok(deleted) if deleted > 0 => info!("retention: deleted {deleted} history rows"),
            Ok(_) => trace!("retention: nothing to delete"),
            Err(e) => error!("retention cleanup failed: {e}"),
        }
    }
}
