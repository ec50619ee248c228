use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use staykeep::clock::SystemClock;
use staykeep::config::Config;
use staykeep::engine::{Collaborators, Engine, InMemoryStore};
use staykeep::gateway::HttpPaymentGateway;
use staykeep::notify::NotifyHub;
use staykeep::reaper;

/// How often the compactor looks at the journal.
const COMPACT_CHECK_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    staykeep::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = Arc::new(InMemoryStore::open(&wal_path)?);

    let gateway = Arc::new(HttpPaymentGateway::new(
        config.payment_url.clone(),
        config.refund_url.clone(),
        config.gateway_timeout,
    )?);
    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        Collaborators::in_memory(store.clone(), gateway, hub.clone(), Arc::new(SystemClock)),
        config.engine_settings(),
    ));

    info!("staykeep started");
    info!("  journal: {}", wal_path.display());
    info!("  reservations: {}", store.reservation_count());
    info!("  sweep every: {:?}, grace period: {} days", config.sweep_interval, config.grace_period_days);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Outgoing mail is out of scope; log what would be sent.
    let mut outbox = hub.subscribe_all();
    let mailer = tokio::spawn(async move {
        loop {
            match outbox.recv().await {
                Ok(envelope) => info!("notify {}: {:?}", envelope.recipient, envelope.message),
                Err(RecvError::Lagged(n)) => tracing::warn!("notification log lagged, {n} dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(reaper::run_compactor(
        store.clone(),
        config.compact_threshold,
        COMPACT_CHECK_EVERY,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received");
    sweeper.abort();
    compactor.abort();
    mailer.abort();
    if let Err(e) = store.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("staykeep stopped");
    Ok(())
}
