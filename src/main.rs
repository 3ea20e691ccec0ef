use std::sync::Arc;

use anyhow::Context;
use restock_watch::config::AppSettings;
use restock_watch::fetcher::{Fetcher, HttpPageSource, Selectors};
use restock_watch::guard::AnomalyGuard;
use restock_watch::monitor::{CycleOptions, Monitor};
use restock_watch::notifier::{Pacing, TelegramNotifier};
use restock_watch::store::SnapshotStore;
use restock_watch::{health, telemetry};
use tracing::instrument;

#[instrument(skip_all)]
async fn run_monitor(settings: AppSettings) -> anyhow::Result<()> {
    let source = HttpPageSource::new(
        settings.catalog_url()?,
        &settings.user_agent,
        settings.request_timeout(),
    )?;
    let fetcher = Fetcher::new(
        source,
        Selectors::parse(&settings.selectors)?,
        settings.max_pages,
        settings.image_width.clone(),
    );

    let notifier = TelegramNotifier::new(&settings.telegram_token, &settings.chat_id);
    let chat = notifier
        .resolve_destination()
        .await
        .context("cannot reach notification destination")?;
    tracing::info!(chat = %chat, "Connected to notification destination");

    let store = SnapshotStore::new(&settings.snapshot_path, &settings.archive_dir);
    let current = store.load().context("cannot read saved snapshot")?;
    tracing::info!(
        listings = current.len(),
        path = %settings.snapshot_path.display(),
        "Loaded saved snapshot"
    );

    let monitor = Monitor::new(
        fetcher,
        store,
        AnomalyGuard::new(settings.threshold),
        notifier,
        CycleOptions {
            site_origin: settings.site_origin()?,
            pacing: Pacing::new(settings.send_delay()),
            interval: settings.check_interval(),
        },
    );
    Arc::new(monitor).run(current).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let settings = AppSettings::load().context("failed to load settings")?;
    tracing::info!(
        catalog = %settings.catalog_url,
        threshold = settings.threshold,
        interval_secs = settings.check_interval_secs,
        "Starting restock watch"
    );

    let health_addr = settings.health_addr()?;
    let health = tokio::spawn(async move {
        if let Err(e) = health::serve(health_addr).await {
            tracing::error!(error = %e, "Liveness endpoint stopped");
        }
    });

    // A monitor failure is logged and leaves the liveness endpoint running.
    let monitor = tokio::spawn(async move {
        if let Err(e) = run_monitor(settings).await {
            tracing::error!(error = ?e, "Monitoring stopped");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    monitor.abort();
    health.abort();
    Ok(())
}
