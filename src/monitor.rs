use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use sysinfo::System;
use tracing::instrument;
use url::Url;

use crate::diff::{compute_diff, ListingDiff};
use crate::error::CycleError;
use crate::fetcher::{Fetcher, PageSource};
use crate::guard::{AnomalyGuard, Decision};
use crate::listing::Snapshot;
use crate::notifier::{announce, Delivery, Notifier, Pacing};
use crate::store::SnapshotStore;

#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Prefix turning listing keys into product links.
    pub site_origin: Url,
    pub pacing: Pacing,
    pub interval: Duration,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Accepted {
        snapshot: Snapshot,
        diff: ListingDiff,
        delivery: Delivery,
    },
    Rejected {
        archive: PathBuf,
        count: usize,
    },
}

/// Owns the fetch → guard → diff → persist → notify pipeline and its schedule.
pub struct Monitor<S, N> {
    fetcher: Fetcher<S>,
    store: SnapshotStore,
    guard: AnomalyGuard,
    notifier: N,
    options: CycleOptions,
}

impl<S, N> Monitor<S, N>
where
    S: PageSource + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        fetcher: Fetcher<S>,
        store: SnapshotStore,
        guard: AnomalyGuard,
        notifier: N,
        options: CycleOptions,
    ) -> Self {
        Self {
            fetcher,
            store,
            guard,
            notifier,
            options,
        }
    }

    #[instrument(skip_all, fields(current = current.len()))]
    pub async fn run_cycle(&self, current: &Snapshot) -> Result<CycleOutcome, CycleError> {
        let report = self.fetcher.fetch().await;

        let snapshot = match self.guard.check(report.snapshot, &self.store, Local::now())? {
            Decision::Accept(snapshot) => snapshot,
            Decision::Reject { archive, count } => {
                return Ok(CycleOutcome::Rejected { archive, count });
            }
        };

        self.store.save(&snapshot)?;

        let diff = compute_diff(current, &snapshot);
        tracing::info!(
            total = snapshot.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "Computed catalog changes"
        );

        let delivery = announce(
            &self.notifier,
            &diff,
            current,
            &snapshot,
            &self.options.site_origin,
            self.options.pacing,
        )
        .await?;

        Ok(CycleOutcome::Accepted {
            snapshot,
            diff,
            delivery,
        })
    }

    /// Runs one cycle on its own task and returns the snapshot to carry forward.
    /// A failed or panicked cycle carries `current` forward unchanged.
    pub async fn step(self: &Arc<Self>, current: Arc<Snapshot>) -> Arc<Snapshot> {
        let monitor = Arc::clone(self);
        let previous = Arc::clone(&current);
        let outcome = tokio::spawn(async move { monitor.run_cycle(&previous).await })
            .await
            .unwrap_or_else(|e| Err(CycleError::Aborted(e.to_string())));

        match outcome {
            Ok(CycleOutcome::Accepted { snapshot, .. }) => Arc::new(snapshot),
            Ok(CycleOutcome::Rejected { count, .. }) => {
                tracing::warn!(scraped = count, kept = current.len(), "Keeping previous snapshot");
                current
            }
            Err(e) => {
                tracing::error!(error = %e, "Cycle failed, keeping previous snapshot");
                current
            }
        }
    }

    /// Cycles forever, sleeping the configured interval between passes.
    pub async fn run(self: Arc<Self>, initial: Snapshot) {
        let mut current = Arc::new(initial);
        loop {
            let start = Instant::now();
            current = self.step(current).await;

            tracing::info!(
                listings = current.len(),
                duration = ?start.elapsed(),
                memory_mb = resident_memory_mb().unwrap_or_default(),
                "Cycle finished"
            );
            tracing::info!(
                minutes = self.options.interval.as_secs() / 60,
                "Waiting before next check"
            );
            tokio::time::sleep(self.options.interval).await;
        }
    }
}

fn resident_memory_mb() -> Option<f64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_process(pid);
    sys.process(pid)
        .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorSettings;
    use crate::fetcher::Selectors;
    use crate::listing::Listing;
    use crate::notifier::Notification;
    use crate::testing::{
        catalog_page, Card, PageReply, PanickingPages, RecordingNotifier, StaticPages,
    };
    use std::path::Path;
    use tempfile::TempDir;

    fn monitor(
        pages: Vec<PageReply>,
        threshold: usize,
        snapshot_path: &Path,
        archive_dir: &Path,
    ) -> Arc<Monitor<StaticPages, RecordingNotifier>> {
        build(
            StaticPages::new(pages),
            RecordingNotifier::default(),
            threshold,
            snapshot_path,
            archive_dir,
        )
    }

    fn build<S: PageSource + 'static>(
        source: S,
        notifier: RecordingNotifier,
        threshold: usize,
        snapshot_path: &Path,
        archive_dir: &Path,
    ) -> Arc<Monitor<S, RecordingNotifier>> {
        let fetcher = Fetcher::new(
            source,
            Selectors::parse(&SelectorSettings::default()).unwrap(),
            250,
            "800",
        );
        Arc::new(Monitor::new(
            fetcher,
            SnapshotStore::new(snapshot_path, archive_dir),
            AnomalyGuard::new(threshold),
            notifier,
            CycleOptions {
                site_origin: Url::parse("https://shop.example").unwrap(),
                pacing: Pacing::none(),
                interval: Duration::from_secs(1200),
            },
        ))
    }

    fn widget() -> Snapshot {
        std::iter::once(Listing {
            key: "/a".to_string(),
            name: "Widget".to_string(),
            price: "$10".to_string(),
            image_url: None,
        })
        .collect()
    }

    #[tokio::test]
    async fn accepted_cycle_persists_and_notifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.json");
        let monitor = monitor(
            vec![PageReply::Body(catalog_page(&[
                Card::new("/b", "Gadget").price("$20"),
                Card::new("/c", "Gizmo").price("$30").image("//img.example/{width}/c.jpg"),
            ]))],
            2,
            &path,
            &dir.path().join("archive"),
        );
        monitor.store.save(&widget()).unwrap();

        let next = monitor.step(Arc::new(widget())).await;

        assert_eq!(next.keys().cloned().collect::<Vec<_>>(), vec!["/b", "/c"]);
        assert_eq!(monitor.store.load().unwrap(), *next);

        let sent = monitor.notifier.sent();
        assert_eq!(sent.len(), 4);
        assert_eq!(
            sent[0],
            Notification {
                title: "❌ Listing removed (possibly restocking)".to_string(),
                headline: Some("Widget".to_string()),
                body: "Price: $10".to_string(),
                image_url: None,
                link: Some("https://shop.example/a".to_string()),
            }
        );
        assert_eq!(sent[2].image_url.as_deref(), Some("https://img.example/800/c.jpg"));
        assert_eq!(sent[3].body, "Current listings: 2\nAdded: 2\nRemoved: 1");
    }

    #[tokio::test]
    async fn rejected_cycle_archives_and_stays_silent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.json");
        let archive_dir = dir.path().join("archive");
        let cards: Vec<Card> = (0..40)
            .map(|i| Card::new(&format!("/products/{i}"), &format!("Item {i}")))
            .collect();
        let monitor = monitor(
            vec![PageReply::Body(catalog_page(&cards))],
            100,
            &path,
            &archive_dir,
        );
        monitor.store.save(&widget()).unwrap();

        let current = Arc::new(widget());
        let next = monitor.step(Arc::clone(&current)).await;

        assert!(Arc::ptr_eq(&next, &current));
        assert_eq!(monitor.store.load().unwrap(), widget());
        assert!(monitor.notifier.sent().is_empty());

        let archives: Vec<_> = std::fs::read_dir(&archive_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(archives.len(), 1);
        let archived: Snapshot =
            serde_json::from_str(&std::fs::read_to_string(&archives[0]).unwrap()).unwrap();
        assert_eq!(archived.len(), 40);
    }

    #[tokio::test]
    async fn failed_persist_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let monitor = monitor(
            vec![PageReply::Body(catalog_page(&[Card::new("/b", "Gadget")]))],
            1,
            &blocker.join("products.json"),
            &dir.path().join("archive"),
        );

        let current = Arc::new(widget());
        assert!(matches!(
            monitor.run_cycle(&current).await,
            Err(CycleError::Store(_))
        ));

        let next = monitor.step(Arc::clone(&current)).await;
        assert_eq!(*next, widget());
        assert!(monitor.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn rejected_message_is_not_repeated_in_later_cycles() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_page(&[
            Card::new("/a", "A"),
            Card::new("/b", "B").image("https://img.example/broken.jpg"),
            Card::new("/c", "C"),
        ]);
        let monitor = build(
            StaticPages::repeating(PageReply::Body(catalog)),
            RecordingNotifier::failing_when(|n| n.link.as_deref() == Some("https://shop.example/b")),
            1,
            &dir.path().join("products.json"),
            &dir.path().join("archive"),
        );

        let mut current = Arc::new(Snapshot::new());
        for _ in 0..3 {
            current = monitor.step(current).await;
        }

        assert_eq!(current.len(), 3);
        assert_eq!(monitor.store.load().unwrap(), *current);

        let sent = monitor.notifier.sent();
        let items: Vec<_> = sent.iter().filter_map(|m| m.link.as_deref()).collect();
        assert_eq!(items, vec!["https://shop.example/a", "https://shop.example/c"]);
        let summaries: Vec<_> = sent
            .iter()
            .filter(|m| m.link.is_none())
            .map(|m| m.body.as_str())
            .collect();
        assert_eq!(
            summaries,
            vec![
                "Current listings: 3\nAdded: 3\nRemoved: 0",
                "Current listings: 3\nAdded: 0\nRemoved: 0",
                "Current listings: 3\nAdded: 0\nRemoved: 0",
            ]
        );
    }

    #[tokio::test]
    async fn undeliverable_notifications_keep_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let monitor = build(
            StaticPages::new(vec![PageReply::Body(catalog_page(&[Card::new("/b", "Gadget")]))]),
            RecordingNotifier::failing_when(|_| true),
            1,
            &dir.path().join("products.json"),
            &dir.path().join("archive"),
        );

        let current = Arc::new(widget());
        assert!(matches!(
            monitor.run_cycle(&current).await,
            Err(CycleError::Notify(_))
        ));

        let next = monitor.step(Arc::clone(&current)).await;
        assert!(Arc::ptr_eq(&next, &current));
        assert!(monitor.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn panicking_cycle_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let monitor = build(
            PanickingPages,
            RecordingNotifier::default(),
            1,
            &dir.path().join("products.json"),
            &dir.path().join("archive"),
        );

        let current = Arc::new(widget());
        let next = monitor.step(Arc::clone(&current)).await;

        assert!(Arc::ptr_eq(&next, &current));
        assert!(!dir.path().join("products.json").exists());
        assert!(monitor.notifier.sent().is_empty());
    }
}
