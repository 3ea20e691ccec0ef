use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::error::StoreError;
use crate::listing::Snapshot;
use crate::store::SnapshotStore;

#[derive(Debug)]
pub enum Decision {
    Accept(Snapshot),
    /// The scrape was archived at `archive`; the stored snapshot stays as it was.
    Reject { archive: PathBuf, count: usize },
}

/// Refuses scrapes too small to be a full catalog, so a partial scrape is never
/// reported as a mass delisting.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyGuard {
    threshold: usize,
}

impl AnomalyGuard {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn is_plausible(&self, snapshot: &Snapshot) -> bool {
        snapshot.len() >= self.threshold
    }

    pub fn check(
        &self,
        snapshot: Snapshot,
        store: &SnapshotStore,
        at: DateTime<Local>,
    ) -> Result<Decision, StoreError> {
        if self.is_plausible(&snapshot) {
            return Ok(Decision::Accept(snapshot));
        }

        let archive = store.archive(&snapshot, at)?;
        tracing::warn!(
            count = snapshot.len(),
            threshold = self.threshold,
            archive = %archive.display(),
            "Scrape below threshold, skipping diff and notifications"
        );
        Ok(Decision::Reject {
            archive,
            count: snapshot.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Listing;
    use tempfile::TempDir;

    fn snapshot_of(count: usize) -> Snapshot {
        (0..count)
            .map(|i| Listing {
                key: format!("/products/{i}"),
                name: format!("Item {i}"),
                price: "¥500".to_string(),
                image_url: None,
            })
            .collect()
    }

    #[test]
    fn plausibility_is_a_strict_lower_bound() {
        let guard = AnomalyGuard::new(100);
        assert!(!guard.is_plausible(&snapshot_of(99)));
        assert!(guard.is_plausible(&snapshot_of(100)));
        assert!(guard.is_plausible(&snapshot_of(150)));
        assert!(AnomalyGuard::new(0).is_plausible(&Snapshot::new()));
    }

    #[test]
    fn accepts_full_scrape_without_archiving() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("products.json"), dir.path().join("archive"));

        let decision = AnomalyGuard::new(10).check(snapshot_of(10), &store, Local::now()).unwrap();
        assert!(matches!(decision, Decision::Accept(s) if s.len() == 10));
        assert!(!dir.path().join("archive").exists());
    }

    #[test]
    fn rejects_small_scrape_and_archives_it() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("products.json"), dir.path().join("archive"));
        let previous = snapshot_of(120);
        store.save(&previous).unwrap();

        let decision = AnomalyGuard::new(100).check(snapshot_of(40), &store, Local::now()).unwrap();
        let Decision::Reject { archive, count } = decision else {
            panic!("expected rejection");
        };

        assert_eq!(count, 40);
        let archived: Snapshot =
            serde_json::from_str(&std::fs::read_to_string(&archive).unwrap()).unwrap();
        assert_eq!(archived, snapshot_of(40));
        assert_eq!(store.load().unwrap(), previous);
    }
}
