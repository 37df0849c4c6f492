//! Per-cycle set reconciliation between scraped listings and the store.

use crate::models::{Classification, ListingRecord};
use crate::notifier::Notifier;
use crate::storage::ListingStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Classification counts for one batch of observed listings
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub new: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Why the end-of-cycle removal pass did or did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPass {
    Removed(usize),
    SkippedNothingObserved,
    SkippedFailedSearches(usize),
    Failed,
}

pub struct Reconciler<'a> {
    store: &'a dyn ListingStore,
    notifier: &'a dyn Notifier,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ListingStore, notifier: &'a dyn Notifier) -> Self {
        Self { store, notifier }
    }

    /// Classify and persist one observation. Notification happens only for
    /// new listings and only after the row is stored.
    pub async fn observe(&self, observed: &ListingRecord, now: DateTime<Utc>) -> Result<Classification> {
        match self.store.get(&observed.id)? {
            None => {
                let mut record = observed.clone();
                record.first_seen = now;
                record.last_seen = now;
                self.store.upsert(&record)?;
                info!(
                    "New listing: {} {} ({}) - {} [{}]",
                    record.make, record.model, record.year, record.price, record.id
                );
                self.notifier.notify_created(&record).await;
                Ok(Classification::New)
            }
            Some(mut stored) => {
                stored.refresh_from(observed, now);
                self.store.upsert(&stored)?;
                debug!("Updated existing listing: {}", stored.id);
                Ok(Classification::Updated)
            }
        }
    }

    /// Reconcile a batch, adding every observed id to `current_ids`.
    ///
    /// Store errors are logged per listing and never stop the batch.
    pub async fn observe_all(
        &self,
        listings: &[ListingRecord],
        current_ids: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) -> BatchStats {
        let mut stats = BatchStats::default();
        for listing in listings {
            current_ids.insert(listing.id.clone());
            match self.observe(listing, now).await {
                Ok(Classification::New) => stats.new += 1,
                Ok(Classification::Updated) => stats.updated += 1,
                Err(e) => {
                    stats.errors += 1;
                    error!("Failed to reconcile listing {}: {:#}", listing.id, e);
                }
            }
        }
        stats
    }

    /// Delete stored listings that no search observed this cycle.
    ///
    /// Skipped entirely when nothing was observed or when a search failed to
    /// fetch, so an outage never reads as "everything sold".
    pub fn remove_unobserved(&self, current_ids: &HashSet<String>, failed_searches: usize) -> Result<RemovalPass> {
        if failed_searches > 0 {
            warn!(
                "Skipping removal pass: {} searches failed this cycle",
                failed_searches
            );
            return Ok(RemovalPass::SkippedFailedSearches(failed_searches));
        }
        if current_ids.is_empty() {
            warn!("Skipping removal pass: no listings observed this cycle");
            return Ok(RemovalPass::SkippedNothingObserved);
        }

        let ids: Vec<String> = current_ids.iter().cloned().collect();
        let removed = self.store.delete_where_id_not_in(&ids)?;
        info!("Removed {} listings that are no longer available", removed);
        Ok(RemovalPass::Removed(removed))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::sample_listing;
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every notification it is asked to send
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub created: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_created(&self, listing: &ListingRecord) {
            self.created.lock().unwrap().push(listing.id.clone());
        }

        async fn notify_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    pub(crate) fn temp_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = SqliteStore::new(&dir.path().join("listings.db")).unwrap();
        (dir, store)
    }

    /// Delegates to a real store but fails `get` or `upsert` for chosen ids
    struct FlakyStore {
        inner: SqliteStore,
        fail_get: HashSet<String>,
        fail_upsert: HashSet<String>,
    }

    impl ListingStore for FlakyStore {
        fn get(&self, id: &str) -> Result<Option<ListingRecord>> {
            if self.fail_get.contains(id) {
                anyhow::bail!("database is locked");
            }
            self.inner.get(id)
        }

        fn upsert(&self, record: &ListingRecord) -> Result<()> {
            if self.fail_upsert.contains(&record.id) {
                anyhow::bail!("disk I/O error");
            }
            self.inner.upsert(record)
        }

        fn delete_where_id_not_in(&self, ids: &[String]) -> Result<usize> {
            self.inner.delete_where_id_not_in(ids)
        }

        fn list_all(&self) -> Result<Vec<ListingRecord>> {
            self.inner.list_all()
        }

        fn clear_all(&self) -> Result<usize> {
            self.inner.clear_all()
        }
    }

    fn ids(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn new_then_updated_notifies_once() {
        let (_dir, store) = temp_store();
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(&store, &notifier);

        let t0 = Utc::now();
        let first = sample_listing("X");
        assert_eq!(reconciler.observe(&first, t0).await.unwrap(), Classification::New);
        assert_eq!(notifier.created.lock().unwrap().len(), 1);

        let mut second = sample_listing("X");
        second.price = 21_000;
        let t1 = t0 + Duration::minutes(15);
        assert_eq!(
            reconciler.observe(&second, t1).await.unwrap(),
            Classification::Updated
        );
        assert_eq!(notifier.created.lock().unwrap().len(), 1);

        let stored = store.get("X").unwrap().unwrap();
        assert_eq!(stored.price, 21_000);
        assert_eq!(stored.first_seen.timestamp(), t0.timestamp());
        assert_eq!(stored.last_seen.timestamp(), t1.timestamp());
    }

    #[tokio::test]
    async fn first_seen_survives_repeated_cycles() {
        let (_dir, store) = temp_store();
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(&store, &notifier);
        let listing = sample_listing("same");

        let t0 = Utc::now();
        let mut seen = HashSet::new();
        reconciler.observe_all(&[listing.clone()], &mut seen, t0).await;
        for minutes in [15, 30, 45] {
            let stats = reconciler
                .observe_all(&[listing.clone()], &mut seen, t0 + Duration::minutes(minutes))
                .await;
            assert_eq!(stats, BatchStats { new: 0, updated: 1, errors: 0 });
        }

        let stored = store.get("same").unwrap().unwrap();
        assert_eq!(stored.first_seen.timestamp(), t0.timestamp());
        assert_eq!(
            stored.last_seen.timestamp(),
            (t0 + Duration::minutes(45)).timestamp()
        );
    }

    #[tokio::test]
    async fn store_errors_are_counted_and_skip_notification() {
        let (_dir, inner) = temp_store();
        let store = FlakyStore {
            inner,
            fail_get: ids(&["locked"]),
            fail_upsert: ids(&["unsaved"]),
        };
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(&store, &notifier);

        let batch: Vec<ListingRecord> = ["first", "unsaved", "locked", "last"]
            .into_iter()
            .map(sample_listing)
            .collect();
        let mut seen = HashSet::new();
        let stats = reconciler.observe_all(&batch, &mut seen, Utc::now()).await;

        assert_eq!(stats, BatchStats { new: 2, updated: 0, errors: 2 });
        assert_eq!(*notifier.created.lock().unwrap(), ["first", "last"]);
        assert_eq!(seen.len(), 4);
        assert!(store.get("first").unwrap().is_some());
        assert!(store.get("last").unwrap().is_some());
        assert!(store.get("unsaved").unwrap().is_none());
    }

    #[tokio::test]
    async fn removes_exactly_the_unobserved() {
        let (_dir, store) = temp_store();
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(&store, &notifier);
        for id in ["A", "B", "C"] {
            store.upsert(&sample_listing(id)).unwrap();
        }

        let pass = reconciler.remove_unobserved(&ids(&["A", "C"]), 0).unwrap();
        assert_eq!(pass, RemovalPass::Removed(1));
        assert!(store.get("B").unwrap().is_none());
        assert!(store.get("A").unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_cycle_keeps_store() {
        let (_dir, store) = temp_store();
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(&store, &notifier);
        store.upsert(&sample_listing("A")).unwrap();

        let pass = reconciler.remove_unobserved(&HashSet::new(), 0).unwrap();
        assert_eq!(pass, RemovalPass::SkippedNothingObserved);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_search_blocks_removal() {
        let (_dir, store) = temp_store();
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(&store, &notifier);
        store.upsert(&sample_listing("A")).unwrap();
        store.upsert(&sample_listing("B")).unwrap();

        let pass = reconciler.remove_unobserved(&ids(&["A"]), 1).unwrap();
        assert_eq!(pass, RemovalPass::SkippedFailedSearches(1));
        assert_eq!(store.list_all().unwrap().len(), 2);
    }
}
