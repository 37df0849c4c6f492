//! The polling loop: one cycle runs every configured search, reconciles the
//! results, then makes a single removal pass.

use crate::config::{min_interval, SearchGroup};
use crate::notifier::Notifier;
use crate::reconcile::{Reconciler, RemovalPass};
use crate::scrapers::ScraperTrait;
use crate::storage::ListingStore;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use tracing::{error, info};

/// Totals for one completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub total_listings: usize,
    pub new_listings: usize,
    pub updated_listings: usize,
    pub store_errors: usize,
    pub searches_completed: usize,
    pub searches_failed: usize,
    pub removal: RemovalPass,
}

impl CycleReport {
    pub fn log_summary(&self) {
        info!("📊 Search cycle summary:");
        info!("  - Total listings found: {}", self.total_listings);
        info!("  - New listings: {}", self.new_listings);
        info!("  - Updated listings: {}", self.updated_listings);
        match self.removal {
            RemovalPass::Removed(n) => info!("  - Removed listings: {}", n),
            RemovalPass::SkippedNothingObserved => info!("  - Removed listings: skipped, nothing observed"),
            RemovalPass::SkippedFailedSearches(n) => {
                info!("  - Removed listings: skipped, {} searches failed", n)
            }
            RemovalPass::Failed => info!("  - Removed listings: removal pass failed"),
        }
        info!("  - Searches completed: {}", self.searches_completed);
        info!("  - Searches failed: {}", self.searches_failed);
        if self.store_errors > 0 {
            info!("  - Store errors: {}", self.store_errors);
        }
    }
}

pub struct Monitor<'a> {
    scraper: &'a dyn ScraperTrait,
    store: &'a dyn ListingStore,
    notifier: &'a dyn Notifier,
    groups: &'a [SearchGroup],
}

impl<'a> Monitor<'a> {
    pub fn new(
        scraper: &'a dyn ScraperTrait,
        store: &'a dyn ListingStore,
        notifier: &'a dyn Notifier,
        groups: &'a [SearchGroup],
    ) -> Self {
        Self {
            scraper,
            store,
            notifier,
            groups,
        }
    }

    /// Run every search once, then remove what none of them observed.
    pub async fn run_cycle(&self) -> CycleReport {
        let reconciler = Reconciler::new(self.store, self.notifier);
        let mut current_ids: HashSet<String> = HashSet::new();
        let mut report = CycleReport {
            total_listings: 0,
            new_listings: 0,
            updated_listings: 0,
            store_errors: 0,
            searches_completed: 0,
            searches_failed: 0,
            removal: RemovalPass::SkippedNothingObserved,
        };

        for spec in self.groups.iter().flat_map(|g| g.searches.iter()) {
            info!("Searching for {}...", spec.name);
            let outcome = self.scraper.search(spec).await;
            if outcome.failed {
                report.searches_failed += 1;
                let message = format!("❌ Error processing {}: search results could not be fetched", spec.name);
                error!("{}", message);
                self.notifier.notify_error(&message).await;
                continue;
            }

            info!("Found {} listings for {}", outcome.listings.len(), spec.name);
            report.total_listings += outcome.listings.len();
            let stats = reconciler
                .observe_all(&outcome.listings, &mut current_ids, Utc::now())
                .await;
            report.new_listings += stats.new;
            report.updated_listings += stats.updated;
            report.store_errors += stats.errors;
            report.searches_completed += 1;
        }

        report.removal = match reconciler.remove_unobserved(&current_ids, report.searches_failed) {
            Ok(pass) => pass,
            Err(e) => {
                error!("Failed to remove stale listings: {:#}", e);
                RemovalPass::Failed
            }
        };
        report
    }

    /// Poll until `shutdown` resolves or, with `once`, after a single cycle.
    ///
    /// A shutdown during a search abandons that search; the removal pass of an
    /// abandoned cycle never runs.
    pub async fn run<F>(&self, once: bool, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = min_interval(self.groups);
        let mut cycle = 0u64;

        loop {
            cycle += 1;
            info!("🔍 Starting search cycle #{}...", cycle);
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = &mut shutdown => {
                    info!("Received shutdown signal during cycle #{}", cycle);
                    break;
                }
            };
            report.log_summary();

            if once {
                break;
            }

            info!(
                "⏱️ Search cycle completed. Next check in {} minutes...",
                interval.as_secs() / 60
            );
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    info!("Received shutdown signal. Shutting down gracefully...");
                    break;
                }
            }
        }

        info!("Closing {} session...", self.scraper.source_name());
        self.scraper.close().await;
    }
}
