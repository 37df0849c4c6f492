use crate::models::ListingRecord;
use crate::scrapers::types::SearchSpec;
use async_trait::async_trait;

/// What one search produced
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub listings: Vec<ListingRecord>,
    /// Set when the page could not be fetched at all; `listings` is empty then
    pub failed: bool,
}

impl SearchOutcome {
    pub fn found(listings: Vec<ListingRecord>) -> Self {
        Self {
            listings,
            failed: false,
        }
    }

    pub fn failed() -> Self {
        Self {
            listings: Vec::new(),
            failed: true,
        }
    }
}

/// Common trait for listing sources
#[async_trait]
pub trait ScraperTrait: Send + Sync {
    /// Run one search. Transport failures are absorbed into
    /// [`SearchOutcome::failed`] so one search never aborts the cycle.
    async fn search(&self, spec: &SearchSpec) -> SearchOutcome;

    /// Release the network session
    async fn close(&self);

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
