use crate::models::ListingRecord;
use crate::scrapers::extract::FieldExtractor;
use crate::scrapers::fetcher::{Fetcher, RetryPolicy};
use crate::scrapers::partition::ResultsPage;
use crate::scrapers::query::build_url;
use crate::scrapers::traits::{ScraperTrait, SearchOutcome};
use crate::scrapers::types::SearchSpec;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub const BASE_URL: &str = "https://www.autoscout24.de";

/// AutoScout24 listing-search scraper
pub struct AutoScoutScraper {
    base_url: String,
    fetcher: Fetcher,
    extractor: FieldExtractor,
}

impl AutoScoutScraper {
    /// Create a scraper against the public site with default retry bounds
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL, RetryPolicy::default())
    }

    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            fetcher: Fetcher::new(base_url.clone(), policy)?,
            extractor: FieldExtractor::new(&base_url)?,
            base_url,
        })
    }

    /// Partition a fetched page and extract a record from every primary fragment
    pub fn parse_listings(&self, raw_page: &str, spec: &SearchSpec, now: DateTime<Utc>) -> Vec<ListingRecord> {
        let page = ResultsPage::parse(raw_page);
        match page.reported_total() {
            Some(total) => info!("Total results reported for {}: {}", spec.name, total),
            None => debug!("No listHeaderTitle in page for {}", spec.name),
        }

        let partition = page.partition();
        if !partition.recommended.is_empty() {
            debug!("Ignoring {} recommended fragments", partition.recommended.len());
        }

        let total = partition.primary.len();
        let listings: Vec<ListingRecord> = partition
            .primary
            .iter()
            .enumerate()
            .filter_map(|(i, fragment)| {
                let record = self.extractor.extract(*fragment, &spec.make, &spec.model, now);
                if record.is_none() {
                    warn!("Failed to extract listing {}/{}", i + 1, total);
                }
                record
            })
            .collect();

        info!(
            "Extracted {} of {} listings for {} (reported total: {})",
            listings.len(),
            total,
            spec.name,
            partition
                .reported_total
                .map(|t| t.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
        listings
    }
}

#[async_trait]
impl ScraperTrait for AutoScoutScraper {
    async fn search(&self, spec: &SearchSpec) -> SearchOutcome {
        let url = build_url(&self.base_url, spec);
        info!("Searching {}: {}", spec.name, url);

        match self.fetcher.fetch(&url).await {
            Ok(body) => SearchOutcome::found(self.parse_listings(&body, spec, Utc::now())),
            Err(e) => {
                error!("Failed to fetch search results for {}: {}", spec.name, e);
                SearchOutcome::failed()
            }
        }
    }

    async fn close(&self) {
        self.fetcher.close();
    }

    fn source_name(&self) -> &'static str {
        "AutoScout24"
    }
}
