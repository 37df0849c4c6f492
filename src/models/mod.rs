use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core vehicle listing data model
///
/// Numeric fields use `0` as the "unknown" sentinel, text fields use the
/// empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    pub make: String,
    pub model: String,
    pub title: String,
    pub price: u32,
    pub year: u32,
    pub kilometers: u32,
    pub location: String,
    pub url: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Reserved for a later detail-page fetch, never filled by the listing page.
    pub description: Option<String>,
}

impl ListingRecord {
    /// Carry the mutable fields of a fresh observation onto a stored record.
    ///
    /// `first_seen` stays as stored; `last_seen` moves to `now`.
    pub fn refresh_from(&mut self, observed: &ListingRecord, now: DateTime<Utc>) {
        self.make = observed.make.clone();
        self.model = observed.model.clone();
        self.title = observed.title.clone();
        self.price = observed.price;
        self.year = observed.year;
        self.kilometers = observed.kilometers;
        self.location = observed.location.clone();
        self.url = observed.url.clone();
        if observed.description.is_some() {
            self.description = observed.description.clone();
        }
        self.last_seen = now.max(self.first_seen);
    }
}

/// How one observed listing was classified during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Updated,
}

#[cfg(test)]
pub(crate) fn sample_listing(id: &str) -> ListingRecord {
    let now = Utc::now();
    ListingRecord {
        id: id.to_string(),
        make: "Volkswagen".to_string(),
        model: "T5".to_string(),
        title: "Multivan Comfortline".to_string(),
        price: 24_990,
        year: 2012,
        kilometers: 148_000,
        location: "Berlin 10115".to_string(),
        url: format!("https://www.autoscout24.de/angebote/{}", id),
        first_seen: now,
        last_seen: now,
        description: None,
    }
}
