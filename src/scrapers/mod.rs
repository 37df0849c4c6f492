pub mod autoscout;
pub mod dom;
pub mod extract;
pub mod fetcher;
pub mod partition;
pub mod query;
pub mod traits;
pub mod types;

pub use autoscout::AutoScoutScraper;
pub use traits::{ScraperTrait, SearchOutcome};
