use crate::scrapers::dom::has_marked_ancestor;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Listing-shaped elements, most specific first
const FRAGMENT_SELECTORS: &[&str] = &[
    "article",
    r#"[data-testid="listing-item"]"#,
    ".ListItem_article",
];

const MAIN_REGION_SELECTOR: &str = r#"div[class*="ListPage_main"]"#;

const RECOMMENDATION_MARKER: &str = "recommendation";

static HEADER_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""listHeaderTitle"\s*:\s*"([^"]*)""#).expect("header regex is valid")
});

static LOCALE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:[.,\u{a0}\u{202f} ]\d{3})+|\d+").expect("number regex is valid")
});

/// Result count the page announces in its list header, e.g.
/// `"5.808 Angebote für Volkswagen"` gives `5808`.
pub fn reported_total(raw_page: &str) -> Option<u32> {
    let title = HEADER_TITLE.captures(raw_page)?.get(1)?.as_str();
    debug!("Found listHeaderTitle: {}", title);
    let number = LOCALE_NUMBER.find(title)?.as_str();
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Search-results page parsed once, partitioned on demand
pub struct ResultsPage {
    document: Html,
    reported_total: Option<u32>,
}

/// Fragments of one page split into real results and embedded recommendations
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub primary: Vec<ElementRef<'a>>,
    pub recommended: Vec<ElementRef<'a>>,
    pub reported_total: Option<u32>,
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!("Invalid selector {}: {:?}", css, e);
            None
        }
    }
}

impl ResultsPage {
    pub fn parse(raw_page: &str) -> Self {
        Self {
            reported_total: reported_total(raw_page),
            document: Html::parse_document(raw_page),
        }
    }

    pub fn reported_total(&self) -> Option<u32> {
        self.reported_total
    }

    /// First selector that matches anything, with its matches in document order
    fn candidates(&self) -> (Option<Selector>, Vec<ElementRef<'_>>) {
        for css in FRAGMENT_SELECTORS {
            let Some(sel) = selector(css) else { continue };
            let found: Vec<_> = self.document.select(&sel).collect();
            if !found.is_empty() {
                info!("Found {} listing fragments via {}", found.len(), css);
                return (Some(sel), found);
            }
        }
        (None, Vec::new())
    }

    pub fn partition(&self) -> Partition<'_> {
        let total = self.reported_total;
        let mut partition = Partition {
            reported_total: total,
            ..Partition::default()
        };

        if total == Some(0) {
            info!("Page reports zero results");
            return partition;
        }

        let (fragment_sel, candidates) = self.candidates();
        let Some(fragment_sel) = fragment_sel else {
            if let Some(total) = total.filter(|t| *t > 0) {
                warn!("Header reports {} results, but no listing fragments were found", total);
            }
            return partition;
        };

        let main_region = selector(MAIN_REGION_SELECTOR)
            .and_then(|sel| self.document.select(&sel).next());

        match main_region {
            Some(main) => {
                partition.primary = main.select(&fragment_sel).collect();
                partition.recommended = candidates
                    .iter()
                    .filter(|c| !partition.primary.iter().any(|p| p.id() == c.id()))
                    .copied()
                    .collect();
                debug!(
                    "Main region holds {} fragments, {} outside it",
                    partition.primary.len(),
                    partition.recommended.len()
                );
            }
            None => {
                debug!("No main results region, classifying by ancestors");
                let (recommended, primary): (Vec<_>, Vec<_>) = candidates
                    .iter()
                    .copied()
                    .partition(|c| has_marked_ancestor(*c, "div", RECOMMENDATION_MARKER));
                partition.primary = primary;
                partition.recommended = recommended;

                if partition.primary.is_empty() && total.is_some_and(|t| t > 0) {
                    warn!("Every fragment looked like a recommendation; keeping all of them");
                    partition.primary = candidates;
                }
            }
        }

        if let Some(total) = total {
            let total = total as usize;
            if total > 0 && partition.primary.len() > total {
                info!(
                    "Limiting results to {} as reported in header (found {})",
                    total,
                    partition.primary.len()
                );
                partition.primary.truncate(total);
            }
            if total > 0 && partition.primary.is_empty() {
                warn!("Header reports {} results, but no primary listings remained", total);
            }
        }

        partition
    }
}
