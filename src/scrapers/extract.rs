//! Listing-fragment field extraction.
//!
//! Every field is resolved through its own ordered list of sources. The first
//! source returning a known value (non-zero, non-empty) wins, so one record can
//! take its price from the embedded price object and its year from an inline
//! attribute.

use crate::models::ListingRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Selector};
use serde_json::Value;
use std::cell::OnceCell;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

/// Characters used by sellers to make titles stand out
const EMPHASIS_MARKERS: &[char] = &['*', '★', '☆'];

static MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}[-/.](\d{4})\b").expect("month-year regex is valid")
});

static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})\b").expect("year regex is valid"));

/// A value that can be "unknown" without being absent
trait Known {
    fn is_known(&self) -> bool;
}

impl Known for u32 {
    fn is_known(&self) -> bool {
        *self > 0
    }
}

impl Known for String {
    fn is_known(&self) -> bool {
        !self.trim().is_empty()
    }
}

type FieldSource<T> = (&'static str, fn(&Fragment<'_>) -> Option<T>);

const KILOMETER_SOURCES: &[FieldSource<u32>] = &[
    ("data-mileage", kilometers_from_attr),
    ("vehicleDetails", kilometers_from_details),
    ("tracking", kilometers_from_tracking),
];

const YEAR_SOURCES: &[FieldSource<u32>] = &[
    ("data-first-registration", year_from_attr),
    ("vehicleDetails", year_from_details),
    ("tracking", year_from_tracking),
];

const PRICE_SOURCES: &[FieldSource<u32>] = &[
    ("data-price", price_from_attr),
    ("tracking", price_from_tracking),
    ("price object", price_from_price_object),
];

const LOCATION_SOURCES: &[FieldSource<String>] = &[
    ("data-listing-city/zip", location_from_attrs),
    (".location", location_from_dom),
];

fn resolve<T: Known>(fragment: &Fragment<'_>, field: &str, sources: &[FieldSource<T>]) -> Option<T> {
    sources.iter().find_map(|(name, source)| {
        let value = source(fragment).filter(Known::is_known)?;
        debug!("{}: resolved from {}", field, name);
        Some(value)
    })
}

/// Digits of `text` as a number; `None` when there are none
fn digits(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// First-registration year from `MM-YYYY`, `MM/YYYY` or a bare year
fn parse_year(text: &str) -> Option<u32> {
    let year = MONTH_YEAR
        .captures(text)
        .or_else(|| BARE_YEAR.captures(text))?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()?;
    (1900..=2100).contains(&year).then_some(year)
}

/// Integer from a JSON value that may be a number or a numeric string
fn json_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Every JSON value that follows `"key":` in `text`, in order of appearance
fn embedded_values(text: &str, key: &str) -> Vec<Value> {
    let needle = format!("\"{}\"", key);
    text.match_indices(&needle)
        .filter_map(|(pos, m)| {
            let rest = text[pos + m.len()..].trim_start();
            let rest = rest.strip_prefix(':')?.trim_start();
            serde_json::Deserializer::from_str(rest)
                .into_iter::<Value>()
                .next()?
                .ok()
        })
        .collect()
}

/// Unescaped text a fragment may carry JSON in: every attribute value of the
/// fragment and its descendants, then its text and script content
fn embedded_text(element: ElementRef<'_>) -> String {
    let attributes = element
        .descendent_elements()
        .flat_map(|e| e.value().attrs().map(|(_, value)| value));
    attributes
        .chain(element.text())
        .collect::<Vec<_>>()
        .join("\n")
}

/// One listing fragment plus its lazily parsed embedded JSON
struct Fragment<'a> {
    element: ElementRef<'a>,
    embedded: String,
    vehicle_details: OnceCell<Vec<Value>>,
    tracking: OnceCell<Option<Value>>,
}

impl<'a> Fragment<'a> {
    fn new(element: ElementRef<'a>) -> Self {
        Self {
            element,
            embedded: embedded_text(element),
            vehicle_details: OnceCell::new(),
            tracking: OnceCell::new(),
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.element
            .value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn details(&self) -> &[Value] {
        self.vehicle_details.get_or_init(|| {
            let found = embedded_values(&self.embedded, "vehicleDetails")
                .into_iter()
                .find_map(|v| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                });
            if found.is_none() {
                debug!("No vehicleDetails array in fragment");
            }
            found.unwrap_or_default()
        })
    }

    /// `data` text of the first detail entry whose icon name contains `icon`
    fn detail(&self, icon: &str) -> Option<&str> {
        self.details().iter().find_map(|entry| {
            let icon_name = entry.get("iconName")?.as_str()?;
            if icon_name.contains(icon) {
                entry.get("data")?.as_str()
            } else {
                None
            }
        })
    }

    fn tracking(&self) -> Option<&Value> {
        self.tracking
            .get_or_init(|| {
                let found = embedded_values(&self.embedded, "tracking")
                    .into_iter()
                    .find(Value::is_object);
                if found.is_none() {
                    debug!("No tracking object in fragment");
                }
                found
            })
            .as_ref()
    }

    fn link(&self) -> Option<&'a str> {
        let sel = Selector::parse("a[href]").ok()?;
        self.element
            .select(&sel)
            .next()?
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|href| !href.is_empty())
    }

    fn title(&self) -> String {
        let Ok(sel) = Selector::parse("h2") else {
            return String::new();
        };
        self.element
            .select(&sel)
            .next()
            .map(|h2| h2.text().collect::<Vec<_>>().join(" "))
            .unwrap_or_default()
    }
}

fn kilometers_from_attr(fragment: &Fragment<'_>) -> Option<u32> {
    let raw = fragment.attr("data-mileage")?;
    let parsed = raw.parse().ok();
    if parsed.is_none() {
        warn!("Could not read data-mileage '{}'", raw);
    }
    parsed
}

fn kilometers_from_details(fragment: &Fragment<'_>) -> Option<u32> {
    digits(fragment.detail("mileage")?)
}

fn kilometers_from_tracking(fragment: &Fragment<'_>) -> Option<u32> {
    json_number(fragment.tracking()?.get("mileage")?)
}

fn year_from_attr(fragment: &Fragment<'_>) -> Option<u32> {
    parse_year(fragment.attr("data-first-registration")?)
}

fn year_from_details(fragment: &Fragment<'_>) -> Option<u32> {
    parse_year(fragment.detail("calendar")?)
}

fn year_from_tracking(fragment: &Fragment<'_>) -> Option<u32> {
    parse_year(fragment.tracking()?.get("firstRegistration")?.as_str()?)
}

fn price_from_attr(fragment: &Fragment<'_>) -> Option<u32> {
    let raw = fragment.attr("data-price")?;
    let parsed = raw.parse().ok();
    if parsed.is_none() {
        warn!("Could not read data-price '{}'", raw);
    }
    parsed
}

fn price_from_tracking(fragment: &Fragment<'_>) -> Option<u32> {
    json_number(fragment.tracking()?.get("price")?)
}

/// `"price":{"priceFormatted":"€ 15.990,-"}` gives `15990`
fn price_from_price_object(fragment: &Fragment<'_>) -> Option<u32> {
    embedded_values(&fragment.embedded, "price")
        .into_iter()
        .find_map(|v| digits(v.get("priceFormatted")?.as_str()?))
}

fn location_from_attrs(fragment: &Fragment<'_>) -> Option<String> {
    let city = fragment.attr("data-listing-city").unwrap_or_default();
    let zip = fragment.attr("data-listing-zip-code").unwrap_or_default();
    Some(format!("{} {}", city, zip).trim().to_string())
}

fn location_from_dom(fragment: &Fragment<'_>) -> Option<String> {
    let sel = Selector::parse(".location").ok()?;
    let node = fragment.element.select(&sel).next()?;
    Some(collapse_whitespace(&node.text().collect::<Vec<_>>().join(" ")))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trailing path segment of a detail link, ignoring query and fragment
fn id_from_link(href: &str) -> Option<String> {
    let path = href.split(&['?', '#'][..]).next()?;
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `\b` when `name` ends in a word character, so "T5" never cuts into "T50"
fn word_end(name: &str) -> &'static str {
    match name.chars().last() {
        Some(c) if c.is_alphanumeric() || c == '_' => r"\b",
        _ => "",
    }
}

/// Normalize a listing title.
///
/// Markers are removed and whitespace collapsed, then the first of
/// "make model", "makemodel" and "make" that matches as a prefix is cut.
/// An empty result becomes "make model".
pub fn clean_title(raw: &str, make: &str, model: &str) -> String {
    let stripped: String = raw.chars().filter(|c| !EMPHASIS_MARKERS.contains(c)).collect();
    let mut title = collapse_whitespace(&stripped);

    let (make, model) = (make.trim(), model.trim());
    let make_re = format!("{}{}", regex::escape(make), word_end(make));
    let model_re = format!("{}{}", regex::escape(model), word_end(model));
    let patterns = [
        format!(r"(?i)^{}\s*{}\s*", regex::escape(make), model_re),
        format!(r"(?i)^{}{}\s*", regex::escape(make), model_re),
        format!(r"(?i)^{}\s*", make_re),
    ];

    if !make.is_empty() {
        for pattern in &patterns {
            let Ok(re) = Regex::new(pattern) else { continue };
            let cut = re.replace(&title, "").into_owned();
            if cut != title {
                title = cut;
                break;
            }
        }
    }

    let title = title.trim();
    if title.is_empty() {
        format!("{} {}", make, model).trim().to_string()
    } else {
        title.to_string()
    }
}

/// Turns listing fragments into [`ListingRecord`]s
pub struct FieldExtractor {
    base_url: Url,
}

impl FieldExtractor {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid base URL")?;
        Ok(Self { base_url })
    }

    fn absolute_url(&self, href: &str) -> String {
        if Url::parse(href).is_ok() {
            return href.to_string();
        }
        match self.base_url.join(href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                warn!("Could not join link '{}' with base URL: {}", href, e);
                href.to_string()
            }
        }
    }

    /// Extract one record. Returns `None` only when no identifier can be found;
    /// any other missing field degrades to its unknown value.
    pub fn extract(
        &self,
        element: ElementRef<'_>,
        make: &str,
        model: &str,
        now: DateTime<Utc>,
    ) -> Option<ListingRecord> {
        let fragment = Fragment::new(element);
        let link = fragment.link();

        let id = fragment
            .attr("id")
            .map(str::to_string)
            .or_else(|| link.and_then(id_from_link));
        let Some(id) = id else {
            warn!("No listing ID found in fragment, skipping");
            return None;
        };

        let record = ListingRecord {
            url: link.map(|href| self.absolute_url(href)).unwrap_or_default(),
            title: clean_title(&fragment.title(), make, model),
            price: resolve(&fragment, "price", PRICE_SOURCES).unwrap_or(0),
            year: resolve(&fragment, "year", YEAR_SOURCES).unwrap_or(0),
            kilometers: resolve(&fragment, "kilometers", KILOMETER_SOURCES).unwrap_or(0),
            location: resolve(&fragment, "location", LOCATION_SOURCES).unwrap_or_default(),
            make: make.to_string(),
            model: model.to_string(),
            first_seen: now,
            last_seen: now,
            description: None,
            id,
        };

        debug!(
            "Extracted {}: price={} year={} km={} location='{}'",
            record.id, record.price, record.year, record.kilometers, record.location
        );
        Some(record)
    }
}
