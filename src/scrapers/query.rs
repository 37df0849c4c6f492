use crate::scrapers::types::{Range, SearchSpec};
use url::form_urlencoded::byte_serialize;

/// Model codes whose search must be broadened to every trim with `-(alle)`
const ALL_TRIMS_MODELS: &[&str] = &["t3", "t4", "t5", "t6"];

/// ISO country code to the site's `cy` token
const COUNTRY_CODES: &[(&str, &str)] = &[
    ("AT", "A"),
    ("DE", "D"),
    ("BE", "B"),
    ("ES", "E"),
    ("FR", "F"),
    ("IT", "I"),
    ("LU", "L"),
    ("NL", "NL"),
];

/// Used when no configured country maps to a known token
const ALL_COUNTRIES: &[&str] = &["D", "A", "B", "E", "F", "I", "L", "NL"];

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

fn path_segment(value: &str) -> String {
    let slug = value.trim().to_lowercase().replace(' ', "-");
    encode(&slug)
}

fn model_segment(model: &str) -> String {
    let model = model.trim().to_lowercase();
    if ALL_TRIMS_MODELS.contains(&model.as_str()) {
        format!("{}-(alle)", path_segment(&model))
    } else {
        path_segment(&model)
    }
}

fn country_tokens(countries: &[String]) -> Vec<&'static str> {
    let tokens: Vec<&'static str> = countries
        .iter()
        .filter_map(|country| {
            let country = country.trim().to_uppercase();
            COUNTRY_CODES
                .iter()
                .find(|(iso, _)| *iso == country)
                .map(|(_, token)| *token)
        })
        .collect();

    if tokens.is_empty() {
        ALL_COUNTRIES.to_vec()
    } else {
        tokens
    }
}

fn push_range(params: &mut Vec<String>, range: Option<Range>, from: &str, to: &str) {
    let Some(range) = range else { return };
    if let Some(min) = range.min {
        params.push(format!("{}={}", from, min));
    }
    if let Some(max) = range.max {
        params.push(format!("{}={}", to, max));
    }
}

fn push_text(params: &mut Vec<String>, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        params.push(format!("{}={}", key, encode(value)));
    }
}

/// Build the listing-search URL for one spec.
///
/// The parameter order is fixed so identical specs always produce
/// byte-identical URLs. Fixed parameters (vehicle type, damaged exclusion,
/// sort order, listing state) are always present.
pub fn build_url(base_url: &str, spec: &SearchSpec) -> String {
    let base_url = base_url.trim_end_matches('/');
    let make = path_segment(&spec.make);
    let model = model_segment(&spec.model);

    let path = if model.is_empty() {
        format!("{}/lst/{}", base_url, make)
    } else {
        format!("{}/lst/{}/{}", base_url, make, model)
    };

    let mut params: Vec<String> = Vec::new();
    params.push("atype=C".to_string());
    params.push(format!("cy={}", country_tokens(&spec.countries).join("%2C")));
    params.push("damaged_listing=exclude".to_string());
    params.push("desc=0".to_string());
    push_range(&mut params, spec.year, "fregfrom", "fregto");
    if let Some(km) = spec.max_kilometers {
        params.push(format!("kmto={}", km));
    }
    params.push("ocs_listing=include".to_string());
    params.push("powertype=kw".to_string());
    push_range(&mut params, spec.price, "pricefrom", "priceto");
    push_text(&mut params, "search_id", spec.search_id.as_deref());
    params.push("sort=standard".to_string());
    params.push("source=homepage_search-mask".to_string());
    params.push("ustate=N%2CU".to_string());
    push_text(&mut params, "body", spec.body_type.as_deref());
    push_range(&mut params, spec.seats, "seatsfrom", "seatsto");
    push_text(&mut params, "fuel", spec.fuel_type.as_deref());
    push_text(&mut params, "gear", spec.transmission.as_deref());
    push_range(&mut params, spec.doors, "doorfrom", "doorto");
    for equipment in &spec.equipment {
        push_text(&mut params, "eq", Some(equipment));
    }
    push_text(&mut params, "color", spec.color.as_deref());
    push_text(&mut params, "zip", spec.zip.as_deref());
    if let Some(radius) = spec.zip_radius {
        params.push(format!("zipr={}", radius));
    }

    format!("{}?{}", path, params.join("&"))
}
