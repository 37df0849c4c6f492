use serde::{Deserialize, Serialize};

/// Inclusive numeric bound pair; either side may be open
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Range {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl Range {
    pub fn is_ordered(&self) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }
}

/// One (make, model) search with its filter parameters
///
/// `None` means "no constraint" and is never turned into a default value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchSpec {
    /// Human label used in logs and error notifications
    pub name: String,
    pub make: String,
    pub model: String,
    /// ISO country codes (AT, DE, ...)
    pub countries: Vec<String>,
    pub price: Option<Range>,
    /// First registration year
    pub year: Option<Range>,
    pub max_kilometers: Option<u32>,
    pub seats: Option<Range>,
    pub doors: Option<Range>,
    pub body_type: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub equipment: Vec<String>,
    pub color: Option<String>,
    pub zip: Option<String>,
    /// Radius around `zip` in km
    pub zip_radius: Option<u32>,
    pub search_id: Option<String>,
}

impl SearchSpec {
    pub fn new(make: impl Into<String>, model: impl Into<String>) -> Self {
        let make = make.into();
        let model = model.into();
        Self {
            name: format!("{} {}", make, model),
            make,
            model,
            ..Self::default()
        }
    }
}
