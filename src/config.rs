//! Search configuration loaded from YAML files.

use crate::scrapers::types::{Range, SearchSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Files starting with this prefix are templates, not live searches
const TEMPLATE_PREFIX: &str = "default_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration files found in {0} (copy default_config.yaml to get started)")]
    NoConfigFiles(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid search in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// YAML scalars that the site treats as opaque codes (`body: 6`, `zip: "10115"`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(i64),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

fn default_countries() -> Vec<String> {
    vec!["DE".to_string()]
}

fn default_interval() -> u64 {
    15
}

#[derive(Debug, Deserialize)]
struct General {
    #[serde(default = "default_countries")]
    countries: Vec<String>,
    #[serde(default = "default_interval")]
    check_interval_minutes: u64,
}

impl Default for General {
    fn default() -> Self {
        Self {
            countries: default_countries(),
            check_interval_minutes: default_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    name: Option<String>,
    make: String,
    #[serde(default)]
    models: Vec<String>,
    price_range: Option<Range>,
    year_range: Option<Range>,
    max_kilometers: Option<u32>,
    body_type: Option<Scalar>,
    seats: Option<Range>,
    fuel_type: Option<Scalar>,
    transmission: Option<Scalar>,
    doors: Option<Range>,
    #[serde(default)]
    equipment: Vec<Scalar>,
    color: Option<Scalar>,
    zip: Option<Scalar>,
    zipr: Option<u32>,
    search_id: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    #[serde(default)]
    general: General,
    #[serde(default)]
    searches: Vec<SearchEntry>,
}

/// Searches from one config file plus how often to run them
#[derive(Debug, Clone)]
pub struct SearchGroup {
    pub source: PathBuf,
    pub check_interval: Duration,
    pub searches: Vec<SearchSpec>,
}

fn check_range(path: &Path, label: &str, field: &str, range: Option<Range>) -> Result<(), ConfigError> {
    match range {
        Some(r) if !r.is_ordered() => Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: format!("{}: {} min is greater than max", label, field),
        }),
        _ => Ok(()),
    }
}

impl SearchEntry {
    /// One spec per model; every spec shares the group's countries
    fn expand(self, path: &Path, countries: &[String]) -> Result<Vec<SearchSpec>, ConfigError> {
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.make, self.models.join(", ")));

        let invalid = |reason: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: format!("{}: {}", label, reason),
        };
        if self.make.trim().is_empty() {
            return Err(invalid("make is empty"));
        }
        if self.models.is_empty() {
            return Err(invalid("at least one model is required"));
        }
        check_range(path, &label, "price_range", self.price_range)?;
        check_range(path, &label, "year_range", self.year_range)?;
        check_range(path, &label, "seats", self.seats)?;
        check_range(path, &label, "doors", self.doors)?;

        let equipment: Vec<String> = self.equipment.into_iter().map(String::from).collect();
        let specs = self
            .models
            .iter()
            .map(|model| SearchSpec {
                name: format!("{} {} ({})", self.make, model, label),
                countries: countries.to_vec(),
                price: self.price_range,
                year: self.year_range,
                max_kilometers: self.max_kilometers,
                seats: self.seats,
                doors: self.doors,
                body_type: self.body_type.clone().map(String::from),
                fuel_type: self.fuel_type.clone().map(String::from),
                transmission: self.transmission.clone().map(String::from),
                equipment: equipment.clone(),
                color: self.color.clone().map(String::from),
                zip: self.zip.clone().map(String::from),
                zip_radius: self.zipr,
                search_id: self.search_id.clone().map(String::from),
                ..SearchSpec::new(self.make.clone(), model.clone())
            })
            .collect();
        Ok(specs)
    }
}

/// Parse one group file's contents
pub fn parse_group(path: &Path, contents: &str) -> Result<SearchGroup, ConfigError> {
    let file: GroupFile = serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if file.general.check_interval_minutes == 0 {
        return Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: "check_interval_minutes must be positive".to_string(),
        });
    }

    let mut searches = Vec::new();
    for entry in file.searches {
        searches.extend(entry.expand(path, &file.general.countries)?);
    }

    Ok(SearchGroup {
        source: path.to_path_buf(),
        check_interval: Duration::from_secs(file.general.check_interval_minutes * 60),
        searches,
    })
}

fn is_search_file(path: &Path) -> bool {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let is_template = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMPLATE_PREFIX));
    is_yaml && !is_template
}

/// Load every search group in `dir`, in file-name order.
pub fn load_groups(dir: &Path) -> Result<Vec<SearchGroup>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_search_file(p))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(ConfigError::NoConfigFiles(dir.to_path_buf()));
    }

    let mut groups = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let group = parse_group(&path, &contents)?;
        info!(
            "Loaded configuration from {}: {} searches",
            group.source.display(),
            group.searches.len()
        );
        groups.push(group);
    }

    let total: usize = groups.iter().map(|g| g.searches.len()).sum();
    info!("Total configuration files: {}, total searches: {}", groups.len(), total);
    Ok(groups)
}

/// Shortest check interval across all groups
pub fn min_interval(groups: &[SearchGroup]) -> Duration {
    groups
        .iter()
        .map(|g| g.check_interval)
        .min()
        .unwrap_or(Duration::from_secs(default_interval() * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VANS: &str = r#"
general:
  countries: [DE, AT]
  check_interval_minutes: 10
searches:
  - name: Campers
    make: Volkswagen
    models: [T5, T6]
    price_range: { min: 10000, max: 40000 }
    year_range: { min: 2010, max: null }
    max_kilometers: 200000
    body_type: 6
    equipment: [37, "11"]
    zip: 10115
    zipr: 100
"#;

    #[test]
    fn expands_one_spec_per_model() {
        let group = parse_group(Path::new("vans.yaml"), VANS).unwrap();
        assert_eq!(group.check_interval, Duration::from_secs(600));
        assert_eq!(group.searches.len(), 2);

        let t6 = &group.searches[1];
        assert_eq!(t6.model, "T6");
        assert_eq!(t6.countries, ["DE", "AT"]);
        assert_eq!(t6.price, Some(Range { min: Some(10_000), max: Some(40_000) }));
        assert_eq!(t6.year, Some(Range { min: Some(2010), max: None }));
        assert_eq!(t6.body_type.as_deref(), Some("6"));
        assert_eq!(t6.equipment, ["37", "11"]);
        assert_eq!(t6.zip.as_deref(), Some("10115"));
        assert_eq!(t6.zip_radius, Some(100));
        assert!(t6.fuel_type.is_none());
    }

    #[test]
    fn rejects_inverted_range() {
        let yaml = "searches:\n  - make: BMW\n    models: [X3]\n    price_range: { min: 9000, max: 100 }\n";
        let err = parse_group(Path::new("bad.yaml"), yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_search_without_models() {
        let yaml = "searches:\n  - make: BMW\n";
        assert!(matches!(
            parse_group(Path::new("bad.yaml"), yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            parse_group(Path::new("bad.yaml"), "searches: [ {make: "),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn skips_templates_and_picks_min_interval() {
        let dir = TempDir::new().expect("failed to create temp dir");
        std::fs::write(dir.path().join("default_config.yaml"), "not: [valid").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("vans.yaml"), VANS).unwrap();
        std::fs::write(
            dir.path().join("suvs.yml"),
            "general:\n  check_interval_minutes: 30\nsearches:\n  - make: BMW\n    models: [X3]\n",
        )
        .unwrap();

        let groups = load_groups(dir.path()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(min_interval(&groups), Duration::from_secs(600));
        assert_eq!(groups[0].searches[0].countries, ["DE"]);
    }

    #[test]
    fn empty_directory_is_fatal() {
        let dir = TempDir::new().expect("failed to create temp dir");
        std::fs::write(dir.path().join("default_config.yaml"), VANS).unwrap();
        assert!(matches!(load_groups(dir.path()), Err(ConfigError::NoConfigFiles(_))));
    }
}
