//! Loading of the scrape target list.
//!
//! Targets are read from a Prometheus-style YAML document. Only the first entry of
//! `scrape_configs` is used:
//!
//! ```yaml
//! scrape_configs:
//!   - job_name: fleet
//!     scrape_interval: 10s
//!     static_configs:
//!       - targets: ["localhost:8000", "localhost:8001"]
//! ```

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sketchrelay_common::parse_duration;
use url::Url;

use crate::{ConfigError, ConfigErrorKind};

/// Interval used when the target list does not specify a valid one.
const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(10);

/// Interval used in place of a zero interval.
const MIN_SCRAPE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Debug, Deserialize)]
struct ScrapeConfig {
    scrape_interval: Option<String>,
    #[serde(default)]
    static_configs: Vec<StaticConfig>,
}

#[derive(Debug, Deserialize)]
struct StaticConfig {
    #[serde(default)]
    targets: Vec<String>,
}

/// A single endpoint that exposes metrics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapeTarget {
    name: String,
    url: Url,
}

impl ScrapeTarget {
    /// Creates a target from a `host:port` string or a base URL.
    ///
    /// Targets without a scheme are scraped at `http://<target>/metrics`.
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let raw = if target.contains("://") {
            format!("{}/metrics", target.trim_end_matches('/'))
        } else {
            format!("http://{target}/metrics")
        };

        let url = raw.parse::<Url>().map_err(|error| {
            ConfigError::new(ConfigErrorKind::InvalidTarget(target.to_owned(), error))
        })?;

        Ok(Self {
            name: target.to_owned(),
            url,
        })
    }

    /// Returns the target as it was listed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the URL of the metrics endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

/// The targets to scrape and how often to scrape them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetList {
    /// All targets, in the order they are listed.
    pub targets: Vec<ScrapeTarget>,
    /// Sleep between two cycles.
    pub scrape_interval: Duration,
}

impl TargetList {
    /// Loads the target list from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::file(ConfigErrorKind::CouldNotOpenFile(e), path))?;

        Self::from_yaml_str(&contents).map_err(|e| ConfigError::file(e.into_kind(), path))
    }

    /// Parses the target list from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: TargetsFile = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::new(ConfigErrorKind::BadYaml(e)))?;

        let config = file
            .scrape_configs
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::new(ConfigErrorKind::MissingTargets))?;

        if config.static_configs.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::MissingTargets));
        }

        let targets = config
            .static_configs
            .iter()
            .flat_map(|c| &c.targets)
            .map(|t| ScrapeTarget::parse(t))
            .collect::<Result<Vec<_>, _>>()?;

        if targets.is_empty() {
            sketchrelay_log::warn!("target list is empty, cycles will not collect any samples");
        }

        Ok(Self {
            targets,
            scrape_interval: scrape_interval(config.scrape_interval.as_deref()),
        })
    }

    /// Returns the number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if there are no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn scrape_interval(raw: Option<&str>) -> Duration {
    let Some(raw) = raw else {
        return DEFAULT_SCRAPE_INTERVAL;
    };

    match parse_duration(raw) {
        Ok(interval) if interval.is_zero() => {
            sketchrelay_log::warn!(
                interval = raw,
                "scrape interval must not be zero, using {}s",
                MIN_SCRAPE_INTERVAL.as_secs()
            );
            MIN_SCRAPE_INTERVAL
        }
        Ok(interval) => interval,
        Err(error) => {
            sketchrelay_log::warn!(
                error = &error as &dyn Error,
                interval = raw,
                "invalid scrape interval, using {}s",
                DEFAULT_SCRAPE_INTERVAL.as_secs()
            );
            DEFAULT_SCRAPE_INTERVAL
        }
    }
}
