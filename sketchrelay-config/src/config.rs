use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sketchrelay_log::{LogConfig, LogLevel};
use sketchrelay_metrics::{RouterConfig, ShardRouter};
use url::Url;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
}

impl ConfigError {
    #[inline]
    pub(crate) fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
        }
    }

    #[inline]
    pub(crate) fn field(field: &'static str) -> Self {
        Self {
            source: ConfigErrorSource::FieldOverride(field.to_owned()),
            kind: ConfigErrorKind::InvalidValue,
        }
    }

    #[inline]
    pub(crate) fn file(kind: ConfigErrorKind, p: impl AsRef<Path>) -> Self {
        Self {
            source: ConfigErrorSource::File(p.as_ref().to_path_buf()),
            kind,
        }
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }

    /// Consumes the error and returns its kind, dropping the source.
    pub(crate) fn into_kind(self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.kind.source()
    }
}

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile(#[source] io::Error),
    /// Failed to serialize the config.
    #[error("could not write config file")]
    CouldNotWriteFile(#[source] serde_yaml::Error),
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml(#[source] serde_yaml::Error),
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson(#[source] serde_json::Error),
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
    /// The targets file has no scrape config with static targets.
    #[error("no scrape config with static targets")]
    MissingTargets,
    /// A scrape target cannot be turned into a URL.
    #[error("invalid scrape target {0:?}")]
    InvalidTarget(String, #[source] url::ParseError),
}

/// A configuration object that is stored in a YAML file.
pub(crate) trait ConfigObject: DeserializeOwned + Serialize {
    /// The name of the object, used in log messages.
    fn name() -> &'static str;

    /// Loads the object from the given file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let f = fs::File::open(path)
            .map_err(|e| ConfigError::file(ConfigErrorKind::CouldNotOpenFile(e), path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::file(ConfigErrorKind::BadYaml(e), path))
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// Base URL of the control plane.
    pub control_url: Option<String>,
    /// Port of the first shard.
    pub base_port: Option<String>,
    /// Number of series indexes per shard.
    pub machines_per_port: Option<String>,
    /// Expected number of series per target, announced at registration.
    pub series_per_target: Option<String>,
    /// Comma-separated list of blocklisted shard ports.
    pub port_blocklist: Option<String>,
    /// Minimum spacing between two flushes, in seconds.
    pub batch_interval: Option<String>,
    /// Maximum number of samples per ingest request.
    pub batch_max_size: Option<String>,
    /// Timeout of ingest requests, in seconds.
    pub post_timeout: Option<String>,
    /// Timeout of scrape requests, in seconds.
    pub scrape_timeout: Option<String>,
    /// Delay after capacity registration, in seconds.
    pub register_grace: Option<String>,
    /// Path to the targets file.
    pub targets: Option<String>,
    /// Log level of sketchrelay's crates.
    pub log_level: Option<String>,
    /// Host and port of the statsd server.
    pub statsd: Option<String>,
}

/// Parses a comma-separated list of ports.
///
/// Empty entries are skipped. Entries that are not valid ports are skipped with a warning.
///
/// # Example
///
/// ```
/// use std::collections::BTreeSet;
/// use sketchrelay_config::parse_port_blocklist;
///
/// assert_eq!(parse_port_blocklist("7000, 7005,,x"), BTreeSet::from([7000, 7005]));
/// ```
pub fn parse_port_blocklist(raw: &str) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<u16>() {
            Ok(port) => {
                ports.insert(port);
            }
            Err(error) => sketchrelay_log::warn!(
                error = &error as &dyn Error,
                token,
                "ignoring invalid port in blocklist"
            ),
        }
    }

    ports
}

/// Upper bound for any configured duration, one day.
const MAX_SECONDS: f64 = 86_400.0;

/// Returns `true` for a finite number of seconds between zero and [`MAX_SECONDS`].
fn is_valid_seconds(secs: f64) -> bool {
    secs.is_finite() && (0.0..=MAX_SECONDS).contains(&secs)
}

/// Parses a number of seconds between zero and [`MAX_SECONDS`].
fn parse_seconds(value: &str, field: &'static str) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(secs) if is_valid_seconds(secs) => Ok(secs),
        _ => Err(ConfigError::field(field)),
    }
}

/// Converts validated seconds into a [`Duration`].
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Connection to the control plane.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Relay {
    /// Base URL of the control plane that receives capacity registrations.
    ///
    /// The host of this URL also serves the shard ingest endpoints.
    control_url: Url,
}

impl Default for Relay {
    fn default() -> Self {
        Relay {
            control_url: "http://localhost:7000/".parse().unwrap(),
        }
    }
}

/// Controls scraping of targets.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Scrape {
    /// Timeout of a single scrape in seconds.
    timeout: f64,
    /// Path to the Prometheus-style targets file.
    targets: Option<PathBuf>,
    /// Expected number of series per target, used for capacity registration.
    series_per_target_hint: u64,
}

impl Default for Scrape {
    fn default() -> Self {
        Scrape {
            timeout: 5.0,
            targets: None,
            series_per_target_hint: 1250,
        }
    }
}

/// Controls delivery of batches to shards.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Dispatch {
    /// Timeout of a single ingest request in seconds.
    timeout: f64,
    /// Number of retries after a failed attempt.
    retries: u32,
    /// Base of the linear retry backoff in seconds.
    backoff: f64,
    /// Minimum spacing between two cycle flushes in seconds.
    batch_interval: f64,
    /// Maximum number of samples per ingest request. `0` disables splitting.
    batch_max_size: usize,
}

impl Default for Dispatch {
    fn default() -> Self {
        Dispatch {
            timeout: 8.0,
            retries: 2,
            backoff: 0.2,
            batch_interval: 0.5,
            batch_max_size: 0,
        }
    }
}

/// Controls the capacity registration at startup.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Registration {
    /// Timeout of the registration request in seconds.
    timeout: f64,
    /// Delay after registration before the first cycle, in seconds.
    grace: f64,
}

impl Default for Registration {
    fn default() -> Self {
        Registration {
            timeout: 5.0,
            grace: 0.5,
        }
    }
}

/// Controls the throughput report.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Reporter {
    /// Interval between two throughput reports in seconds.
    interval: f64,
}

impl Default for Reporter {
    fn default() -> Self {
        Reporter { interval: 5.0 }
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"sketchrelay"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    ///
    /// For example, a value of `0.3` means that only 30% of the emitted metrics will be sent.
    /// Defaults to `1.0` (100%).
    sample_rate: f32,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "sketchrelay".into(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            sample_rate: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    relay: Relay,
    #[serde(default)]
    routing: RouterConfig,
    #[serde(default)]
    scrape: Scrape,
    #[serde(default)]
    dispatch: Dispatch,
    #[serde(default)]
    registration: Registration,
    #[serde(default)]
    reporter: Reporter,
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from the given YAML file.
    ///
    /// Sections and fields missing from the file use their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        sketchrelay_log::debug!(
            "loading {} from {}",
            ConfigValues::name(),
            path.display()
        );

        let config = Config {
            values: ConfigValues::load(path)?,
            path: path.to_path_buf(),
        };

        config
            .validate()
            .map_err(|e| ConfigError::file(e.kind, path))?;

        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::new(ConfigErrorKind::BadJson(err)))?,
            path: PathBuf::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that cannot be expressed in the config types.
    fn validate(&self) -> Result<(), ConfigError> {
        if ShardRouter::new(self.values.routing.clone()).is_err() {
            return Err(ConfigError::field("routing.machines_per_port"));
        }

        let durations = [
            ("scrape.timeout", self.values.scrape.timeout),
            ("dispatch.timeout", self.values.dispatch.timeout),
            ("dispatch.backoff", self.values.dispatch.backoff),
            ("dispatch.batch_interval", self.values.dispatch.batch_interval),
            ("registration.timeout", self.values.registration.timeout),
            ("registration.grace", self.values.registration.grace),
        ];

        for (field, secs) in durations {
            if !is_valid_seconds(secs) {
                return Err(ConfigError::field(field));
            }
        }

        let interval = self.values.reporter.interval;
        if !is_valid_seconds(interval) || interval == 0.0 {
            return Err(ConfigError::field("reporter.interval"));
        }

        Ok(())
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(control_url) = overrides.control_url {
            self.values.relay.control_url = control_url
                .parse::<Url>()
                .map_err(|_| ConfigError::field("control_url"))?;
        }

        let routing = &mut self.values.routing;
        if let Some(base_port) = overrides.base_port {
            routing.base_port = base_port
                .trim()
                .parse()
                .map_err(|_| ConfigError::field("base_port"))?;
        }

        if let Some(machines_per_port) = overrides.machines_per_port {
            routing.machines_per_port = match machines_per_port.trim().parse() {
                Ok(value) if value > 0 => value,
                _ => return Err(ConfigError::field("machines_per_port")),
            };
        }

        if let Some(blocklist) = overrides.port_blocklist {
            routing.port_blocklist = parse_port_blocklist(&blocklist);
        }

        let scrape = &mut self.values.scrape;
        if let Some(series) = overrides.series_per_target {
            scrape.series_per_target_hint = series
                .trim()
                .parse()
                .map_err(|_| ConfigError::field("series_per_target"))?;
        }

        if let Some(timeout) = overrides.scrape_timeout {
            scrape.timeout = parse_seconds(&timeout, "scrape_timeout")?;
        }

        if let Some(targets) = overrides.targets {
            scrape.targets = Some(PathBuf::from(targets));
        }

        let dispatch = &mut self.values.dispatch;
        if let Some(interval) = overrides.batch_interval {
            dispatch.batch_interval = parse_seconds(&interval, "batch_interval")?;
        }

        if let Some(max_size) = overrides.batch_max_size {
            dispatch.batch_max_size = max_size
                .trim()
                .parse()
                .map_err(|_| ConfigError::field("batch_max_size"))?;
        }

        if let Some(timeout) = overrides.post_timeout {
            dispatch.timeout = parse_seconds(&timeout, "post_timeout")?;
        }

        if let Some(grace) = overrides.register_grace {
            self.values.registration.grace = parse_seconds(&grace, "register_grace")?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse::<LogLevel>()
                .map_err(|_| ConfigError::field("log_level"))?;
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd);
        }

        Ok(self)
    }

    /// Returns the path of the config file.
    ///
    /// The path is empty if the config was not loaded from a file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::new(ConfigErrorKind::CouldNotWriteFile(e)))
    }

    /// Returns the base URL of the control plane.
    pub fn control_url(&self) -> &Url {
        &self.values.relay.control_url
    }

    /// Returns the host of the control plane, which also serves the shard ingest endpoints.
    ///
    /// Falls back to `localhost` if the control URL has no host.
    pub fn control_host(&self) -> &str {
        self.values.relay.control_url.host_str().unwrap_or("localhost")
    }

    /// Returns the URL that receives the capacity registration.
    pub fn registration_url(&self) -> String {
        let base = self.values.relay.control_url.as_str();
        format!("{}/register_config", base.trim_end_matches('/'))
    }

    /// Returns the shard layout.
    pub fn router_config(&self) -> &RouterConfig {
        &self.values.routing
    }

    /// Returns the path to the targets file, if configured.
    pub fn targets_path(&self) -> Option<&Path> {
        self.values.scrape.targets.as_deref()
    }

    /// Returns the timeout of a single scrape.
    pub fn scrape_timeout(&self) -> Duration {
        seconds(self.values.scrape.timeout)
    }

    /// Returns the expected number of series per target.
    pub fn series_per_target_hint(&self) -> u64 {
        self.values.scrape.series_per_target_hint
    }

    /// Returns the timeout of a single ingest request.
    pub fn post_timeout(&self) -> Duration {
        seconds(self.values.dispatch.timeout)
    }

    /// Returns the number of retries after a failed ingest attempt.
    pub fn dispatch_retries(&self) -> u32 {
        self.values.dispatch.retries
    }

    /// Returns the base of the linear retry backoff.
    pub fn dispatch_backoff(&self) -> Duration {
        seconds(self.values.dispatch.backoff)
    }

    /// Returns the minimum spacing between two cycle flushes.
    pub fn batch_interval(&self) -> Duration {
        seconds(self.values.dispatch.batch_interval)
    }

    /// Returns the maximum number of samples per ingest request, `0` for no limit.
    pub fn batch_max_size(&self) -> usize {
        self.values.dispatch.batch_max_size
    }

    /// Returns the timeout of the capacity registration.
    pub fn registration_timeout(&self) -> Duration {
        seconds(self.values.registration.timeout)
    }

    /// Returns the delay between capacity registration and the first cycle.
    pub fn register_grace(&self) -> Duration {
        seconds(self.values.registration.grace)
    }

    /// Returns the interval of throughput reports.
    pub fn report_interval(&self) -> Duration {
        seconds(self.values.reporter.interval)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the socket addresses for statsd.
    ///
    /// If stats is disabled entirely this returns `None`.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix that should be added to all metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the global sample rate for all metrics.
    pub fn metrics_sample_rate(&self) -> f32 {
        self.values.metrics.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.control_url().as_str(), "http://localhost:7000/");
        assert_eq!(config.control_host(), "localhost");
        assert_eq!(
            config.registration_url(),
            "http://localhost:7000/register_config"
        );
        assert_eq!(config.router_config(), &RouterConfig::default());
        assert_eq!(config.series_per_target_hint(), 1250);
        assert_eq!(config.scrape_timeout(), Duration::from_secs(5));
        assert_eq!(config.post_timeout(), Duration::from_secs(8));
        assert_eq!(config.dispatch_retries(), 2);
        assert_eq!(config.dispatch_backoff(), Duration::from_millis(200));
        assert_eq!(config.batch_interval(), Duration::from_millis(500));
        assert_eq!(config.batch_max_size(), 0);
        assert_eq!(config.register_grace(), Duration::from_millis(500));
        assert_eq!(config.report_interval(), Duration::from_secs(5));
        assert_eq!(config.statsd_addr(), None);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
relay:
  control_url: "http://control.internal:9000"
routing:
  base_port: 8100
  machines_per_port: 50
  port_blocklist: [9000, 8101]
dispatch:
  timeout: 2
  batch_max_size: 500
logging:
  level: debug
"#
        )
        .unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.control_host(), "control.internal");
        assert_eq!(config.router_config().base_port, 8100);
        assert_eq!(config.router_config().machines_per_port, 50);
        assert_eq!(
            config.router_config().port_blocklist,
            BTreeSet::from([8101, 9000])
        );
        assert_eq!(config.router_config().series_label, "machineid");
        assert_eq!(config.post_timeout(), Duration::from_secs(2));
        assert_eq!(config.batch_max_size(), 500);
        assert_eq!(config.dispatch_retries(), 2);
        assert_eq!(config.logging().level, LogLevel::Debug);
        assert_eq!(config.path(), file.path());
    }

    #[test]
    fn test_missing_file() {
        let error = Config::from_path("/nonexistent/sketchrelay.yml").unwrap_err();
        assert!(matches!(error.kind(), ConfigErrorKind::CouldNotOpenFile(_)));
        assert_eq!(
            error.to_string(),
            "could not open config file (file /nonexistent/sketchrelay.yml)"
        );
    }

    #[test]
    fn test_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "routing: [not, a, map").unwrap();
        let error = Config::from_path(file.path()).unwrap_err();
        assert!(matches!(error.kind(), ConfigErrorKind::BadYaml(_)));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_zero_machines_per_port_rejected() {
        let error = Config::from_json_value(serde_json::json!({
            "routing": {"machines_per_port": 0}
        }))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field routing.machines_per_port)"
        );
    }

    #[test]
    fn test_negative_duration_rejected() {
        let error = Config::from_json_value(serde_json::json!({
            "dispatch": {"backoff": -1.0}
        }))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field dispatch.backoff)"
        );
    }

    #[test]
    fn test_oversized_duration_rejected() {
        let error = Config::from_json_value(serde_json::json!({
            "dispatch": {"batch_interval": 1e30}
        }))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field dispatch.batch_interval)"
        );

        let error = Config::from_json_value(serde_json::json!({
            "reporter": {"interval": 1e30}
        }))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field reporter.interval)"
        );

        let mut config = Config::default();
        let overrides = OverridableConfig {
            batch_interval: Some("1e30".to_owned()),
            ..Default::default()
        };
        let error = config.apply_override(overrides).unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field batch_interval)"
        );

        assert!(
            Config::from_json_value(serde_json::json!({
                "dispatch": {"batch_interval": 86400.0}
            }))
            .is_ok()
        );
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                control_url: Some("http://10.0.0.5:7000".to_owned()),
                base_port: Some("7200".to_owned()),
                machines_per_port: Some("100".to_owned()),
                series_per_target: Some("99".to_owned()),
                port_blocklist: Some("7000,7201".to_owned()),
                batch_interval: Some("0.25".to_owned()),
                batch_max_size: Some("1000".to_owned()),
                post_timeout: Some("3".to_owned()),
                scrape_timeout: Some("1.5".to_owned()),
                register_grace: Some("0".to_owned()),
                targets: Some("targets.yml".to_owned()),
                log_level: Some("trace".to_owned()),
                statsd: Some("127.0.0.1:8125".to_owned()),
            })
            .unwrap();

        assert_eq!(config.control_host(), "10.0.0.5");
        assert_eq!(config.router_config().base_port, 7200);
        assert_eq!(config.router_config().machines_per_port, 100);
        assert_eq!(
            config.router_config().port_blocklist,
            BTreeSet::from([7000, 7201])
        );
        assert_eq!(config.series_per_target_hint(), 99);
        assert_eq!(config.batch_interval(), Duration::from_millis(250));
        assert_eq!(config.batch_max_size(), 1000);
        assert_eq!(config.post_timeout(), Duration::from_secs(3));
        assert_eq!(config.scrape_timeout(), Duration::from_millis(1500));
        assert_eq!(config.register_grace(), Duration::ZERO);
        assert_eq!(config.targets_path(), Some(Path::new("targets.yml")));
        assert_eq!(config.logging().level, LogLevel::Trace);
        assert_eq!(config.statsd_addr(), Some("127.0.0.1:8125"));
    }

    #[test]
    fn test_invalid_override_names_field() {
        let cases = [
            (
                OverridableConfig {
                    base_port: Some("70000".to_owned()),
                    ..Default::default()
                },
                "base_port",
            ),
            (
                OverridableConfig {
                    machines_per_port: Some("0".to_owned()),
                    ..Default::default()
                },
                "machines_per_port",
            ),
            (
                OverridableConfig {
                    post_timeout: Some("-1".to_owned()),
                    ..Default::default()
                },
                "post_timeout",
            ),
            (
                OverridableConfig {
                    batch_interval: Some("soon".to_owned()),
                    ..Default::default()
                },
                "batch_interval",
            ),
            (
                OverridableConfig {
                    control_url: Some("not a url".to_owned()),
                    ..Default::default()
                },
                "control_url",
            ),
        ];

        for (overrides, field) in cases {
            let error = Config::default().apply_override(overrides).unwrap_err();
            assert_eq!(
                error.to_string(),
                format!("invalid config value (field {field})")
            );
        }
    }

    #[test]
    fn test_blocklist_skips_invalid_tokens() {
        assert_eq!(
            parse_port_blocklist(" 7000 ,abc, 7001,,99999,-1"),
            BTreeSet::from([7000, 7001])
        );
        assert!(parse_port_blocklist("").is_empty());
    }

    #[test]
    fn test_registration_url_keeps_path() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                control_url: Some("http://control:7000/api/".to_owned()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            config.registration_url(),
            "http://control:7000/api/register_config"
        );
    }

    #[test]
    fn test_yaml_roundtrip_of_defaults() {
        let yaml = Config::default().to_yaml_string().unwrap();
        assert!(yaml.contains("control_url: http://localhost:7000/"));
        assert!(yaml.contains("machines_per_port: 200"));
        assert!(yaml.contains("batch_interval: 0.5"));
    }
}
