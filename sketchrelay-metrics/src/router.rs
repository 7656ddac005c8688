//! Routing of samples to shards.
//!
//! Every series is identified by a key read from one of its labels, for example
//! `machineid="machine_523"`. The integer after the first underscore is the series index, and
//! shards own contiguous ranges of indexes: with a base port of `7100` and `200` machines per port,
//! indexes `0..200` go to `7100`, indexes `200..400` to `7101`, and so on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Sample;

/// Identifies a shard by the port of its ingest endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ShardId(u16);

impl ShardId {
    /// Creates a shard identifier for the given port.
    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    /// Returns the port of the shard's ingest endpoint.
    pub const fn port(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The result of routing a single series key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Route {
    /// The shard that receives the series.
    pub shard: ShardId,
    /// `true` if the key was missing or malformed and the default index was used.
    pub defaulted: bool,
}

/// Configuration of the shard layout.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    /// Port of the first shard.
    pub base_port: u16,
    /// Number of consecutive series indexes assigned to each shard.
    ///
    /// Must be greater than zero.
    pub machines_per_port: u32,
    /// The label holding the series key.
    pub series_label: String,
    /// Key used for samples that lack the series label.
    pub default_key: String,
    /// Shards that never receive data.
    ///
    /// Defaults to the port of the control plane.
    pub port_blocklist: BTreeSet<u16>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_port: 7100,
            machines_per_port: 200,
            series_label: "machineid".to_owned(),
            default_key: "machine_0".to_owned(),
            port_blocklist: BTreeSet::from([7000]),
        }
    }
}

/// Error returned by [`ShardRouter::new`] for an unusable [`RouterConfig`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidRouterConfig {
    /// `machines_per_port` is zero.
    #[error("machines per port must be greater than zero")]
    ZeroMachinesPerPort,
}

/// Samples of one cycle grouped by their shard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    /// Samples for every shard that is not blocklisted.
    pub groups: BTreeMap<ShardId, Vec<Sample>>,
    /// Number of samples dropped per blocklisted shard.
    pub blocked: BTreeMap<ShardId, usize>,
    /// Number of samples whose series key was missing or malformed.
    pub defaulted: usize,
}

impl Partition {
    /// Returns the number of samples that will be dispatched.
    pub fn routed_samples(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Returns the number of samples dropped because their shard is blocklisted.
    pub fn blocked_samples(&self) -> usize {
        self.blocked.values().sum()
    }
}

/// Deterministically assigns series to shards.
#[derive(Clone, Debug)]
pub struct ShardRouter {
    config: RouterConfig,
}

impl ShardRouter {
    /// Creates a router for the given layout.
    pub fn new(config: RouterConfig) -> Result<Self, InvalidRouterConfig> {
        if config.machines_per_port == 0 {
            return Err(InvalidRouterConfig::ZeroMachinesPerPort);
        }

        Ok(Self { config })
    }

    /// Returns the layout of this router.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Returns the series key of a sample, or the default key if the label is missing.
    pub fn series_key<'a>(&'a self, sample: &'a Sample) -> &'a str {
        sample
            .label(&self.config.series_label)
            .unwrap_or(&self.config.default_key)
    }

    /// Routes a series key of the form `<prefix>_<index>` to its shard.
    ///
    /// The index is read from the segment after the first underscore and may be negative, in
    /// which case floor division places it below the base port. Keys without a parseable index
    /// use index `0` and are flagged as [`defaulted`](Route::defaulted). Shards outside the port
    /// range saturate at port `0` or the highest port.
    pub fn route_key(&self, key: &str) -> Route {
        let index = key.split('_').nth(1).and_then(|s| s.parse::<i64>().ok());
        let defaulted = index.is_none();

        let offset = index
            .unwrap_or(0)
            .div_euclid(i64::from(self.config.machines_per_port));
        let port = i64::from(self.config.base_port)
            .saturating_add(offset)
            .clamp(0, i64::from(u16::MAX));

        Route {
            shard: ShardId(port as u16),
            defaulted,
        }
    }

    /// Routes a sample by its series key.
    ///
    /// Samples without the series label are routed with the default key, which is not counted as
    /// defaulted unless the default key itself is malformed.
    pub fn route(&self, sample: &Sample) -> Route {
        self.route_key(self.series_key(sample))
    }

    /// Returns `true` if no data may be sent to the given shard.
    pub fn is_blocked(&self, shard: ShardId) -> bool {
        self.config.port_blocklist.contains(&shard.port())
    }

    /// Groups samples by their shard, dropping samples routed to blocklisted shards.
    ///
    /// Every sample ends up in exactly one group unless its shard is blocklisted. The order of
    /// samples within a group follows the input order.
    pub fn partition(&self, samples: impl IntoIterator<Item = Sample>) -> Partition {
        let mut partition = Partition::default();

        for sample in samples {
            let route = self.route(&sample);
            if route.defaulted {
                partition.defaulted += 1;
            }

            if self.is_blocked(route.shard) {
                *partition.blocked.entry(route.shard).or_default() += 1;
            } else {
                partition.groups.entry(route.shard).or_default().push(sample);
            }
        }

        partition
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn router() -> ShardRouter {
        ShardRouter::new(RouterConfig::default()).unwrap()
    }

    fn machine(index: usize) -> Sample {
        Sample::new("up", 1.0).with_label("machineid", format!("machine_{index}"))
    }

    #[test]
    fn test_basic_routing() {
        let router = router();
        let ports: Vec<_> = ["machine_0", "machine_199", "machine_200", "machine_523"]
            .iter()
            .map(|key| router.route_key(key).shard.port())
            .collect();
        assert_eq!(ports, vec![7100, 7100, 7101, 7102]);
    }

    #[test]
    fn test_malformed_key_is_defaulted() {
        let router = router();
        for key in ["unexpected_format", "machine", "machine_", "machine_x3", ""] {
            assert_eq!(
                router.route_key(key),
                Route {
                    shard: ShardId::new(7100),
                    defaulted: true,
                },
                "key {key:?}"
            );
        }
        assert!(!router.route_key("machine_5").defaulted);
    }

    #[test]
    fn test_negative_index_floors_below_base_port() {
        let router = router();
        assert_eq!(
            router.route_key("machine_-3"),
            Route {
                shard: ShardId::new(7099),
                defaulted: false,
            }
        );
        assert_eq!(router.route_key("machine_-200").shard, ShardId::new(7099));
        assert_eq!(router.route_key("machine_-201").shard, ShardId::new(7098));
        assert_eq!(
            router.route_key(&format!("machine_{}", i64::MIN)).shard,
            ShardId::new(0)
        );
    }

    #[test]
    fn test_index_uses_segment_after_first_underscore() {
        let router = router();
        assert_eq!(router.route_key("machine_400_extra").shard, ShardId::new(7102));
        assert_eq!(router.route_key("_250").shard, ShardId::new(7101));
    }

    #[test]
    fn test_missing_label_uses_default_key() {
        let router = router();
        let sample = Sample::new("up", 1.0);
        assert_eq!(router.series_key(&sample), "machine_0");
        assert_eq!(
            router.route(&sample),
            Route {
                shard: ShardId::new(7100),
                defaulted: false,
            }
        );
    }

    #[test]
    fn test_custom_series_label() {
        let router = ShardRouter::new(RouterConfig {
            series_label: "instance_key".to_owned(),
            machines_per_port: 10,
            ..Default::default()
        })
        .unwrap();
        let sample = Sample::new("up", 1.0).with_label("instance_key", "node_25");
        assert_eq!(router.route(&sample).shard, ShardId::new(7102));
    }

    #[test]
    fn test_route_is_deterministic() {
        let first = router();
        let second = router();
        for index in (0..5000).step_by(37) {
            let key = format!("machine_{index}");
            assert_eq!(first.route_key(&key), first.route_key(&key));
            assert_eq!(first.route_key(&key), second.route_key(&key));
        }
    }

    #[test]
    fn test_shard_saturates() {
        let router = ShardRouter::new(RouterConfig {
            base_port: 65000,
            machines_per_port: 1,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(router.route_key("machine_100000").shard, ShardId::new(u16::MAX));
        assert_eq!(
            router.route_key(&format!("machine_{}", i64::MAX)).shard,
            ShardId::new(u16::MAX)
        );
    }

    #[test]
    fn test_zero_machines_per_port_rejected() {
        let result = ShardRouter::new(RouterConfig {
            machines_per_port: 0,
            ..Default::default()
        });
        assert_eq!(result.unwrap_err(), InvalidRouterConfig::ZeroMachinesPerPort);
    }

    #[test]
    fn test_partition_covers_all_samples() {
        let router = router();
        let samples: Vec<_> = (0..1000).map(machine).collect();
        let partition = router.partition(samples.clone());

        assert_eq!(partition.groups.len(), 5);
        assert!(partition.blocked.is_empty());
        assert_eq!(partition.routed_samples(), samples.len());

        let mut union: Vec<_> = partition.groups.values().flatten().cloned().collect();
        union.sort_by(|a, b| a.labels.cmp(&b.labels));
        let mut expected = samples;
        expected.sort_by(|a, b| a.labels.cmp(&b.labels));
        assert_eq!(union, expected);
    }

    #[test]
    fn test_partition_preserves_order_within_shard() {
        let router = router();
        let partition = router.partition([machine(5), machine(300), machine(1)]);
        assert_eq!(
            partition.groups[&ShardId::new(7100)],
            vec![machine(5), machine(1)]
        );
        assert_eq!(partition.groups[&ShardId::new(7101)], vec![machine(300)]);
    }

    #[test]
    fn test_partition_drops_blocklisted_shard() {
        let router = ShardRouter::new(RouterConfig {
            port_blocklist: BTreeSet::from([7101]),
            ..Default::default()
        })
        .unwrap();

        let samples: Vec<_> = (0..600).map(machine).collect();
        let partition = router.partition(samples);

        assert!(router.is_blocked(ShardId::new(7101)));
        assert!(!partition.groups.contains_key(&ShardId::new(7101)));
        assert_eq!(partition.blocked, BTreeMap::from([(ShardId::new(7101), 200)]));
        assert_eq!(partition.routed_samples(), 400);
        assert_eq!(partition.blocked_samples(), 200);
    }

    #[test]
    fn test_partition_counts_defaulted_keys() {
        let router = router();
        let samples = vec![
            Sample::new("up", 1.0).with_label("machineid", "garbage"),
            Sample::new("up", 1.0).with_label("machineid", "also-garbage"),
            machine(3),
        ];
        let partition = router.partition(samples);
        assert_eq!(partition.defaulted, 2);
        assert_eq!(partition.groups[&ShardId::new(7100)].len(), 3);
    }

    #[test]
    fn test_default_blocklist_contains_control_port() {
        assert!(router().is_blocked(ShardId::new(7000)));
    }
}
