use serde::Serialize;
use sketchrelay_common::UnixTimestamp;

use crate::{Partition, Sample, ShardId};

/// Samples destined for one shard within one cycle.
///
/// A batch is created when a cycle is partitioned, delivered once and then discarded.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardBatch {
    /// The receiving shard.
    pub shard: ShardId,
    /// The timestamp of the cycle that collected the samples.
    pub timestamp: UnixTimestamp,
    /// The samples of this batch.
    pub samples: Vec<Sample>,
}

/// The body of a request to a shard's ingest endpoint.
#[derive(Debug, Serialize)]
pub struct IngestPayload<'a> {
    /// Cycle timestamp in milliseconds.
    #[serde(rename = "Timestamp")]
    pub timestamp: UnixTimestamp,
    /// The samples of the batch.
    #[serde(rename = "Metrics")]
    pub metrics: &'a [Sample],
}

impl ShardBatch {
    /// Returns the number of samples in this batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if this batch contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the ingest request body for this batch.
    pub fn payload(&self) -> IngestPayload<'_> {
        IngestPayload {
            timestamp: self.timestamp,
            metrics: &self.samples,
        }
    }

    /// Splits this batch into consecutive chunks of at most `max_size` samples.
    ///
    /// A `max_size` of `0` disables splitting. All chunks keep the shard and timestamp of the
    /// original batch.
    pub fn split(self, max_size: usize) -> Vec<ShardBatch> {
        if max_size == 0 || self.samples.len() <= max_size {
            return vec![self];
        }

        let Self {
            shard,
            timestamp,
            samples,
        } = self;

        let mut chunks = Vec::with_capacity(samples.len().div_ceil(max_size));
        let mut samples = samples.into_iter().peekable();
        while samples.peek().is_some() {
            chunks.push(ShardBatch {
                shard,
                timestamp,
                samples: samples.by_ref().take(max_size).collect(),
            });
        }

        chunks
    }
}

impl Partition {
    /// Converts the non-empty groups of this partition into batches stamped with `timestamp`.
    pub fn into_batches(self, timestamp: UnixTimestamp) -> Vec<ShardBatch> {
        self.groups
            .into_iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(shard, samples)| ShardBatch {
                shard,
                timestamp,
                samples,
            })
            .collect()
    }
}
