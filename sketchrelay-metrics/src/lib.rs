//! Sample protocol, shard routing and batching for sketchrelay.
//!
//! Samples are scraped from targets in the Prometheus text exposition format and parsed into
//! [`Sample`] values with [`Sample::parse_all`]. The [`ShardRouter`] then assigns every sample to
//! a shard based on its series key, and each non-empty group becomes a [`ShardBatch`] that is
//! delivered to the shard's ingest endpoint as an [`IngestPayload`].
//!
//! ```
//! use sketchrelay_common::UnixTimestamp;
//! use sketchrelay_metrics::{RouterConfig, Sample, ShardRouter};
//!
//! let body = b"up{machineid=\"machine_250\"} 1\n";
//! let samples = Sample::parse_all(body).filter_map(Result::ok);
//!
//! let router = ShardRouter::new(RouterConfig::default()).unwrap();
//! let batches = router.partition(samples).into_batches(UnixTimestamp::now());
//! assert_eq!(batches[0].shard.port(), 7101);
//! ```
#![warn(missing_docs)]

mod batch;
mod protocol;
mod router;

pub use batch::*;
pub use protocol::*;
pub use router::*;
