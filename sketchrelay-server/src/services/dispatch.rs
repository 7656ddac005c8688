//! Delivery of per-shard batches to the ingest endpoints.
//!
//! Every cycle, the dispatcher partitions the collected samples by shard and posts one payload per
//! shard concurrently. Batches larger than the configured maximum size are split into chunks which
//! are delivered in order. Failed deliveries are retried with a linear backoff, but only if the
//! shard could not be reached: a shard that answers with an error status has seen the batch and is
//! not asked again.

use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use sketchrelay_common::{RetryBackoff, UnixTimestamp};
use sketchrelay_config::Config;
use sketchrelay_metrics::{Sample, ShardBatch, ShardId, ShardRouter};
use sketchrelay_statsd::metric;
use tokio::time::Instant;

use crate::http::{HttpError, Response, StatusCode};
use crate::services::reporter::SentCounter;
use crate::statsd::{SketchCounters, SketchHistograms};

/// Settings of the [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Host serving the shard ingest endpoints.
    pub host: String,
    /// Timeout of a single ingest request.
    pub timeout: Duration,
    /// Number of retries after a failed attempt.
    pub retries: u32,
    /// Base of the linear backoff between attempts.
    pub backoff: Duration,
    /// Minimum spacing between two flushes.
    pub batch_interval: Duration,
    /// Maximum number of samples per payload, `0` for no limit.
    pub batch_max_size: usize,
}

impl DispatchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.control_host().to_owned(),
            timeout: config.post_timeout(),
            retries: config.dispatch_retries(),
            backoff: config.dispatch_backoff(),
            batch_interval: config.batch_interval(),
            batch_max_size: config.batch_max_size(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("could not serialize batch")]
    Serialize(#[source] HttpError),
    #[error("could not send batch")]
    SendFailed(#[source] reqwest::Error),
    #[error("shard rejected batch with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

impl DispatchError {
    /// Returns `true` if another attempt could succeed.
    fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::SendFailed(_))
    }
}

/// Result of delivering one payload to a shard.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The receiving shard.
    pub shard: ShardId,
    /// Number of samples in the payload.
    pub samples: usize,
    /// Number of requests sent for this payload.
    pub attempts: u32,
    /// Set if the payload was dropped.
    pub error: Option<DispatchError>,
}

impl DispatchOutcome {
    /// Returns `true` if the shard accepted the payload.
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one flush.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Outcome of every payload, grouped by shard in ascending order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Number of samples dropped per blocklisted shard.
    pub blocked: BTreeMap<ShardId, usize>,
    /// Number of samples routed with a defaulted series key.
    pub defaulted: usize,
}

impl DispatchReport {
    /// Returns the number of samples accepted by shards.
    pub fn delivered_samples(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.is_delivered())
            .map(|o| o.samples)
            .sum()
    }

    /// Returns the number of samples in payloads that were dropped.
    pub fn dropped_samples(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.is_delivered())
            .map(|o| o.samples)
            .sum()
    }

    /// Returns the number of samples dropped because their shard is blocklisted.
    pub fn blocked_samples(&self) -> usize {
        self.blocked.values().sum()
    }
}

/// Partitions samples by shard and delivers them.
#[derive(Debug)]
pub struct Dispatcher {
    client: reqwest::Client,
    router: ShardRouter,
    config: DispatchConfig,
    counter: SentCounter,
    last_flush: Option<Instant>,
}

impl Dispatcher {
    pub fn new(
        client: reqwest::Client,
        router: ShardRouter,
        config: DispatchConfig,
        counter: SentCounter,
    ) -> Self {
        Self {
            client,
            router,
            config,
            counter,
            last_flush: None,
        }
    }

    /// Returns the router that assigns samples to shards.
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Returns the URL of a shard's ingest endpoint.
    pub fn ingest_url(&self, shard: ShardId) -> String {
        format!("http://{}:{}/ingest", self.config.host, shard.port())
    }

    /// Routes and delivers all samples of a cycle.
    ///
    /// Waits for the batch interval to pass since the previous flush, then delivers to all shards
    /// concurrently and returns once every payload was either accepted or dropped.
    pub async fn dispatch(
        &mut self,
        samples: Vec<Sample>,
        timestamp: UnixTimestamp,
    ) -> DispatchReport {
        let partition = self.router.partition(samples);

        for (shard, count) in &partition.blocked {
            sketchrelay_log::info!(
                shard = shard.port(),
                samples = count,
                "dropping samples for blocklisted shard"
            );
        }
        metric!(counter(SketchCounters::SamplesBlocked) += partition.blocked_samples() as i64);

        if partition.defaulted > 0 {
            sketchrelay_log::warn!(
                samples = partition.defaulted,
                label = %self.router.config().series_label,
                "series keys without a valid index were routed with index 0"
            );
        }
        metric!(counter(SketchCounters::DefaultedKeys) += partition.defaulted as i64);

        let blocked = partition.blocked.clone();
        let defaulted = partition.defaulted;
        let batches = partition.into_batches(timestamp);

        if batches.is_empty() {
            return DispatchReport {
                outcomes: Vec::new(),
                blocked,
                defaulted,
            };
        }

        self.wait_for_interval().await;

        let this = &*self;
        let max_size = this.config.batch_max_size;
        let deliveries = batches.into_iter().map(|batch| async move {
            let mut outcomes = Vec::new();
            for chunk in batch.split(max_size) {
                outcomes.push(this.deliver(chunk).await);
            }
            outcomes
        });

        let outcomes = join_all(deliveries).await.into_iter().flatten().collect();

        DispatchReport {
            outcomes,
            blocked,
            defaulted,
        }
    }

    async fn wait_for_interval(&mut self) {
        let deadline = self
            .last_flush
            .and_then(|last_flush| last_flush.checked_add(self.config.batch_interval));

        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await;
        } else if self.last_flush.is_some() {
            sketchrelay_log::debug!(
                "batch interval {:?} exceeds the clock range, flushing now",
                self.config.batch_interval
            );
        }

        self.last_flush = Some(Instant::now());
    }

    /// Delivers one payload with bounded retries.
    async fn deliver(&self, batch: ShardBatch) -> DispatchOutcome {
        let shard = batch.shard;
        let samples = batch.len();
        let url = self.ingest_url(shard);

        metric!(
            histogram(SketchHistograms::BatchSize) = samples as u64,
            shard = &shard.to_string()
        );

        let body = match serde_json::to_vec(&batch.payload()) {
            Ok(body) => body,
            Err(error) => {
                let error = DispatchError::Serialize(error.into());
                sketchrelay_log::error!(
                    error = &error as &dyn Error,
                    shard = shard.port(),
                    "dropping batch"
                );
                return DispatchOutcome {
                    shard,
                    samples,
                    attempts: 0,
                    error: Some(error),
                };
            }
        };

        let max_attempts = self.config.retries.saturating_add(1);
        let mut backoff = RetryBackoff::new(self.config.backoff);
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            metric!(counter(SketchCounters::DispatchAttempts) += 1);

            match self.send(&url, body.clone()).await {
                Ok(()) => break Ok(()),
                Err(error) if error.is_retryable() && attempts < max_attempts => {
                    let delay = backoff.next_backoff();
                    sketchrelay_log::debug!(
                        error = &error as &dyn Error,
                        shard = shard.port(),
                        attempt = attempts,
                        "failed to send batch, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => break Err(error),
            }
        };

        match result {
            Ok(()) => {
                let total = self.counter.add(samples as u64);
                sketchrelay_log::trace!(shard = shard.port(), samples, total, "delivered batch");
                metric!(counter(SketchCounters::BatchesSent) += 1);
                metric!(counter(SketchCounters::SamplesSent) += samples as i64);

                DispatchOutcome {
                    shard,
                    samples,
                    attempts,
                    error: None,
                }
            }
            Err(error) => {
                let reason = match &error {
                    DispatchError::Rejected { .. } => {
                        sketchrelay_log::warn!(
                            error = &error as &dyn Error,
                            shard = shard.port(),
                            samples,
                            "shard rejected batch"
                        );
                        "rejected"
                    }
                    _ => {
                        sketchrelay_log::error!(
                            error = &error as &dyn Error,
                            shard = shard.port(),
                            samples,
                            attempts,
                            "dropping batch after {attempts} attempts"
                        );
                        "exhausted"
                    }
                };
                metric!(counter(SketchCounters::BatchesDropped) += 1, reason = reason);

                DispatchOutcome {
                    shard,
                    samples,
                    attempts,
                    error: Some(error),
                }
            }
        }
    }

    async fn send(&self, url: &str, body: Vec<u8>) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(url)
            .timeout(self.config.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(DispatchError::SendFailed)?;

        let response = Response(response);
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(DispatchError::Rejected {
            status,
            body: response.preview().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use sketchrelay_metrics::RouterConfig;

    use super::*;

    fn dispatcher(config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            reqwest::Client::new(),
            ShardRouter::new(RouterConfig::default()).unwrap(),
            config,
            SentCounter::new(),
        )
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            host: "127.0.0.1".to_owned(),
            timeout: Duration::from_millis(100),
            retries: 2,
            backoff: Duration::from_millis(10),
            batch_interval: Duration::from_millis(500),
            batch_max_size: 0,
        }
    }

    #[test]
    fn test_ingest_url() {
        let dispatcher = dispatcher(config());
        assert_eq!(
            dispatcher.ingest_url(ShardId::new(7101)),
            "http://127.0.0.1:7101/ingest"
        );
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        let rejected = DispatchError::Rejected {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(!rejected.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_are_spaced_by_interval() {
        let mut dispatcher = dispatcher(config());

        let start = Instant::now();
        dispatcher.wait_for_interval().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(200)).await;
        dispatcher.wait_for_interval().await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));

        tokio::time::advance(Duration::from_secs(2)).await;
        let before = Instant::now();
        dispatcher.wait_for_interval().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_interval_does_not_block() {
        let mut dispatcher = dispatcher(DispatchConfig {
            batch_interval: Duration::MAX,
            ..config()
        });

        let start = Instant::now();
        dispatcher.wait_for_interval().await;
        dispatcher.wait_for_interval().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(dispatcher.last_flush.is_some());
    }

    #[test]
    fn test_blocked_samples_are_recorded() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let mut routing = RouterConfig::default();
        routing.port_blocklist.insert(7101);
        let mut dispatcher = Dispatcher::new(
            reqwest::Client::new(),
            ShardRouter::new(routing).unwrap(),
            config(),
            SentCounter::new(),
        );

        let samples = (200..202)
            .map(|i| Sample::new("up", 1.0).with_label("machineid", format!("machine_{i}")))
            .collect();

        let captures = sketchrelay_statsd::with_capturing_test_client(|| {
            let report =
                runtime.block_on(dispatcher.dispatch(samples, UnixTimestamp::from_millis(1)));
            assert_eq!(report.blocked_samples(), 2);
        });

        insta::assert_debug_snapshot!(captures, @r###"
        [
            "route.blocked_samples:2|c",
            "route.defaulted_keys:0|c",
        ]
        "###);
    }

    #[tokio::test]
    async fn test_blocklisted_samples_are_not_sent() {
        let mut dispatcher = dispatcher(config());

        let samples = (0..3)
            .map(|_| Sample::new("up", 1.0).with_label("machineid", "machine_1"))
            .collect();

        let mut blocking = dispatcher.router.config().clone();
        blocking.port_blocklist.insert(7100);
        dispatcher.router = ShardRouter::new(blocking).unwrap();

        let report = dispatcher
            .dispatch(samples, UnixTimestamp::from_millis(1))
            .await;

        assert!(report.outcomes.is_empty());
        assert_eq!(report.blocked, BTreeMap::from([(ShardId::new(7100), 3)]));
        assert_eq!(report.blocked_samples(), 3);
        assert!(dispatcher.last_flush.is_none());
    }
}
