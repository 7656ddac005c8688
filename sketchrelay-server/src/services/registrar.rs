//! One-time capacity announcement to the control plane.

use std::error::Error;
use std::time::Duration;

use serde::Serialize;
use sketchrelay_config::Config;
use sketchrelay_metrics::RouterConfig;
use sketchrelay_statsd::metric;

use crate::http::{Response, StatusCode};
use crate::statsd::SketchCounters;

/// The expected load of the pipeline, sent to the control plane before the first cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapacityDescriptor {
    /// Number of scrape targets.
    pub num_targets: usize,
    /// Expected number of series across all targets.
    pub estimated_timeseries: u64,
    /// Number of series indexes per shard.
    pub machines_per_port: u32,
    /// Port of the first shard.
    pub start_port: u16,
}

impl CapacityDescriptor {
    /// Estimates the capacity from the number of targets and the per-target series hint.
    pub fn new(num_targets: usize, series_per_target_hint: u64, routing: &RouterConfig) -> Self {
        Self {
            num_targets,
            estimated_timeseries: (num_targets as u64).saturating_mul(series_per_target_hint),
            machines_per_port: routing.machines_per_port,
            start_port: routing.base_port,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("could not send registration")]
    SendFailed(#[source] reqwest::Error),
    #[error("registration timed out")]
    Timeout,
    #[error("control plane rejected registration with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Result of the capacity registration.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// The control plane accepted the descriptor.
    Registered,
    /// The registration failed. The pipeline proceeds unregistered.
    Failed(RegisterError),
}

impl RegisterOutcome {
    /// Returns `true` if the control plane accepted the descriptor.
    pub fn is_registered(&self) -> bool {
        matches!(self, RegisterOutcome::Registered)
    }
}

/// Announces capacity to the control plane and waits for shards to come up.
#[derive(Clone, Debug)]
pub struct Registrar {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    grace: Duration,
}

impl Registrar {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            url: config.registration_url(),
            timeout: config.registration_timeout(),
            grace: config.register_grace(),
        }
    }

    /// Posts the descriptor to the control plane.
    ///
    /// Failures are logged as warnings and never abort the pipeline.
    pub async fn register(&self, descriptor: &CapacityDescriptor) -> RegisterOutcome {
        let outcome = match self.send(descriptor).await {
            Ok(()) => {
                sketchrelay_log::info!(
                    num_targets = descriptor.num_targets,
                    estimated_timeseries = descriptor.estimated_timeseries,
                    "registered capacity with control plane"
                );
                RegisterOutcome::Registered
            }
            Err(error) => {
                sketchrelay_log::warn!(
                    error = &error as &dyn Error,
                    url = %self.url,
                    "failed to register capacity, continuing unregistered"
                );
                RegisterOutcome::Failed(error)
            }
        };

        metric!(
            counter(SketchCounters::Registrations) += 1,
            success = if outcome.is_registered() { "true" } else { "false" }
        );

        outcome
    }

    /// Registers and then sleeps for the configured grace period.
    ///
    /// The grace period applies regardless of the registration result.
    pub async fn register_and_wait(&self, descriptor: &CapacityDescriptor) -> RegisterOutcome {
        let outcome = self.register(descriptor).await;

        if !self.grace.is_zero() {
            sketchrelay_log::debug!("waiting {:?} for shards to start", self.grace);
            tokio::time::sleep(self.grace).await;
        }

        outcome
    }

    async fn send(&self, descriptor: &CapacityDescriptor) -> Result<(), RegisterError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(descriptor)
            .send()
            .await
            .map_err(|error| match error.is_timeout() {
                true => RegisterError::Timeout,
                false => RegisterError::SendFailed(error),
            })?;

        let response = Response(response);
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(RegisterError::Rejected {
            status,
            body: response.preview().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let descriptor = CapacityDescriptor::new(4, 1250, &RouterConfig::default());
        insta::assert_json_snapshot!(descriptor, @r###"
        {
          "num_targets": 4,
          "estimated_timeseries": 5000,
          "machines_per_port": 200,
          "start_port": 7100
        }
        "###);
    }

    #[test]
    fn test_descriptor_saturates() {
        let descriptor = CapacityDescriptor::new(2, u64::MAX, &RouterConfig::default());
        assert_eq!(descriptor.estimated_timeseries, u64::MAX);
    }
}
