//! Pulling samples from scrape targets.

use std::error::Error;
use std::time::Duration;

use futures::future::join_all;
use sketchrelay_config::ScrapeTarget;
use sketchrelay_metrics::Sample;
use sketchrelay_statsd::metric;
use tokio::time::Instant;

use crate::constants::MAX_SCRAPE_SIZE;
use crate::http::{HttpError, Response, StatusCode};
use crate::statsd::SketchCounters;

/// The reason a target contributed no samples to a cycle.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("could not send scrape request")]
    SendFailed(#[source] reqwest::Error),
    #[error("scrape timed out")]
    Timeout,
    #[error("target responded with status {0}")]
    BadStatus(StatusCode),
    #[error("could not read scrape response")]
    BodyFailed(#[source] HttpError),
}

impl ScrapeError {
    fn reason(&self) -> &'static str {
        match self {
            ScrapeError::SendFailed(_) => "send_failed",
            ScrapeError::Timeout => "timeout",
            ScrapeError::BadStatus(_) => "status",
            ScrapeError::BodyFailed(_) => "body",
        }
    }
}

/// Result of scraping a single target.
#[derive(Debug)]
pub struct ScrapeOutcome {
    /// The target as it is listed.
    pub target: String,
    /// Number of samples parsed from the response.
    pub samples: usize,
    /// Number of lines that could not be parsed.
    pub invalid_lines: usize,
    /// Time from sending the request until the body was parsed or the scrape failed.
    pub duration: Duration,
    /// Set if the target contributed no samples because of an error.
    pub error: Option<ScrapeError>,
}

impl ScrapeOutcome {
    /// Returns `true` if the target responded with a readable body.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Pulls exposition text from targets and parses it into samples.
#[derive(Clone, Debug)]
pub struct ScrapeClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ScrapeClient {
    /// Creates a client that gives up on a target after `timeout`.
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Scrapes a single target.
    ///
    /// Never fails: errors are logged and reported in the outcome along with an empty sample set.
    pub async fn scrape(&self, target: &ScrapeTarget) -> (Vec<Sample>, ScrapeOutcome) {
        let start = Instant::now();
        let result = self.fetch(target).await;

        let mut outcome = ScrapeOutcome {
            target: target.name().to_owned(),
            samples: 0,
            invalid_lines: 0,
            duration: Duration::ZERO,
            error: None,
        };

        let body = match result {
            Ok(body) => body,
            Err(error) => {
                sketchrelay_log::warn!(
                    error = &error as &dyn Error,
                    scrape_target = %target,
                    "failed to scrape target"
                );
                metric!(
                    counter(SketchCounters::ScrapeFailed) += 1,
                    reason = error.reason()
                );

                outcome.duration = start.elapsed();
                outcome.error = Some(error);
                return (Vec::new(), outcome);
            }
        };

        let mut samples = Vec::new();
        for result in Sample::parse_all(&body) {
            match result {
                Ok(sample) => samples.push(sample),
                Err(_) => outcome.invalid_lines += 1,
            }
        }

        if outcome.invalid_lines > 0 {
            sketchrelay_log::debug!(
                scrape_target = %target,
                invalid_lines = outcome.invalid_lines,
                "skipped invalid lines in scrape response"
            );
        }

        outcome.samples = samples.len();
        outcome.duration = start.elapsed();
        (samples, outcome)
    }

    /// Scrapes all targets concurrently and waits for every scrape to finish.
    ///
    /// Samples are returned in the order of the targets.
    pub async fn scrape_all(
        &self,
        targets: &[ScrapeTarget],
    ) -> (Vec<Sample>, Vec<ScrapeOutcome>) {
        let results = join_all(targets.iter().map(|target| self.scrape(target))).await;

        let mut samples = Vec::new();
        let mut outcomes = Vec::with_capacity(results.len());
        for (target_samples, outcome) in results {
            samples.extend(target_samples);
            outcomes.push(outcome);
        }

        let invalid_lines: usize = outcomes.iter().map(|o| o.invalid_lines).sum();
        metric!(counter(SketchCounters::SamplesScraped) += samples.len() as i64);
        metric!(counter(SketchCounters::InvalidLines) += invalid_lines as i64);

        (samples, outcomes)
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<u8>, ScrapeError> {
        let response = self
            .client
            .get(target.url().clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| match error.is_timeout() {
                true => ScrapeError::Timeout,
                false => ScrapeError::SendFailed(error),
            })?;

        let response = Response(response);
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::BadStatus(status));
        }

        response
            .bytes(MAX_SCRAPE_SIZE)
            .await
            .map_err(|error| match error.is_timeout() {
                true => ScrapeError::Timeout,
                false => ScrapeError::BodyFailed(error),
            })
    }
}
