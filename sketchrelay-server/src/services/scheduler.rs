//! The cycle loop driving scrape, route and dispatch.

use std::time::Duration;

use sketchrelay_common::UnixTimestamp;
use sketchrelay_config::{Config, TargetList};
use sketchrelay_metrics::ShardRouter;
use sketchrelay_statsd::metric;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ServerError;
use crate::http;
use crate::services::dispatch::{DispatchConfig, DispatchReport, Dispatcher};
use crate::services::registrar::{CapacityDescriptor, RegisterOutcome, Registrar};
use crate::services::reporter::{SentCounter, ThroughputReporter};
use crate::services::scrape::{ScrapeClient, ScrapeOutcome};
use crate::statsd::{SketchGauges, SketchHistograms, SketchTimers};

/// Lifecycle of a [`Pipeline`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineState {
    /// Capacity is not registered yet and no cycle has run.
    Bootstrapping,
    /// Registration is done and cycles are running.
    Cycling,
}

/// Everything that happened in one cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// The timestamp shared by all samples of the cycle.
    pub timestamp: UnixTimestamp,
    /// One outcome per target, in the order of the target list.
    pub scrapes: Vec<ScrapeOutcome>,
    /// Routing summary and delivery outcomes.
    pub dispatch: DispatchReport,
    /// Time spent on the whole cycle, excluding the sleep that follows it.
    pub duration: Duration,
    scrape_duration: Duration,
}

impl CycleReport {
    /// Returns the number of samples collected from all targets.
    pub fn scraped_samples(&self) -> usize {
        self.scrapes.iter().map(|s| s.samples).sum()
    }

    /// Returns the number of targets that contributed no samples because of an error.
    pub fn failed_targets(&self) -> usize {
        self.scrapes.iter().filter(|s| !s.is_success()).count()
    }

    /// Returns the number of unparsable lines across all scrape responses.
    pub fn invalid_lines(&self) -> usize {
        self.scrapes.iter().map(|s| s.invalid_lines).sum()
    }

    fn log(&self) {
        sketchrelay_log::info!(
            timestamp = self.timestamp.as_millis(),
            targets = self.scrapes.len(),
            failed_targets = self.failed_targets(),
            scraped = self.scraped_samples(),
            delivered = self.dispatch.delivered_samples(),
            dropped = self.dispatch.dropped_samples(),
            blocked = self.dispatch.blocked_samples(),
            "cycle finished in {:?}",
            self.duration
        );
    }

    fn emit_metrics(&self) {
        metric!(timer(SketchTimers::CycleDuration) = self.duration);
        metric!(timer(SketchTimers::ScrapeDuration) = self.scrape_duration);
        metric!(
            timer(SketchTimers::DispatchDuration) =
                self.duration.saturating_sub(self.scrape_duration)
        );
        metric!(histogram(SketchHistograms::SamplesPerCycle) = self.scraped_samples() as u64);
    }
}

/// The metrics pipeline: registers capacity once, then scrapes, routes and dispatches in cycles.
///
/// The sleep between cycles is not compensated for the time spent in a cycle. Dropping the
/// pipeline stops the throughput reporter.
#[derive(Debug)]
pub struct Pipeline {
    state: PipelineState,
    targets: TargetList,
    series_per_target_hint: u64,
    report_interval: Duration,
    scraper: ScrapeClient,
    registrar: Registrar,
    dispatcher: Dispatcher,
    counter: SentCounter,
    reporter: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Creates a pipeline for the given targets.
    pub fn new(config: &Config, targets: TargetList) -> Result<Self, ServerError> {
        let client = http::client()?;
        let router = ShardRouter::new(config.router_config().clone())?;
        let counter = SentCounter::new();

        Ok(Self {
            state: PipelineState::Bootstrapping,
            targets,
            series_per_target_hint: config.series_per_target_hint(),
            report_interval: config.report_interval(),
            scraper: ScrapeClient::new(client.clone(), config.scrape_timeout()),
            registrar: Registrar::new(client.clone(), config),
            dispatcher: Dispatcher::new(
                client,
                router,
                DispatchConfig::from_config(config),
                counter.clone(),
            ),
            counter,
            reporter: None,
        })
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Returns a handle to the count of delivered samples.
    pub fn sent_counter(&self) -> SentCounter {
        self.counter.clone()
    }

    /// Registers capacity, waits for shards to start and starts the throughput reporter.
    ///
    /// Must be called within a tokio runtime.
    pub async fn bootstrap(&mut self) -> RegisterOutcome {
        let descriptor = CapacityDescriptor::new(
            self.targets.len(),
            self.series_per_target_hint,
            self.dispatcher.router().config(),
        );
        metric!(gauge(SketchGauges::Targets) = self.targets.len() as u64);

        let outcome = self.registrar.register_and_wait(&descriptor).await;

        let reporter = ThroughputReporter::new(self.counter.clone(), self.report_interval);
        self.reporter = Some(reporter.start());
        self.state = PipelineState::Cycling;

        outcome
    }

    /// Runs a single cycle: scrape all targets, then route and deliver the samples.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        let timestamp = UnixTimestamp::now();

        let (samples, scrapes) = self.scraper.scrape_all(&self.targets.targets).await;
        let scrape_duration = start.elapsed();

        let dispatch = self.dispatcher.dispatch(samples, timestamp).await;

        let report = CycleReport {
            timestamp,
            scrapes,
            dispatch,
            duration: start.elapsed(),
            scrape_duration,
        };

        report.log();
        report.emit_metrics();

        report
    }

    /// Bootstraps if needed and runs `count` cycles with the scrape interval between them.
    ///
    /// There is no sleep after the last cycle.
    pub async fn run_cycles(&mut self, count: usize) -> Vec<CycleReport> {
        if self.state == PipelineState::Bootstrapping {
            self.bootstrap().await;
        }

        let mut reports = Vec::with_capacity(count);
        for index in 0..count {
            if index > 0 {
                tokio::time::sleep(self.targets.scrape_interval).await;
            }
            reports.push(self.run_cycle().await);
        }

        reports
    }

    /// Bootstraps if needed and runs cycles until the process exits.
    pub async fn run(&mut self) {
        if self.state == PipelineState::Bootstrapping {
            self.bootstrap().await;
        }

        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.targets.scrape_interval).await;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
    }
}
