use sketchrelay_statsd::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Gauge metrics used by sketchrelay.
pub enum SketchGauges {
    /// Samples delivered per second since the pipeline started.
    ///
    /// Set by the throughput reporter on every report.
    Throughput,
    /// Number of scrape targets of the pipeline.
    Targets,
}

impl GaugeMetric for SketchGauges {
    fn name(&self) -> &'static str {
        match self {
            SketchGauges::Throughput => "pipeline.throughput",
            SketchGauges::Targets => "pipeline.targets",
        }
    }
}

/// Counter metrics used by sketchrelay.
pub enum SketchCounters {
    /// Number of samples parsed from scrape responses.
    SamplesScraped,
    /// Number of lines in scrape responses that could not be parsed.
    InvalidLines,
    /// Number of scrapes that contributed no samples because of an error.
    ///
    /// This metric is tagged with:
    /// - `reason`: `send_failed`, `timeout`, `status` or `body`.
    ScrapeFailed,
    /// Number of samples dropped because their shard is blocklisted.
    SamplesBlocked,
    /// Number of samples whose series key was missing an index.
    DefaultedKeys,
    /// Number of ingest requests sent, including retries.
    DispatchAttempts,
    /// Number of batches accepted by a shard.
    BatchesSent,
    /// Number of samples accepted by a shard.
    SamplesSent,
    /// Number of batches that were not accepted by a shard.
    ///
    /// This metric is tagged with:
    /// - `reason`: `rejected` if the shard answered with an error status, `exhausted` if all
    ///   attempts failed to reach the shard.
    BatchesDropped,
    /// Number of capacity registrations.
    ///
    /// This metric is tagged with:
    /// - `success`: whether the control plane accepted the registration.
    Registrations,
}

impl CounterMetric for SketchCounters {
    fn name(&self) -> &'static str {
        match self {
            SketchCounters::SamplesScraped => "scrape.samples",
            SketchCounters::InvalidLines => "scrape.invalid_lines",
            SketchCounters::ScrapeFailed => "scrape.failed",
            SketchCounters::SamplesBlocked => "route.blocked_samples",
            SketchCounters::DefaultedKeys => "route.defaulted_keys",
            SketchCounters::DispatchAttempts => "dispatch.attempts",
            SketchCounters::BatchesSent => "dispatch.batches_sent",
            SketchCounters::SamplesSent => "dispatch.samples_sent",
            SketchCounters::BatchesDropped => "dispatch.batches_dropped",
            SketchCounters::Registrations => "registration.requests",
        }
    }
}

/// Timer metrics used by sketchrelay.
pub enum SketchTimers {
    /// Total duration of a cycle, from the first scrape to the last delivery.
    CycleDuration,
    /// Time until all scrapes of a cycle completed.
    ScrapeDuration,
    /// Time until all batches of a cycle were delivered or dropped.
    ///
    /// Includes the wait for the batch interval.
    DispatchDuration,
}

impl TimerMetric for SketchTimers {
    fn name(&self) -> &'static str {
        match self {
            SketchTimers::CycleDuration => "cycle.duration",
            SketchTimers::ScrapeDuration => "cycle.scrape_duration",
            SketchTimers::DispatchDuration => "cycle.dispatch_duration",
        }
    }
}

/// Histogram metrics used by sketchrelay.
pub enum SketchHistograms {
    /// Number of samples in a single ingest payload.
    ///
    /// This metric is tagged with:
    /// - `shard`: the port of the receiving shard.
    BatchSize,
    /// Number of samples collected in one cycle.
    SamplesPerCycle,
}

impl HistogramMetric for SketchHistograms {
    fn name(&self) -> &'static str {
        match self {
            SketchHistograms::BatchSize => "dispatch.batch_size",
            SketchHistograms::SamplesPerCycle => "cycle.samples",
        }
    }
}
