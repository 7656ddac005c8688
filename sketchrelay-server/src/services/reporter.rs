use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sketchrelay_statsd::metric;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::statsd::SketchGauges;

/// Number of samples delivered to shards since the pipeline started.
///
/// Clones share the same count. The dispatcher adds to it, the reporter only reads it.
#[derive(Clone, Debug, Default)]
pub struct SentCounter(Arc<AtomicU64>);

impl SentCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `samples` to the count and returns the new total.
    pub fn add(&self, samples: u64) -> u64 {
        self.0.fetch_add(samples, Ordering::Relaxed) + samples
    }

    /// Returns the current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Periodically logs the average delivery rate.
#[derive(Debug)]
pub struct ThroughputReporter {
    counter: SentCounter,
    interval: Duration,
}

impl ThroughputReporter {
    pub fn new(counter: SentCounter, interval: Duration) -> Self {
        Self { counter, interval }
    }

    /// Returns samples per second, or `None` if no time has elapsed.
    pub fn rate(sent: u64, elapsed: Duration) -> Option<f64> {
        let secs = elapsed.as_secs_f64();
        (secs > 0.0).then(|| sent as f64 / secs)
    }

    /// Spawns the reporter onto the current runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let started = Instant::now();
        let Some(first_tick) = started.checked_add(self.interval) else {
            sketchrelay_log::warn!(
                "report interval {:?} exceeds the clock range, throughput is not reported",
                self.interval
            );
            return;
        };

        let mut ticker = tokio::time::interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.report(started.elapsed());
        }
    }

    fn report(&self, elapsed: Duration) {
        let sent = self.counter.get();
        let Some(rate) = Self::rate(sent, elapsed) else {
            return;
        };

        sketchrelay_log::info!(sent, "throughput: {rate:.2} samples/s");
        metric!(gauge(SketchGauges::Throughput) = rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_shared() {
        let counter = SentCounter::new();
        let clone = counter.clone();
        assert_eq!(clone.add(5), 5);
        assert_eq!(counter.add(3), 8);
        assert_eq!(clone.get(), 8);
    }

    #[test]
    fn test_rate_guards_zero_elapsed() {
        assert_eq!(ThroughputReporter::rate(100, Duration::ZERO), None);
        assert_eq!(
            ThroughputReporter::rate(100, Duration::from_secs(4)),
            Some(25.0)
        );
    }

    #[test]
    fn test_report_emits_gauge() {
        let counter = SentCounter::new();
        counter.add(50);
        let reporter = ThroughputReporter::new(counter, Duration::from_secs(5));

        let captures = sketchrelay_statsd::with_capturing_test_client(|| {
            reporter.report(Duration::from_secs(10));
            reporter.report(Duration::ZERO);
        });
        assert_eq!(captures, ["pipeline.throughput:5|g"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_periodically() {
        let counter = SentCounter::new();
        let handle = ThroughputReporter::new(counter.clone(), Duration::from_secs(5)).start();

        counter.add(10);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!handle.is_finished());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_interval_stops_quietly() {
        let handle = ThroughputReporter::new(SentCounter::new(), Duration::MAX).start();

        // Completes instead of panicking.
        handle.await.unwrap();
    }
}
