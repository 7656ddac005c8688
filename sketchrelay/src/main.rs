//! Sketchrelay scrapes a fixed set of Prometheus-style targets and forwards every sample to the
//! sketch shard that owns its series.
//!
//! On startup, it announces the expected number of targets and series to the control plane. Then
//! it runs in cycles: all targets are scraped concurrently, the samples are partitioned by the
//! numeric index in their series label and each shard receives one JSON batch on its ingest port.
//!
//! # Usage
//!
//! ```text
//! sketchrelay run --targets targets.yml --control-url http://control:7000
//! sketchrelay config show --config sketchrelay.yml
//! ```
//!
//! Every routing and dispatch option can also be set through a `PROMSKETCH_*` environment
//! variable, see `sketchrelay --help`.
//!
//! # Workspace Crates
//!
//!  - `sketchrelay`: Main entry point and command line interface.
//!  - [`sketchrelay-common`]: Timestamps, durations and retry backoff.
//!  - [`sketchrelay-config`]: Static configuration and the target list.
//!  - [`sketchrelay-log`]: Error reporting and logging.
//!  - [`sketchrelay-metrics`]: Sample protocol, shard routing and batching.
//!  - [`sketchrelay-server`]: Scrape, registration and dispatch services.
//!  - [`sketchrelay-statsd`]: StatsD client for internal measurements.
//!  - [`sketchrelay-test`]: Mock upstreams for integration tests.
//!
//! [`sketchrelay-common`]: ../sketchrelay_common/index.html
//! [`sketchrelay-config`]: ../sketchrelay_config/index.html
//! [`sketchrelay-log`]: ../sketchrelay_log/index.html
//! [`sketchrelay-metrics`]: ../sketchrelay_metrics/index.html
//! [`sketchrelay-server`]: ../sketchrelay_server/index.html
//! [`sketchrelay-statsd`]: ../sketchrelay_statsd/index.html
//! [`sketchrelay-test`]: ../sketchrelay_test/index.html

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            sketchrelay_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
