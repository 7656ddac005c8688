//! The sketchrelay metrics pipeline.
//!
//! This crate contains the [`run`] function which drives the pipeline. Every cycle, it scrapes all
//! targets concurrently, assigns every sample to a shard by its series key and posts one payload
//! per shard to the shard's ingest endpoint.
//!
//! See the [`Config`] documentation for more information on configuration options.
//!
//! # Lifecycle
//!
//! ```text
//! Bootstrapping: register capacity -> grace delay -> start throughput reporter
//! Cycling:       scrape all targets -> route -> dispatch -> sleep scrape interval -> ...
//! ```
//!
//! The pipeline runs until the process receives an interrupt. In-flight batches are not drained on
//! shutdown, delivery is best-effort.

use std::io;

use sketchrelay_config::{Config, TargetList};
use sketchrelay_metrics::InvalidRouterConfig;

mod constants;
mod http;
mod statsd;

pub mod services;

pub use crate::http::HttpError;
pub use crate::services::scheduler::{CycleReport, Pipeline, PipelineState};

/// Indicates the type of failure of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The tokio runtime could not be created.
    #[error("could not start the runtime")]
    RuntimeFailed(#[source] io::Error),

    /// The HTTP client could not be created.
    #[error("could not create the http client")]
    HttpClient(#[from] HttpError),

    /// The shard layout cannot be used for routing.
    #[error("invalid routing configuration")]
    InvalidRouting(#[from] InvalidRouterConfig),

    /// Waiting for the shutdown signal failed.
    #[error("could not listen for shutdown signal")]
    SignalFailed(#[source] io::Error),
}

/// Runs the pipeline on a new multi-threaded runtime.
///
/// With `once`, the pipeline bootstraps, runs a single cycle and returns. Otherwise it runs cycles
/// until an interrupt is received. This blocks the current thread.
pub fn run(config: Config, targets: TargetList, once: bool) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sketchrelay")
        .enable_all()
        .build()
        .map_err(ServerError::RuntimeFailed)?;

    runtime.block_on(async move {
        let mut pipeline = Pipeline::new(&config, targets)?;

        if once {
            pipeline.run_cycles(1).await;
            return Ok(());
        }

        tokio::select! {
            _ = pipeline.run() => Ok(()),
            result = tokio::signal::ctrl_c() => {
                result.map_err(ServerError::SignalFailed)?;
                sketchrelay_log::info!("received interrupt, shutting down");
                Ok(())
            }
        }
    })
}
