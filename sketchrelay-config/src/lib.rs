//! Configuration for the sketchrelay CLI and pipeline.
//!
//! The configuration is loaded from a YAML file and can be overridden with environment variables
//! and command line arguments through [`OverridableConfig`]. Scrape targets are loaded separately
//! from a Prometheus-style target list, see [`TargetList`].

#![warn(missing_docs)]

mod config;
mod targets;

pub use crate::config::*;
pub use crate::targets::*;
