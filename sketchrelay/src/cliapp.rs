//! This module implements the definition of the command line app.

use clap::{Arg, ArgAction, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Scrapes metrics targets and routes the samples to sketch shards.";

/// Arguments that override a config value, with the environment variable backing them.
///
/// Arguments win over environment variables, which win over the config file.
const OVERRIDES: &[(&str, &str, &str, &str)] = &[
    (
        "control_url",
        "control-url",
        "PROMSKETCH_CONTROL_URL",
        "Base URL of the control plane that receives the capacity registration.",
    ),
    (
        "base_port",
        "base-port",
        "PROMSKETCH_BASE_PORT",
        "Ingest port of the first shard.",
    ),
    (
        "machines_per_port",
        "machines-per-port",
        "PROMSKETCH_MACHINES_PER_PORT",
        "Number of consecutive series indexes handled by each shard.",
    ),
    (
        "series_per_target",
        "metrics-per-target",
        "PROMSKETCH_METRICS_PER_TARGET",
        "Expected number of series per target, announced at registration.",
    ),
    (
        "port_blocklist",
        "port-blocklist",
        "PROMSKETCH_PORT_BLOCKLIST",
        "Comma-separated shard ports that never receive data.",
    ),
    (
        "batch_interval",
        "batch-interval",
        "PROMSKETCH_BATCH_INTERVAL_SECONDS",
        "Minimum number of seconds between two flushes.",
    ),
    (
        "batch_max_size",
        "batch-max-size",
        "PROMSKETCH_BATCH_MAX_SIZE",
        "Maximum number of samples per ingest request, 0 for no limit.",
    ),
    (
        "post_timeout",
        "post-timeout",
        "PROMSKETCH_POST_TIMEOUT_SECONDS",
        "Timeout of ingest requests in seconds.",
    ),
    (
        "scrape_timeout",
        "scrape-timeout",
        "PROMSKETCH_SCRAPE_TIMEOUT_SECONDS",
        "Timeout of scrape requests in seconds.",
    ),
    (
        "register_grace",
        "register-sleep",
        "PROMSKETCH_REGISTER_SLEEP_SECONDS",
        "Seconds to wait after the capacity registration before the first cycle.",
    ),
    (
        "log_level",
        "log-level",
        "SKETCHRELAY_LOG_LEVEL",
        "The log level for sketchrelay.",
    ),
    (
        "statsd",
        "statsd",
        "SKETCHRELAY_STATSD",
        "Host and port of the statsd server to report internal metrics to.",
    ),
];

fn override_args() -> impl Iterator<Item = Arg> {
    OVERRIDES.iter().map(|&(id, long, env, help)| {
        Arg::new(id)
            .long(long)
            .value_name(env.trim_start_matches("PROMSKETCH_"))
            .env(env)
            .global(true)
            .help(help)
    })
}

pub fn make_app() -> Command {
    Command::new("sketchrelay")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .help("The path to the YAML config file."),
        )
        .arg(
            Arg::new("targets")
                .value_name("TARGETS")
                .long("targets")
                .short('t')
                .global(true)
                .help("The path to the Prometheus-style target list."),
        )
        .args(override_args())
        .subcommand(
            Command::new("run")
                .about("Run the pipeline")
                .after_help(
                    "This registers the expected capacity with the control plane and then \
                     scrapes all targets in cycles, routing every sample to its shard. It \
                     runs in the foreground until it is interrupted.",
                )
                .arg(
                    Arg::new("once")
                        .long("once")
                        .action(ArgAction::SetTrue)
                        .help("Run a single cycle and exit."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the configuration")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .after_help(
                    "This command provides basic config management. It can be used to \
                     inspect the configuration after all overrides were applied.",
                )
                .subcommand(
                    Command::new("show")
                        .about("Show the effective configuration")
                        .after_help("This dumps the configuration as YAML."),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_is_valid() {
        make_app().debug_assert();
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let matches = make_app()
            .try_get_matches_from([
                "sketchrelay",
                "run",
                "--targets",
                "targets.yml",
                "--base-port",
                "8100",
                "--once",
            ])
            .unwrap();

        assert_eq!(
            matches.get_one::<String>("targets").map(String::as_str),
            Some("targets.yml")
        );

        let run = matches.subcommand_matches("run").unwrap();
        assert!(run.get_flag("once"));
        assert_eq!(
            run.get_one::<String>("base_port").map(String::as_str),
            Some("8100")
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(make_app().try_get_matches_from(["sketchrelay"]).is_err());
    }
}
