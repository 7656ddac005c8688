use std::io::{self, Write};

use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use sketchrelay_config::{Config, OverridableConfig, TargetList};

use crate::cliapp::make_app;
use crate::setup;

/// Extracts config overrides from the command line and the environment.
///
/// Clap resolves the environment variables, so a flag always wins over its variable.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |id: &str| matches.get_one::<String>(id).cloned();

    OverridableConfig {
        control_url: value("control_url"),
        base_port: value("base_port"),
        machines_per_port: value("machines_per_port"),
        series_per_target: value("series_per_target"),
        port_blocklist: value("port_blocklist"),
        batch_interval: value("batch_interval"),
        batch_max_size: value("batch_max_size"),
        post_timeout: value("post_timeout"),
        scrape_timeout: value("scrape_timeout"),
        register_grace: value("register_grace"),
        targets: value("targets"),
        log_level: value("log_level"),
        statsd: value("statsd"),
    }
}

/// Loads the config file and applies overrides from the command line.
fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    config.apply_override(extract_config_args(matches))?;
    Ok(config)
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let (name, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("no subcommand given"))?;

    let config = load_config(sub_matches)?;
    sketchrelay_log::init(config.logging());

    match name {
        "run" => run(config, sub_matches),
        "config" => manage_config(&config, sub_matches),
        _ => unreachable!(),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            let yaml = config.to_yaml_string()?;
            io::stdout().write_all(yaml.as_bytes())?;
            Ok(())
        }
        _ => unreachable!(),
    }
}

pub fn run(config: Config, matches: &ArgMatches) -> Result<()> {
    setup::check_config(&config)?;
    setup::init_metrics(&config)?;

    let path = config
        .targets_path()
        .context("no target list configured, pass one with --targets")?;
    let targets = TargetList::from_path(path)
        .with_context(|| format!("could not load target list from {}", path.display()))?;

    setup::dump_spawn_infos(&config, &targets);

    let once = matches.get_flag("once");
    sketchrelay_server::run(config, targets, once)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_extract_config_args() {
        let matches = make_app()
            .try_get_matches_from([
                "sketchrelay",
                "config",
                "show",
                "--machines-per-port",
                "50",
                "--port-blocklist",
                "7001, 7003",
                "--targets",
                "targets.yml",
            ])
            .unwrap();

        let (_, config_matches) = matches.subcommand().unwrap();
        let (_, show_matches) = config_matches.subcommand().unwrap();
        let overrides = extract_config_args(show_matches);

        assert_eq!(overrides.machines_per_port.as_deref(), Some("50"));
        assert_eq!(overrides.port_blocklist.as_deref(), Some("7001, 7003"));
        assert_eq!(overrides.targets.as_deref(), Some("targets.yml"));
        assert_eq!(overrides.control_url, None);
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let matches = make_app()
            .try_get_matches_from(["sketchrelay", "run", "--base-port", "9100"])
            .unwrap();

        let (_, run_matches) = matches.subcommand().unwrap();
        let config = load_config(run_matches).unwrap();

        assert_eq!(config.router_config().base_port, 9100);
    }

    #[test]
    fn test_load_config_rejects_zero_machines_per_port() {
        let matches = make_app()
            .try_get_matches_from(["sketchrelay", "run", "--machines-per-port", "0"])
            .unwrap();

        let (_, run_matches) = matches.subcommand().unwrap();
        let error = load_config(run_matches).unwrap_err();

        assert_eq!(
            error.to_string(),
            "invalid config value (field machines_per_port)"
        );
    }
}
