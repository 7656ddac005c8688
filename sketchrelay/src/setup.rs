use anyhow::Result;
use sketchrelay_config::{Config, TargetList};
use sketchrelay_statsd::MetricsClientConfig;

pub fn check_config(config: &Config) -> Result<()> {
    let scheme = config.control_url().scheme();
    if scheme != "http" && scheme != "https" {
        anyhow::bail!("control url must use http or https, got \"{scheme}\"");
    }

    if config.router_config().base_port == 0 {
        anyhow::bail!("base port must not be 0");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config, targets: &TargetList) {
    if config.path().as_os_str().is_empty() {
        sketchrelay_log::info!("launching sketchrelay without config file");
    } else {
        sketchrelay_log::info!(
            "launching sketchrelay from config file {}",
            config.path().display()
        );
    }

    let routing = config.router_config();
    sketchrelay_log::info!("  control url: {}", config.control_url());
    sketchrelay_log::info!("  base port: {}", routing.base_port);
    sketchrelay_log::info!("  machines per port: {}", routing.machines_per_port);
    if routing.port_blocklist.is_empty() {
        sketchrelay_log::info!("  port blocklist: -");
    } else {
        sketchrelay_log::info!("  port blocklist: {:?}", routing.port_blocklist);
    }
    sketchrelay_log::info!("  targets: {}", targets.len());
    sketchrelay_log::info!("  scrape interval: {:?}", targets.scrape_interval);
    sketchrelay_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    sketchrelay_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags,
        sample_rate: f64::from(config.metrics_sample_rate()).into(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_check_config_rejects_scheme() {
        let config = Config::from_json_value(json!({
            "relay": {"control_url": "ftp://control.example/"}
        }))
        .unwrap();

        let error = check_config(&config).unwrap_err();
        assert_eq!(
            error.to_string(),
            "control url must use http or https, got \"ftp\""
        );
    }

    #[test]
    fn test_check_config_defaults() {
        assert!(check_config(&Config::default()).is_ok());
    }
}
