use anyhow::Result;
use tally_config::Config;
use tally_statsd::MetricsClientConfig;

/// Returns `true` if `value` is a valid percentage in `(0, 100]`.
fn is_percentage(value: f64) -> bool {
    value > 0.0 && value <= 100.0
}

/// Rejects configurations the worker cannot run with.
pub fn check_config(config: &Config) -> Result<()> {
    if config.api_key().is_none() {
        anyhow::bail!(
            "no api key configured. Set `http.api_key` in the config file or pass --api-key."
        );
    }

    let collector = config.collector();
    if collector.flush_interval == 0 {
        anyhow::bail!("`collector.flush_interval` must be greater than zero");
    }

    if let Some(pct) = collector
        .percent_threshold
        .iter()
        .find(|pct| !is_percentage(**pct))
    {
        anyhow::bail!("`collector.percent_threshold` contains {pct}, which is not in (0, 100]");
    }

    if collector.history_len == 0 {
        anyhow::bail!("`collector.history_len` must be greater than zero");
    }

    let key_flush = &collector.key_flush;
    if key_flush.interval().is_some() && !is_percentage(key_flush.percent) {
        anyhow::bail!(
            "`collector.key_flush.percent` is {}, which is not in (0, 100]",
            key_flush.percent
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally without config folder");
    } else {
        tally_log::info!(
            "launching tally from config folder {}",
            config.path().display()
        );
    }

    tally_log::info!("  udp listener: {}", config.udp_addr());
    tally_log::info!("  http listener: {}", config.http_addr());
    match config.sink_addr() {
        Some((host, port)) => tally_log::info!("  sink: {host}:{port}"),
        None => tally_log::info!("  sink: -"),
    }
    tally_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    tally_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags: config.metrics_default_tags().clone(),
    })?;

    Ok(())
}
