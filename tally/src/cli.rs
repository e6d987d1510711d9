use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use tally_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;
use crate::supervisor::{ProcessSpawner, Supervisor, TerminationSignals};

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or_else(|| PathBuf::from(".tally"), PathBuf::clone);

    let mut config = Config::from_path(&config_path)?;

    if let Some(matches) = matches.subcommand_matches("run") {
        config.apply_override(extract_config_args(matches))?;
    }

    tally_log::init(config.logging());

    match matches.subcommand() {
        Some(("config", matches)) => manage_config(&config, matches),
        Some(("run", matches)) => run(config, matches),
        _ => unreachable!(),
    }
}

/// Extracts configuration overrides from the arguments of `run`.
///
/// Environment variables are resolved by clap.
fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |id: &str| matches.get_one::<String>(id).cloned();

    OverridableConfig {
        udp_port: value("udp_port"),
        http_port: value("http_port"),
        api_key: value("api_key"),
        sink_host: value("sink_host"),
        sink_port: value("sink_port"),
        log_level: value("log_level"),
    }
}

fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            let yaml = config.to_yaml_string()?;
            #[allow(clippy::print_stdout)]
            {
                print!("{yaml}");
            }
            Ok(())
        }
        _ => unreachable!(),
    }
}

fn run(config: Config, matches: &ArgMatches) -> Result<()> {
    setup::check_config(&config)?;
    setup::init_metrics(&config)?;

    if matches.get_flag("worker") || matches.get_flag("master_only") {
        setup::dump_spawn_infos(&config);
        return tally_server::run(config);
    }

    tally_log::info!("starting supervisor");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create the runtime")?;

    runtime.block_on(async {
        let signals = TerminationSignals::new().context("failed to install signal handlers")?;
        let spawner = ProcessSpawner::from_env().context("failed to locate the executable")?;

        Supervisor::new(spawner)
            .run(signals.recv())
            .await
            .context("failed to start worker")?;

        tally_log::info!("supervisor stopped");
        Ok(())
    })
}
