// This module implements the definition of the command line app.
//
// It must not have any other imports, so the app definition can be tested in isolation.
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Tally aggregates statsd metrics and forwards them to Graphite.";

pub fn make_app() -> Command {
    Command::new("tally")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("TALLY_CONFIG")
                .default_value(".tally")
                .value_parser(value_parser!(PathBuf))
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the daemon")
                .after_help(
                    "This starts a supervisor which keeps a single worker process alive. \
                     The worker binds to the UDP and HTTP ports configured in the config \
                     file.  If the worker crashes, it is replaced immediately.",
                )
                .arg(
                    Arg::new("master_only")
                        .long("master-only")
                        .short('d')
                        .action(ArgAction::SetTrue)
                        .help("Run the worker in the foreground without a supervisor."),
                )
                .arg(
                    Arg::new("worker")
                        .long("worker")
                        .action(ArgAction::SetTrue)
                        .hide(true)
                        .help("Run as a worker of a supervisor."),
                )
                .arg(
                    Arg::new("udp_port")
                        .value_name("PORT")
                        .long("udp-port")
                        .env("TALLY_UDP_PORT")
                        .help("The port to bind for statsd datagrams."),
                )
                .arg(
                    Arg::new("http_port")
                        .value_name("PORT")
                        .long("http-port")
                        .env("TALLY_HTTP_PORT")
                        .help("The port to bind for the HTTP query API."),
                )
                .arg(
                    Arg::new("api_key")
                        .value_name("KEY")
                        .long("api-key")
                        .env("TALLY_API_KEY")
                        .hide_env_values(true)
                        .help("The key required by the HTTP query API."),
                )
                .arg(
                    Arg::new("sink_host")
                        .value_name("HOST")
                        .long("sink-host")
                        .env("TALLY_SINK_HOST")
                        .help("The host of the downstream Graphite sink."),
                )
                .arg(
                    Arg::new("sink_port")
                        .value_name("PORT")
                        .long("sink-port")
                        .env("TALLY_SINK_PORT")
                        .help("The port of the downstream Graphite sink."),
                )
                .arg(
                    Arg::new("log_level")
                        .value_name("LEVEL")
                        .long("log-level")
                        .env("TALLY_LOG_LEVEL")
                        .help("The log level of Tally's own messages."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the configuration")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values \
                             which are not in the config file but filled in from \
                             defaults.",
                        ),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_definition() {
        make_app().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let matches = make_app()
            .try_get_matches_from(["tally", "-c", "/etc/tally", "run", "-d", "--udp-port", "9125"])
            .unwrap();

        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("/etc/tally"))
        );

        let run = matches.subcommand_matches("run").unwrap();
        assert!(run.get_flag("master_only"));
        assert!(!run.get_flag("worker"));
        assert_eq!(
            run.get_one::<String>("udp_port").map(String::as_str),
            Some("9125")
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(make_app().try_get_matches_from(["tally"]).is_err());
    }
}
