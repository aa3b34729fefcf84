use clap::{Arg, Command};
use std::path::Path;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use fatigue_esa::app_logic;
use fatigue_esa::export::ExportFormat;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("fatigue-esa")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Incremental equivalent stress analyses: damage angle sweeps and loadcase damage contributions")
        .arg(
            Arg::new("run")
                .short('r')
                .long("run")
                .value_name("CONFIG")
                .help("Run the analysis described by a YAML or TOML configuration file")
                .required(true),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(["json", "csv"])
                .default_value("json")
                .help("Format of the results"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the results to FILE instead of stdout"),
        )
        .after_help(
            "Set RUST_LOG (e.g. RUST_LOG=debug) to change the log level. \
             Failed sub-analyses are reported as warnings and leave a gap in the results.",
        )
        .get_matches();

    let Some(config) = matches.get_one::<String>("run") else {
        return ExitCode::FAILURE;
    };
    let format = matches
        .get_one::<String>("format")
        .and_then(|format| format.parse::<ExportFormat>().ok())
        .unwrap_or_default();
    let output = matches.get_one::<String>("output").map(Path::new);

    match app_logic::run(config, format, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
