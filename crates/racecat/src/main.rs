mod racecat;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "racecat",
    version,
    about = "racecat - connect to the first reachable host and relay stdin/stdout over it"
)]
struct Cli {
    /// Path to a racecat config file (.toml/.yaml/.yml).
    ///
    /// If omitted, uses RACECAT_CONFIG; then auto-detects racecat.toml > racecat.yaml >
    /// racecat.yml from CWD; then the user config dir; otherwise built-in defaults.
    #[arg(long, env = "RACECAT_CONFIG")]
    config: Option<PathBuf>,

    /// Per-host connect timeout, e.g. "30s" or "500ms".
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Log level (debug|info|warn|error). RUST_LOG takes precedence.
    #[arg(long)]
    log_level: Option<String>,

    /// Port to connect to on every host.
    port: String,

    /// Candidate hosts; the first one to accept wins.
    #[arg(required = true)]
    hosts: Vec<String>,
}

impl From<Cli> for racecat::RunOptions {
    fn from(cli: Cli) -> Self {
        racecat::RunOptions {
            config_path: cli.config,
            port: cli.port,
            hosts: cli.hosts,
            dial_timeout: cli.timeout,
            log_level: cli.log_level,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    match racecat::run(cli.into()) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) if is_all_unreachable(&err) => {
            eprintln!("Host(s) unavailable");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err),
    }
}

fn is_all_unreachable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<racecat::RaceError>()
        .is_some_and(|e| e.is_all_unreachable())
}
