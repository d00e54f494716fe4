mod builder;
mod config;
mod coordinator;
mod debounce;
mod error;
mod events;
mod logging;
mod process;
mod resolve;
mod runner;
mod state;
mod subscription;
mod supervisor;
mod ui;
mod watcher;
mod web;

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::error::FatalError;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "flogo",
    version,
    about = "Watch, rebuild, rerun: a dev-loop supervisor with a live browser overlay"
)]
struct Cli {
    /// The directory containing the project to build
    #[arg(long, default_value = ".")]
    target: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The log file comes first: everything else reports through it.
    let file = match std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open("flogo.log")
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open 'flogo.log' for writing.");
            std::process::exit(FatalError::LogOpen(err).exit_code());
        }
    };
    logging::init(file);
    logging::install_panic_hook();

    let stdout_is_tty = atty::is(atty::Stream::Stdout);
    let config = match Config::load(&cli.target, stdout_is_tty) {
        Ok(config) => config,
        Err(err) => {
            let fatal = FatalError::from(err);
            eprintln!("{fatal}");
            std::process::exit(fatal.exit_code());
        }
    };

    if let Err(fatal) = supervisor::run(config).await {
        eprintln!("{fatal}");
        std::process::exit(fatal.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_target_to_current_dir() {
        let cli = Cli::try_parse_from(["flogo"]).expect("parse");
        assert_eq!(cli.target, PathBuf::from("."));
    }

    #[test]
    fn cli_accepts_target_flag() {
        let cli = Cli::try_parse_from(["flogo", "--target", "/srv/app"]).expect("parse");
        assert_eq!(cli.target, PathBuf::from("/srv/app"));
    }

    #[test]
    fn cli_rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["flogo", "--watch-all"]).is_err());
    }
}
