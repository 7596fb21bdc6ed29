mod artifacts;
mod minimize;
mod report;

use clap::{Parser, Subcommand};
use minimize::MinimizeArgs;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "promptmin")]
#[command(about = "Shrink a prompt to the smallest version that still fails its tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Minimize a prompt file against a test configuration
    Minimize(MinimizeArgs),
}

/// Usage and configuration errors.
const EXIT_USAGE: u8 = 1;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match cli.command {
        Commands::Minimize(args) => {
            init_logging(args.verbose);
            let command = std::env::args().collect::<Vec<_>>().join(" ");
            match minimize::run(&args, command) {
                Ok(code) => ExitCode::from(code),
                Err(err) => {
                    error!(event = "minimize_failed", error = %format!("{err:#}"));
                    eprintln!("promptmin: {err:#}");
                    ExitCode::from(EXIT_USAGE)
                }
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("PROMPTMIN_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
