//! Bid request preparation CLI.
//!
//! This tool provides commands for:
//! - Preparing one request per bidder from an `OpenRTB` auction request
//! - Validating pipeline settings files

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod error;
mod prepare;

use error::CliError;

#[derive(Parser)]
#[command(name = "bidprep")]
#[command(about = "Prepare per-bidder auction requests with first-party data and CCPA signals")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare one request per bidder and print them as JSON
    Prepare {
        /// Path to the auction request JSON, or `-` for stdin
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Participating bidders
        #[arg(long, short, required = true, value_delimiter = ',')]
        bidders: Vec<String>,

        /// Path to the TOML settings file (built-in defaults when omitted)
        #[arg(long, short, env = "BIDPREP_SETTINGS")]
        settings: Option<PathBuf>,

        /// Keep only extended identifiers from configured partners
        #[arg(long)]
        filter_eids: bool,
    },

    /// Settings management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate settings and show the merged result
    Validate {
        /// Path to the TOML settings file (built-in defaults when omitted)
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.verbose).and_then(|()| run(cli)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logger(verbose: bool) -> Result<(), CliError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Prepare {
            input,
            bidders,
            settings,
            filter_eids,
        } => prepare::prepare(
            input.as_deref(),
            &bidders,
            settings.as_deref(),
            filter_eids,
            cli.verbose,
        ),
        Commands::Config { action } => match action {
            ConfigAction::Validate { file } => config::validate(file.as_deref(), cli.verbose),
        },
    }
}
