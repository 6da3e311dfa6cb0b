//! `daycycle` command-line entry point.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use daycycle_lib::commands::{self, FaultArg, SimulateOptions};
use daycycle_lib::{init_logging, load_config, parse_timezone};

/// Keep a playback surface aligned with a 24-hour broadcast cycle.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration (JSON).
    #[arg(short, long, global = true, default_value = "config/daycycle.json")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current day offset, the selected mode and the part plan.
    Now {
        /// Clock to read: `local`, or a fixed offset such as `+09:00`.
        #[arg(long, value_parser = parse_timezone)]
        tz: Option<daycycle_ipc::TimezoneMode>,
    },

    /// Run the engine against a scripted surface on simulated time.
    Simulate {
        /// Simulated seconds to run.
        #[arg(long, default_value_t = 60)]
        seconds: u32,

        /// Simulated seconds per step.
        #[arg(long, default_value_t = 1)]
        step: u32,

        /// Wall-clock start (RFC 3339). Defaults to now.
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Report a stream failure of this kind.
        #[arg(long, value_enum)]
        fault: Option<FaultArg>,

        /// Simulated second at which the failure is reported.
        #[arg(long, default_value_t = 10, requires = "fault")]
        fault_at: u32,
    },

    /// Run the engine in real time against a scripted surface.
    Watch {
        /// Seconds to run before shutting down.
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli.config)?;
    info!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Command::Now { tz } => {
            let report = commands::now(&config, tz)?;
            println!("{report}");
        }
        Command::Simulate {
            seconds,
            step,
            start,
            fault,
            fault_at,
        } => {
            let options = SimulateOptions {
                seconds,
                step,
                start: start.unwrap_or_else(Utc::now),
                fault: fault.map(|kind| (kind, fault_at)),
            };
            let report = commands::simulate(config, &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watch { seconds } => {
            commands::watch(config, std::time::Duration::from_secs(seconds))?;
        }
    }

    Ok(())
}
