//! # quakeloss
//!
//! Tracks damage, losses and occupancy of a building portfolio across a sequence of real
//! earthquakes (RLA) and seismicity forecasts (OELF).
//!
//! ```bash
//! quakeloss run --config config.json --input ./input --output ./output
//! RUST_LOG=quakeloss=debug quakeloss run -c config.json -i ./input -o ./output
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quakeloss")]
#[command(about = "Damage, loss and occupancy across earthquake sequences and forecasts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the triggering sequence of an input directory
    Run {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input directory (exposure, consequences, triggers, damage results)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory; must not hold the report of an earlier run
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Command::Run {
            config,
            input,
            output,
        } => quakeloss::run(&config, &input, &output),
    };

    match result {
        Ok(report) => {
            tracing::info!(
                "Run {} finished: {} earthquake(s), {} forecast(s)",
                report.run_id,
                report.rla.len(),
                report.oelf.len()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}
