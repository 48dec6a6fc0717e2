use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ld_reweight::config::EvaluationConfig;
use ld_reweight::error::Result;
use ld_reweight::pipeline::Pipeline;
use ld_reweight::simulator;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the configuration TOML
    #[arg(long, default_value = "evaluate.toml")]
    config: PathBuf,

    /// Worker threads (overrides config, 0 = one per CPU)
    #[arg(long)]
    threads: Option<usize>,

    /// Hide progress bars
    #[arg(long, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reweight, stitch and normalize existing run files
    Evaluate,
    /// Launch the simulator for every missing run
    Simulate,
}

fn run(args: Args) -> Result<()> {
    let mut config = EvaluationConfig::from_path(&args.config)?;
    if let Some(threads) = args.threads {
        config.analysis.threads = threads;
    }
    if args.quiet {
        config.analysis.progress = false;
    }

    match args.command {
        Command::Simulate => {
            let summary = simulator::run_all(&config)?;
            if summary.failed > 0 {
                error!("{} simulator runs failed", summary.failed);
            }
        }
        Command::Evaluate => {
            let report = Pipeline::new(config)?.run()?;
            for r in &report.sizes {
                if let Some(notice) = r.stitch.notice() {
                    info!("N={}: {notice}", r.size);
                }
            }
            info!(
                "evaluated {} sizes, {} failed",
                report.sizes.len(),
                report.failed.len()
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
