use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;

use reconf_planner::domain::control_loop::control_loop::{ControlLoop, CycleOutcome};
use reconf_planner::domain::control_loop::control_loop_config::ControlLoopConfig;
use reconf_planner::logger;

#[derive(Debug, Parser)]
#[command(name = "reconf-planner", about = "Plans and applies VM reconfigurations under placement constraints")]
struct Cli {
    /// Control loop properties file.
    #[arg(long)]
    config: PathBuf,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ControlLoopConfig::load(&cli.config).with_context(|| format!("invalid control loop configuration '{}'", cli.config.display()))?;
    logger::init(&config.logs_dir);
    log::info!("Starting the {} control loop.", config.loop_type);

    let mut control_loop = ControlLoop::from_config(config).context("failed to set up the control loop")?;

    if cli.once {
        let outcome = control_loop.run_cycle().await.context("control loop cycle failed")?;
        print_summary(&control_loop, &outcome);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    control_loop.run(shutdown_rx).await;
    Ok(())
}

fn print_summary(control_loop: &ControlLoop, outcome: &CycleOutcome) {
    let line = outcome.to_string();
    let colored = match outcome {
        CycleOutcome::Executed { .. } => line.green(),
        CycleOutcome::DryRun { .. } | CycleOutcome::Idle => line.cyan(),
        CycleOutcome::Infeasible { .. } | CycleOutcome::ExecutionFailed(_) => line.red(),
    };

    println!("{} {}", "Cycle:".bold(), colored);
    println!("{} {}", "Queued VJobs:".bold(), control_loop.queue().queued_len());
    println!("{} {}", "Running VJobs:".bold(), control_loop.queue().running_len());
    println!("{} {}", "Logs:".bold(), control_loop.config().logs_dir.display());
}
