//! testrig - command-line entry point
//!
//! Loads a YAML run plan, orchestrates one pipeline run against it, and
//! exits 0 (succeeded), 1 (tests failed) or 2 (environment never became
//! usable) so calling automation can tell the outcomes apart.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use testrig_harness::{CommandInstaller, CommandTierExecutor, Pipeline, RunPlan};

#[derive(Parser, Debug)]
#[command(name = "testrig")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML run plan
    #[arg(short, long, default_value = "testrig.yaml")]
    plan: PathBuf,

    /// Output directory for the report, service logs and artifacts
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Run only the named tiers (repeatable; declaration order preserved)
    #[arg(short, long)]
    tier: Vec<String>,

    /// Override the plan's readiness deadline, in seconds
    #[arg(long)]
    readiness_deadline: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let mut plan = RunPlan::load(&args.plan)
        .with_context(|| format!("loading run plan {}", args.plan.display()))?;
    if let Some(secs) = args.readiness_deadline {
        plan.readiness_deadline_secs = secs;
    }

    let installer = CommandInstaller::new(plan.install.clone());
    let executor = CommandTierExecutor::new(plan.runner.clone());

    let mut pipeline = Pipeline::new(
        plan,
        Box::new(installer),
        Box::new(executor),
        args.output.clone(),
    );
    if !args.tier.is_empty() {
        pipeline = pipeline.with_tiers(&args.tier)?;
    }

    // Ctrl-C short-circuits the run straight to teardown
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let report = pipeline.run(cancel).await;
    report.print_summary();
    report.write(&args.output)?;

    std::process::exit(report.exit_code());
}
