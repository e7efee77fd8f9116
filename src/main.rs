use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use lenient_shutdown::config::DrainConfig;
use lenient_shutdown::service::DrainService;
use lenient_shutdown::shutdown::install_shutdown_handler;
use lenient_shutdown::simulation::{run_scenario, DrainSpec, RunSpec, Scenario, ScenarioReport};

#[derive(Parser, Debug)]
#[command(name = "lenient-shutdown")]
#[command(version)]
#[command(about = "Take draining compute nodes offline once their runs finish")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Play a drain scenario against an in-process cluster
    Simulate(SimulateArgs),
}

// =============================================================================
// Simulate Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Node names (comma-separated)
    /// Example: "agent-1,agent-2"
    #[arg(long, value_delimiter = ',', required = true)]
    nodes: Vec<String>,

    /// Drain a node on behalf of a user (repeatable, format: "node=user")
    #[arg(long = "drain")]
    drains: Vec<DrainSpec>,

    /// Run to simulate (repeatable, format: "node:secs", "ephemeral:secs"
    /// or "ephemeral@node:secs")
    #[arg(long = "run")]
    runs: Vec<RunSpec>,

    /// Seconds between a run finishing and its idle probe firing
    #[arg(long, default_value = "10")]
    probe_delay_secs: u64,

    /// Keep at most one pending idle probe per node
    #[arg(long)]
    dedupe: bool,

    /// Put the system in full-shutdown mode, tracking every run's queue id
    #[arg(long)]
    full_shutdown: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Output
// =============================================================================

fn print_report(
    report: &ScenarioReport,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<16} {:<9} {:<12} {:<8} CAUSE",
                "NODE", "DRAINING", "DRAINED BY", "RUNNING"
            );
            println!("{}", "-".repeat(78));
            for node in &report.nodes {
                println!(
                    "{:<16} {:<9} {:<12} {:<8} {}",
                    node.name,
                    if node.draining { "yes" } else { "no" },
                    node.drained_by.as_deref().unwrap_or("-"),
                    node.running,
                    node.offline_cause.as_deref().unwrap_or("online"),
                );
            }
            if report.full_shutdown {
                println!();
                if report.active_queue_ids.is_empty() {
                    println!("Full shutdown: no active queue ids left");
                } else {
                    println!("Full shutdown: waiting on {:?}", report.active_queue_ids);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Simulate Implementation
// =============================================================================

async fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = DrainConfig::new(Duration::from_secs(args.probe_delay_secs))
        .with_dedupe(args.dedupe);

    let shutdown = install_shutdown_handler()?;
    let service = Arc::new(DrainService::new(config, shutdown.clone()));
    let listener = service.start()?;

    tracing::info!(
        nodes = ?args.nodes,
        drains = args.drains.len(),
        runs = args.runs.len(),
        full_shutdown = args.full_shutdown,
        "Starting simulation"
    );

    let scenario = Scenario {
        nodes: args.nodes,
        drains: args.drains,
        runs: args.runs,
        full_shutdown: args.full_shutdown,
    };

    let result = tokio::select! {
        result = run_scenario(service.clone(), scenario) => result,
        _ = shutdown.cancelled() => {
            tracing::warn!("Simulation interrupted");
            return Ok(());
        }
    };
    let report = result?;

    service.shutdown();
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "Completion listener task failed");
    }

    print_report(&report, &args.output)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Simulate(simulate_args) => {
            run_simulation(simulate_args).await?;
        }
    }

    Ok(())
}
