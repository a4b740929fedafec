//! The arbx daemon.
//!
//! ```not_rust
//! arbx node --config arbx.toml --metrics 127.0.0.1:9001
//! ```
//!
//! Long-running, no interactive surface beyond start/stop: loads the config,
//! wires the engine to its external services, and runs until SIGINT/SIGTERM.

use arbx_config::EngineConfig;
use arbx_engine::{
    DetectorEstimateCalculator, ExecutionEngine, ExternalServices, MemoryBroker,
};
use arbx_primitives::{EventSink, SharedSink};
use clap::{Parser, Subcommand};
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "arbx", about = "Arbitrage execution daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the execution engine.
    Node(NodeArgs),
    /// Validate a config file and print the support summary.
    Check(CheckArgs),
}

#[derive(Debug, clap::Args)]
struct NodeArgs {
    /// Path to the TOML configuration.
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// Prometheus exporter listen address.
    #[arg(long, value_name = "ADDR")]
    metrics: Option<SocketAddr>,

    /// Directory for rolling file logs, stdout-only when absent.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
struct CheckArgs {
    /// Path to the TOML configuration.
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => run_node(args),
        Command::Check(args) => run_check(args),
    }
}

fn run_node(args: NodeArgs) -> eyre::Result<()> {
    let _log_guard = arbx_tracing::init(args.log_dir.map(|directory| arbx_tracing::FileLogConfig {
        directory,
        prefix: "arbx.log".to_string(),
    }));

    let config = EngineConfig::load(&args.config)?;
    info!(target: "arbx", instance = %config.instance_id, "configuration loaded");

    if let Some(addr) = args.metrics {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(target: "arbx", %addr, "prometheus exporter started");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        // The broker client is the deployment's integration point; the
        // in-process broker keeps single-node runs and tests self-contained.
        let broker = Arc::new(MemoryBroker::new());
        let services = ExternalServices {
            source: broker.clone(),
            sink: SharedSink::new(broker as Arc<dyn EventSink>),
            sequential_calculator: Arc::new(DetectorEstimateCalculator),
            batch_quoters: HashMap::new(),
            dex_lookup: None,
            simulator: None,
        };

        let engine = ExecutionEngine::new(config, services)?;
        engine.start();

        shutdown_signal().await;
        info!(target: "arbx", "shutdown signal received");
        engine.stop().await;
        Ok::<(), eyre::Report>(())
    })?;

    Ok(())
}

fn run_check(args: CheckArgs) -> eyre::Result<()> {
    let config = EngineConfig::load(&args.config)?;
    println!("config ok: instance {}", config.instance_id);

    let registry = arbx_flashloan::ProviderRegistry::new(config.flash_loans.clone());
    for (chain, status) in registry.support_summary() {
        println!("  {chain}: {status:?}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
