mod config;
mod scripted;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fanout_core::{EventEnvelope, SharedContext, UnitInput};
use futures_util::StreamExt;
use orchestrator::{Orchestrator, SessionStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::FanoutConfig;

#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Run units of work in parallel and stream their events", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with an [orchestrator] table and [[units]] entries,
    /// or a .json file with orchestrator settings only
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered units and their granularities
    List,
    /// Execute units and print every envelope as a JSON line
    Run {
        /// Units to run; all registered units when omitted
        #[arg(short, long, value_delimiter = ',')]
        units: Vec<String>,

        #[arg(short, long)]
        input: String,

        #[arg(short, long)]
        granularity: Option<String>,

        /// Stop a unit after a delay, as NAME=MS (repeatable)
        #[arg(long = "stop", value_parser = parse_stop)]
        stops: Vec<(String, u64)>,
    },
}

fn parse_stop(raw: &str) -> std::result::Result<(String, u64), String> {
    let (name, ms) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=MS, got '{}'", raw))?;
    if name.is_empty() {
        return Err("unit name must not be empty".to_string());
    }
    let ms = ms
        .parse()
        .map_err(|e| format!("invalid delay '{}': {}", ms, e))?;
    Ok((name.to_string(), ms))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = FanoutConfig::load(cli.config.as_deref()).await?;
    let orchestrator = build_orchestrator(config)?;

    match cli.command {
        Commands::List => list(&orchestrator),
        Commands::Run {
            units,
            input,
            granularity,
            stops,
        } => run(Arc::new(orchestrator), units, input, granularity, stops).await,
    }
}

fn build_orchestrator(config: FanoutConfig) -> Result<Orchestrator> {
    config.orchestrator.validate()?;
    let mut orchestrator = Orchestrator::new(config.orchestrator);
    for unit in config.units {
        let name = unit.name.clone();
        orchestrator
            .register(Arc::new(unit))
            .with_context(|| format!("Failed to register unit '{}'", name))?;
    }
    Ok(orchestrator)
}

fn list(orchestrator: &Orchestrator) -> Result<()> {
    println!("Units ({}):", orchestrator.list_available().len());
    for name in orchestrator.list_available() {
        let granularities = orchestrator
            .unit(&name)
            .map(|u| u.supported_granularities().join(", "))
            .unwrap_or_default();
        println!("  {} [{}]", name, granularities);
    }
    Ok(())
}

async fn run(
    orchestrator: Arc<Orchestrator>,
    units: Vec<String>,
    input: String,
    granularity: Option<String>,
    stops: Vec<(String, u64)>,
) -> Result<()> {
    let units = if units.is_empty() {
        orchestrator.list_available()
    } else {
        units
    };
    let granularity =
        granularity.unwrap_or_else(|| orchestrator.config().default_granularity.clone());

    let stream = orchestrator.execute_granularity(
        UnitInput::new(input),
        &units,
        SharedContext::empty(),
        granularity,
    )?;
    tracing::info!(session_id = %stream.session_id(), "Session started");

    stream_session(&orchestrator, stream, stops, |envelope| {
        println!("{}", serde_json::to_string(envelope)?);
        Ok(())
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
    Ok(())
}

/// Drain `stream` into `emit`, firing each scheduled stop after its delay.
/// Stops still pending when the session ends are cancelled.
async fn stream_session(
    orchestrator: &Arc<Orchestrator>,
    mut stream: SessionStream,
    stops: Vec<(String, u64)>,
    mut emit: impl FnMut(&EventEnvelope) -> Result<()>,
) -> Result<()> {
    let stop_tasks: Vec<_> = stops
        .into_iter()
        .map(|(name, ms)| {
            let orchestrator = Arc::clone(orchestrator);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                orchestrator.stop(&name).await;
            })
        })
        .collect();

    let mut drained = Ok(());
    while let Some(envelope) = stream.next().await {
        if let Err(e) = emit(&envelope) {
            drained = Err(e);
            break;
        }
    }

    for task in &stop_tasks {
        task.abort();
    }
    for task in stop_tasks {
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Scheduled stop dropped, session already ended")
            }
            Err(e) => tracing::warn!("Stop task failed: {}", e),
        }
    }

    drained
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=info,orchestrator=info".into()),
        )
        .init();
}
