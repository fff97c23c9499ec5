//! Tickwise CLI - declarative automation condition evaluation.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tickwise_condition::AutomationResult;
use tickwise_core::Time;
use tickwise_execution::{describe, Clock, EngineConfig, FixedClock, LogSink, SystemClock, TickEvaluator, TickResult};
use tickwise_graph::{AssetGraph, GraphDefinition};
use tickwise_storage::{CursorStore, JsonCursorStore, MemoryEventStore, StorageError};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tickwise")]
#[command(about = "Evaluate declarative automation conditions", long_about = None)]
struct Cli {
    #[command(flatten)]
    inputs: Inputs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Inputs {
    /// Graph definitions (JSON)
    #[arg(long, global = true, default_value = "tickwise.json")]
    definitions: PathBuf,

    /// Event log snapshot (JSON); empty when absent
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    /// Directory holding the committed cursor
    #[arg(long, global = true, default_value = ".tickwise")]
    state: PathBuf,

    /// Engine config (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Evaluation time override (RFC 3339)
    #[arg(long, global = true)]
    at: Option<Time>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one tick and commit its cursor
    Tick {
        /// Print each entity's evaluation tree
        #[arg(long)]
        explain: bool,
    },
    /// Evaluate ticks until interrupted
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<usize>,
        /// Seconds between ticks
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Show the committed cursor
    Cursor,
    /// Show entities in evaluation order
    Graph,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let inputs = &cli.inputs;

    match cli.command {
        Commands::Tick { explain } => {
            let engine = load_engine(inputs, None, None).await?;
            let mut cursors = JsonCursorStore::new(&inputs.state).await?;
            let result = engine.run_tick(&mut cursors, &LogSink).await?;
            print_tick(&result, explain);
            if result.has_errors() {
                anyhow::bail!("{} entities failed to evaluate", result.errors.len());
            }
        }
        Commands::Run { ticks, interval_secs } => {
            let engine = load_engine(inputs, ticks, interval_secs).await?;
            let mut cursors = JsonCursorStore::new(&inputs.state).await?;

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, finishing current tick");
                    let _ = tx.send(true);
                }
            });

            let ticks = engine.run(&mut cursors, &LogSink, rx).await?;
            info!("Completed {} ticks", ticks);
        }
        Commands::Cursor => {
            let cursors = JsonCursorStore::new(&inputs.state).await?;
            match cursors.load().await? {
                Some(cursor) => println!("{}", serde_json::to_string_pretty(&cursor)?),
                None => println!("No cursor committed yet"),
            }
        }
        Commands::Graph => {
            let graph = load_graph(&inputs.definitions).await?;
            println!("Entities ({})", graph.len());
            for key in graph.toposorted_keys() {
                let condition = graph
                    .condition_tree(key)?
                    .map(|c| c.name())
                    .unwrap_or_else(|| "-".to_string());
                let parents: Vec<String> = graph.parents(key).iter().map(ToString::to_string).collect();
                println!("  {} | {} | deps: [{}]", key, condition, parents.join(", "));
            }
        }
    }

    Ok(())
}

async fn load_graph(path: &Path) -> Result<AssetGraph> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read definitions {}", path.display()))?;
    let definition = GraphDefinition::from_json(&json)?;
    Ok(AssetGraph::build(definition)?)
}

async fn load_events(path: Option<&Path>) -> Result<MemoryEventStore> {
    let Some(path) = path else {
        return Ok(MemoryEventStore::new());
    };
    match MemoryEventStore::load(path).await {
        Ok(store) => Ok(store),
        Err(StorageError::NotFound(_)) => {
            warn!("Event log {} not found, starting empty", path.display());
            Ok(MemoryEventStore::new())
        }
        Err(e) => Err(e.into()),
    }
}

async fn load_engine(inputs: &Inputs, ticks: Option<usize>, interval_secs: Option<u64>) -> Result<TickEvaluator> {
    let mut config = match &inputs.config {
        Some(path) => EngineConfig::load(path).await?,
        None => EngineConfig::default(),
    };
    if let Some(ticks) = ticks {
        config = config.with_max_ticks(ticks);
    }
    if let Some(secs) = interval_secs {
        config = config.with_tick_interval(Duration::from_secs(secs));
    }

    let graph = load_graph(&inputs.definitions).await?;
    let events = load_events(inputs.events.as_deref()).await?;
    let clock: Arc<dyn Clock> = match inputs.at {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    };

    Ok(TickEvaluator::new(Arc::new(graph), Arc::new(events))
        .with_clock(clock)
        .with_config(config))
}

fn print_tick(result: &TickResult, explain: bool) {
    println!("Tick {} at {}", result.evaluation_id, result.evaluation_time);
    for (key, subset) in &result.requested {
        println!("  {} | {}", key, describe(subset));
        if explain {
            if let Some(tree) = result.results.get(key) {
                print_tree(tree, 2);
            }
        }
    }
    for (key, error) in &result.errors {
        println!("  {} | ERROR: {}", key, error);
    }
    for key in &result.omitted {
        println!("  {} | OMITTED", key);
    }
}

fn print_tree(result: &AutomationResult, depth: usize) {
    println!(
        "{}{} [{} / {}]",
        "  ".repeat(depth),
        result.name,
        result.true_subset.size(),
        result.candidate_subset.size()
    );
    for child in &result.child_results {
        print_tree(child, depth + 1);
    }
}
