//! World SDK CLI
//!
//! Compiles queries against a schema, lists the systems of a deployment
//! manifest and runs the demo world.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use world_sdk::config::ClientConfig;
use world_sdk::demo::{self, DEMO_WORLD_ADDRESS};
use world_sdk::loader::WorldLoader;
use world_sdk::world_query::{Query, QueryCompiler};

/// World SDK command line
#[derive(Parser, Debug)]
#[command(name = "world-sdk")]
#[command(about = "Typed queries and system calls for a world", long_about = None)]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Client configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a query and print its descriptor
    Compile {
        /// Schema file (.toml or .json)
        #[arg(long)]
        schema: PathBuf,

        /// Query as JSON
        #[arg(long)]
        query: String,
    },

    /// List the callable systems of a deployment manifest
    Systems {
        /// Manifest file
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Run the demo world in memory
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    match args.command {
        Command::Compile { schema, query } => compile(&schema, &query).await,
        Command::Systems { manifest } => systems(&manifest).await,
        Command::Demo => run_demo(args.config.as_deref()).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("world_sdk=info,world_query=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn compile(schema: &Path, query: &str) -> Result<()> {
    let schema = WorldLoader::load_schema(schema).await?;
    let json: serde_json::Value = serde_json::from_str(query).context("query is not valid JSON")?;
    let query = Query::from_json(&json)?;

    let descriptor = QueryCompiler::new(Arc::new(schema)).compile(&query)?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

async fn systems(manifest: &Path) -> Result<()> {
    let contracts = WorldLoader::load_contracts(manifest).await?;
    for contract in &contracts {
        for function in contract.functions().into_iter().filter(|f| f.is_callable()) {
            let inputs: Vec<String> = function
                .inputs
                .iter()
                .map(|p| format!("{}: {}", p.name, p.ty))
                .collect();
            println!("{}.{}({})", contract.tag, function.name, inputs.join(", "));
        }
    }
    Ok(())
}

async fn run_demo(config_file: Option<&Path>) -> Result<()> {
    let mut config: ClientConfig = ClientConfig::figment(config_file)?.extract()?;
    if config.world_address.is_empty() {
        config.world_address = DEMO_WORLD_ADDRESS.to_string();
    }

    info!("Starting demo world v{}", env!("CARGO_PKG_VERSION"));
    let report = demo::run_demo(config).await?;

    for tx in &report.transactions {
        println!("tx {tx}");
    }
    for todo in &report.pending {
        println!("open  {} {}", todo.id, todo.text);
    }
    for todo in &report.completed {
        println!("done  {} {}", todo.id, todo.text);
    }
    println!("{} live updates delivered", report.deliveries);
    Ok(())
}
