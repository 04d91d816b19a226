//! CLI entry point for the Strata ontology store.
//!
//! Designed for subprocess invocation from higher layers: reads a JSON
//! argument object from stdin, writes a JSON result to stdout. State is
//! carried between invocations through the configured snapshot file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use strata_api::OntologyService;
use strata_core::config::StrataConfig;
use strata_core::{ActorContext, ActorId};
use strata_store::SchemaRegistry;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Mutation and query front-end for the Strata ontology store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Acting principal (uuid). The first actor to touch a fresh store
    /// is seeded as the platform owner.
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Config file prefix (default: strata).
    #[arg(short, long, default_value = "strata", global = true)]
    config: String,

    /// Snapshot file override.
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a mutation (reads JSON args from stdin).
    Mutate {
        /// Registered operation name, e.g. entity.create.
        #[arg(long)]
        operation: String,
    },
    /// Run a query (reads JSON args from stdin).
    Query {
        /// Registered operation name, e.g. entity.list.
        #[arg(long)]
        operation: String,
    },
    /// Ingest an externally-originated event (reads JSON payload from stdin).
    Ingest {
        /// Originating system, e.g. shopify.
        #[arg(long)]
        source: String,
        /// Caller-supplied idempotency key.
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = StrataConfig::load(&cli.config);

    let snapshot_path = cli
        .snapshot
        .clone()
        .or_else(|| config.snapshot_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("strata-snapshot.json"));

    let service = OntologyService::open(config, SchemaRegistry::new(), &snapshot_path)?;
    let ctx = resolve_actor(&cli, &service)?;

    match cli.command {
        Command::Mutate { ref operation } => {
            let args = read_stdin_json()?;
            let receipt = service.mutate(&ctx, operation, args).await?;
            println!("{}", serde_json::to_string(&receipt)?);
            service.persist(&snapshot_path).await?;
        }
        Command::Query { ref operation } => {
            let args = read_stdin_json()?;
            let result = service.query(&ctx, operation, args).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Ingest { ref source, ref key } => {
            let payload = read_stdin_json()?;
            let event = service.ingest_external_event(&ctx, source, key, payload).await?;
            println!("{}", serde_json::to_string(&event)?);
            service.persist(&snapshot_path).await?;
        }
    }

    Ok(())
}

fn resolve_actor(cli: &Cli, service: &OntologyService) -> anyhow::Result<ActorContext> {
    let raw = cli
        .actor
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--actor is required"))?;
    let actor = ActorId(Uuid::parse_str(raw)?);

    // Bootstrap: a store with no principals at all seeds the first
    // caller as platform owner.
    if service.store().event_count()? == 0
        && !strata_auth::Directory::is_known_actor(service.store(), &actor)
    {
        service.store().seed_platform_owner(actor)?;
    }

    Ok(ActorContext::new(actor))
}

fn read_stdin_json() -> anyhow::Result<serde_json::Value> {
    let input = std::io::read_to_string(std::io::stdin())?;
    if input.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    Ok(serde_json::from_str(&input)?)
}
