//! Skymap CLI
//!
//! - `merge`: fold several inventory documents into one
//! - `graph`: build the relationship graph, optionally filtered, as JSON or DOT
//! - `stats`: summary counters for one or more documents
//! - `serve`: HTTP graph server over uploaded inventory sources

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use skymap_graph::export::{render, ExportFormat};
use skymap_graph::{build_graph, GraphIndex, GraphQuery};
use skymap_inventory::{merge, InventoryDocument, InventoryStats};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod server;

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "SKYMAP_LOG";

#[derive(Parser)]
#[command(name = "skymap")]
#[command(
    author,
    version,
    about = "Skymap: relationship graphs over cloud account inventories"
)]
struct Cli {
    /// Log at debug level unless `SKYMAP_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge inventory documents (first source wins on scalar conflicts).
    Merge {
        /// Inventory documents, in priority order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Write the merged document here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build the relationship graph.
    Graph(GraphArgs),

    /// Print summary statistics.
    Stats {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Print the counters as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the graph over HTTP.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
struct GraphArgs {
    /// Inventory documents; more than one is merged first.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Comma separated region codes to keep (`global` for account-wide resources).
    #[arg(long)]
    regions: Option<String>,

    /// Comma separated service names to keep.
    #[arg(long)]
    services: Option<String>,

    /// Output format: `json` or `dot`.
    #[arg(long, default_value = "json")]
    format: ExportFormat,

    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Inventory documents loaded at startup. Missing files are skipped.
    inputs: Vec<PathBuf>,

    /// Listen address (use `127.0.0.1:0` to auto-pick a free port).
    #[arg(long, env = "SKYMAP_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Largest accepted upload body, in megabytes.
    #[arg(long, env = "SKYMAP_MAX_UPLOAD_MB", default_value_t = 500)]
    max_upload_mb: u64,

    /// If set, write a small JSON file once the server is listening.
    ///
    /// Contents: `{"addr": "...", "pid": ...}`.
    #[arg(long)]
    ready_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Merge { inputs, out } => cmd_merge(&inputs, out.as_deref()),
        Commands::Graph(args) => cmd_graph(&args),
        Commands::Stats { inputs, json } => cmd_stats(&inputs, json),
        Commands::Serve(args) => server::cmd_serve(args),
    }
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn load_documents(paths: &[PathBuf]) -> Result<Vec<InventoryDocument>> {
    paths
        .iter()
        .map(|path| {
            let doc = InventoryDocument::load(path)
                .with_context(|| format!("failed to load inventory {}", path.display()))?;
            tracing::debug!(
                path = %path.display(),
                regions = doc.regional_services.len(),
                errors = doc.errors.total(),
                "loaded inventory"
            );
            Ok(doc)
        })
        .collect()
}

/// A single document is used as-is; several are merged.
fn combine(mut docs: Vec<InventoryDocument>) -> InventoryDocument {
    if docs.len() == 1 {
        docs.remove(0)
    } else {
        merge(&docs)
    }
}

fn write_output(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = text.len(), "wrote output");
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn cmd_merge(inputs: &[PathBuf], out: Option<&Path>) -> Result<()> {
    let docs = load_documents(inputs)?;
    let merged = merge(&docs);
    tracing::info!(
        sources = docs.len(),
        regions = merged.metadata.regions_scanned.len(),
        errors = merged.errors.total(),
        "merged inventories"
    );
    let text = merged.to_json_pretty().context("failed to serialize merged inventory")?;
    write_output(out, &text)
}

fn cmd_graph(args: &GraphArgs) -> Result<()> {
    let doc = combine(load_documents(&args.inputs)?);
    let graph = build_graph(&doc);

    let query = GraphQuery::from_params(args.regions.as_deref(), args.services.as_deref());
    let view = if query.is_unfiltered() {
        graph
    } else {
        GraphIndex::build(&graph).query(&graph, &query)
    };
    tracing::info!(nodes = view.nodes.len(), edges = view.edges.len(), "built graph");

    let text = render(&view, args.format).context("failed to render graph")?;
    write_output(args.out.as_deref(), &text)
}

fn cmd_stats(inputs: &[PathBuf], json: bool) -> Result<()> {
    let doc = combine(load_documents(inputs)?);
    let stats = InventoryStats::compute(&doc);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Inventory summary".bold());
    if let Some(at) = stats.ingestion_time.as_deref() {
        println!("  {:<20} {}", "collected", at.dimmed());
    }
    let rows = [
        ("regions scanned", stats.regions_scanned),
        ("regions active", stats.regions_active),
        ("s3 buckets", stats.s3_buckets),
        ("iam users", stats.iam_users),
        ("iam roles", stats.iam_roles),
        ("ec2 instances", stats.ec2_instances),
        ("vpcs", stats.vpcs),
        ("lambda functions", stats.lambda_functions),
        ("rds instances", stats.rds_instances),
    ];
    for (label, count) in rows {
        println!("  {:<20} {}", label, count.to_string().cyan());
    }
    let errors = stats.total_errors.to_string();
    let errors = if stats.total_errors > 0 {
        errors.yellow()
    } else {
        errors.green()
    };
    println!("  {:<20} {}", "access errors", errors);
    Ok(())
}
