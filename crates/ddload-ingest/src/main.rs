//! ddload ingest - bulk record loader

use anyhow::{Context, Result};
use clap::Parser;
use ddload_common::logging::{init_logging, LogConfig, LogLevel};
use ddload_common::units::human_bytes;
use ddload_common::PayloadShape;
use ddload_ingest::cluster::{ClusterMembership, LocalHost, StaticMembership};
use ddload_ingest::config::{IngestConfig, PayloadKind, DEFAULT_ENTRY_WIDTH};
use ddload_ingest::pool::{configure_runtime, RuntimeSettings};
use ddload_ingest::store::MemoryStoreService;
use ddload_ingest::{IngestError, IngestionDriver};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ddload-ingest")]
#[command(author, version, about = "Bulk-load generated records into a sharded store")]
struct Cli {
    /// Requested item count; indices 1..nitems are generated
    #[arg(short = 'n', long)]
    nitems: Option<u64>,

    /// Payload size per item in MiB
    #[arg(long)]
    item_mb: Option<f64>,

    /// Number of worker threads
    #[arg(short, long)]
    pool_size: Option<usize>,

    /// Items sent to a worker at a time
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Log progress every N completed items
    #[arg(long)]
    progress_every: Option<u64>,

    /// Store managers per node
    #[arg(long)]
    shards_per_node: Option<usize>,

    /// Nodes to spread the store over (default: all)
    #[arg(long)]
    node_count: Option<usize>,

    /// Multiplier on the estimated data volume
    #[arg(long)]
    headroom: Option<f64>,

    /// Ceiling on store size as a fraction of cluster memory
    #[arg(long)]
    memory_fraction: Option<f64>,

    /// Prefix for record keys
    #[arg(long)]
    key_prefix: Option<String>,

    /// Payload shape: blob or structured
    #[arg(long)]
    payload: Option<PayloadKind>,

    /// Entry width in bytes for structured payloads
    #[arg(long)]
    entry_width: Option<usize>,

    /// Cluster node as name=bytes; repeat for more nodes (default: this host)
    #[arg(long = "node", value_name = "NAME=BYTES")]
    nodes: Vec<String>,

    /// Worker thread stack size in KiB
    #[arg(long)]
    worker_stack_kb: Option<usize>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags win over the environment
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(nitems) = self.nitems {
            config.nitems = nitems;
        }
        if let Some(item_mb) = self.item_mb {
            config.item_mb = item_mb;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(progress_every) = self.progress_every {
            config.progress_every = progress_every;
        }
        if let Some(shards) = self.shards_per_node {
            config.planner.shards_per_node = shards;
        }
        if self.node_count.is_some() {
            config.planner.node_count = self.node_count;
        }
        if let Some(headroom) = self.headroom {
            config.planner.headroom_factor = headroom;
        }
        if let Some(fraction) = self.memory_fraction {
            config.planner.node_memory_fraction = fraction;
        }
        if let Some(prefix) = &self.key_prefix {
            config.key_prefix = prefix.clone();
        }
        if self.payload.is_some() || self.entry_width.is_some() {
            let width = self.entry_width.unwrap_or(match config.payload {
                PayloadShape::Structured { entry_width } => entry_width,
                PayloadShape::Blob => DEFAULT_ENTRY_WIDTH,
            });
            let kind = self.payload.unwrap_or(match config.payload {
                PayloadShape::Structured { .. } => PayloadKind::Structured,
                PayloadShape::Blob => PayloadKind::Blob,
            });
            config.payload = kind.shape(width);
        }
    }

    /// Environment, then flags, then one validation pass
    fn resolve_config(&self) -> Result<IngestConfig> {
        let mut config = IngestConfig::from_env().context("Failed to load ingest configuration")?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn runtime_settings(&self) -> Result<Option<RuntimeSettings>, IngestError> {
        let Some(kb) = self.worker_stack_kb else {
            return Ok(None);
        };
        let stack_size = kb.checked_mul(1024).ok_or_else(|| {
            IngestError::Config(format!("worker stack of {} KiB does not fit in memory", kb))
        })?;
        Ok(Some(RuntimeSettings {
            stack_size: Some(stack_size),
            ..RuntimeSettings::default()
        }))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ddload-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    if let Some(settings) = cli.runtime_settings()? {
        configure_runtime(settings)?;
    }

    let config = cli.resolve_config()?;

    let membership: Box<dyn ClusterMembership> = if cli.nodes.is_empty() {
        Box::new(LocalHost::new())
    } else {
        Box::new(StaticMembership::parse_specs(&cli.nodes)?)
    };
    let available_nodes = membership
        .list_nodes()
        .map_err(anyhow::Error::msg)
        .context("Failed to list cluster nodes")?
        .len();
    let service = MemoryStoreService::new(available_nodes);

    info!(
        nitems = config.nitems,
        item_size = %human_bytes(config.item_size_bytes()),
        pool_size = config.pool_size,
        "Starting ingestion"
    );

    let report = tokio::task::spawn_blocking(move || {
        IngestionDriver::new(config, membership.as_ref(), &service).run()
    })
    .await
    .context("Ingestion task panicked")??;

    if let Some(path) = &cli.report {
        report.write_json(path)?;
        info!(path = %path.display(), "Report written");
    }

    if report.is_clean() {
        info!("Ingestion complete");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed = report.failed, "Ingestion finished with failed items");
        Ok(ExitCode::FAILURE)
    }
}
