use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use product_ingest::config::{
    ConfigError, DecodePolicy, IngestConfig, StoreConfig, StoreLocation, split_keys,
};
use product_ingest::ingest::{IngestPipeline, PgBulkLoader, run_migrations};
use product_ingest::store::StoreClient;

/// Command line overrides; anything not given falls back to the environment.
#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    about = "Bulk-load JSON-lines product objects into Postgres"
)]
struct Args {
    /// Comma-separated object keys to load.
    #[arg(long)]
    keys: Option<String>,

    /// Read objects from this directory instead of the HTTP object store.
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Rows per bulk insert.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Parser pool size.
    #[arg(long)]
    workers: Option<usize>,

    /// Concurrent bulk inserts.
    #[arg(long)]
    max_inflight: Option<usize>,

    /// `skip` or `fail` on malformed records.
    #[arg(long)]
    decode_policy: Option<DecodePolicy>,

    /// Maximum connections in the database pool.
    #[arg(long)]
    max_connections: Option<u32>,
}

impl Args {
    fn apply(&self, ingest: &mut IngestConfig, store: &mut StoreConfig) {
        if let Some(keys) = &self.keys {
            store.object_keys = split_keys(keys);
        }
        if let Some(batch_size) = self.batch_size {
            ingest.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            ingest.parser_workers = workers;
        }
        if let Some(max_inflight) = self.max_inflight {
            ingest.max_inflight_batches = max_inflight;
        }
        if let Some(policy) = self.decode_policy {
            ingest.decode_policy = policy;
        }
    }
}

fn resolve_store_config(args: &Args) -> Result<StoreConfig, ConfigError> {
    // A local directory on the command line makes the HTTP settings optional.
    match &args.local_dir {
        Some(root) => Ok(StoreConfig::with_location(StoreLocation::Local {
            root: root.clone(),
        })),
        None => StoreConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    product_ingest::init_logger();

    let args = Args::parse();

    let mut ingest_config = IngestConfig::from_env()?;
    let mut store_config = resolve_store_config(&args)?;
    args.apply(&mut ingest_config, &mut store_config);

    if store_config.object_keys.is_empty() {
        eprintln!("error: no object keys to load");
        std::process::exit(2);
    }

    let max_connections = args.max_connections.unwrap_or_else(|| {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(10)
    });
    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;

    run_migrations(&pool).await?;

    let store = StoreClient::from_config(&store_config)?;
    let loader = Arc::new(PgBulkLoader::new(pool.clone(), ingest_config.batch_size));
    let pipeline = IngestPipeline::new(ingest_config, loader)?;

    let outcome = pipeline.run(&store, &store_config.object_keys).await;
    pool.close().await;

    match outcome {
        Ok(summary) => {
            println!("{summary}");
            for reject in &summary.rejected {
                println!("  skipped {}:{}: {}", reject.source, reject.line, reject.reason);
            }
            if summary.batches_failed > 0 {
                std::process::exit(3);
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
