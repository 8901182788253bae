use crate::config::ConfigError;
use crate::ingest::loader::LoadError;
use crate::store::StoreError;
use thiserror::Error;

/// Fatal conditions that end a pipeline run.
///
/// Skipped records and batches that failed after retries are not errors; they are
/// reported through [`LoadSummary`](crate::ingest::LoadSummary).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to fetch object '{key}': {source}")]
    Fetch {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed reading '{key}' after line {line}: {source}")]
    Read {
        key: String,
        line: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line} of '{key}' exceeds {limit} bytes")]
    LineTooLong { key: String, line: u64, limit: usize },
    #[error("malformed record at '{key}' line {line}: {source}")]
    Decode {
        key: String,
        line: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("bulk insert failed: {0}")]
    Load(#[from] LoadError),
    #[error("{stage} worker failed: {message}")]
    Worker { stage: &'static str, message: String },
}
