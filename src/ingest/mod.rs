//! Bulk ingestion of JSON-lines product objects into Postgres.
//!
//! A run is four stages joined by bounded queues:
//!
//! 1. [`reader`]: one task per object, splitting the body into lines.
//! 2. [`parser`]: a fixed pool of blocking workers decoding lines into [`Product`]s.
//! 3. [`accumulator`]: a single consumer grouping products into fixed-size batches.
//! 4. [`loader`]: one multi-row insert per batch, bounded by a semaphore.
//!
//! [`IngestPipeline`] wires the stages together and reports a [`LoadSummary`].
//!
//! [`Product`]: crate::models::Product

pub mod accumulator;
pub mod error;
pub mod loader;
pub mod migration;
pub mod parser;
pub mod pipeline;
pub mod reader;
pub mod retry;
pub mod statement;
pub mod stats;

pub use error::PipelineError;
pub use loader::{BatchSink, LoadError, PgBulkLoader};
pub use migration::run_migrations;
pub use pipeline::IngestPipeline;
pub use retry::RetryPolicy;
pub use stats::{BatchResult, LoadSummary, RejectedRecord};
