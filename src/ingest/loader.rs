//! Bulk loader: one multi-row `INSERT ... ON CONFLICT (id) DO NOTHING` per batch.

use crate::ingest::statement::InsertStatements;
use crate::models::Product;
use rocket_db_pools::sqlx::{self, PgPool};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("batch of {0} rows cannot be expressed as a single statement")]
    BatchShape(usize),
}

impl LoadError {
    /// Whether retrying the same statement later may succeed.
    ///
    /// Connection loss, pool exhaustion, serialization/deadlock aborts, resource
    /// exhaustion and server shutdown are transient; statement or schema errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Database(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                    true
                }
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .map(|code| is_transient_sqlstate(&code))
                    .unwrap_or(false),
                _ => false,
            },
            LoadError::BatchShape(_) => false,
        }
    }

    /// Whether the server rejected the batch's data rather than the statement.
    ///
    /// Data exceptions (SQLSTATE class 22) and integrity violations other than the
    /// ignored id conflict (class 23) fail every retry of the same rows, but say nothing
    /// about the rest of the run.
    pub fn is_data_rejection(&self) -> bool {
        match self {
            LoadError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .map(|code| is_data_rejection_sqlstate(&code))
                .unwrap_or(false),
            _ => false,
        }
    }
}

fn is_data_rejection_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("22" | "23"))
}

fn is_transient_sqlstate(code: &str) -> bool {
    // 08: connection exception, 40: transaction rollback, 53: insufficient resources.
    matches!(code.get(..2), Some("08" | "40" | "53"))
        || matches!(code, "55P03" | "57P01" | "57P02" | "57P03")
}

/// Destination for completed batches.
pub trait BatchSink: Send + Sync + 'static {
    /// Persist `batch`, returning how many rows were newly written.
    fn insert_batch(&self, batch: &[Product]) -> impl Future<Output = Result<u64, LoadError>> + Send;
}

/// Writes batches into the `products` table.
///
/// sqlx prepares each distinct statement text once per connection and caches it, so the
/// shared full-batch statement is parsed and planned once per pooled connection.
pub struct PgBulkLoader {
    pool: PgPool,
    statements: InsertStatements,
}

impl PgBulkLoader {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            statements: InsertStatements::new(batch_size),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl BatchSink for PgBulkLoader {
    async fn insert_batch(&self, batch: &[Product]) -> Result<u64, LoadError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let sql = self
            .statements
            .for_rows(batch.len())
            .ok_or(LoadError::BatchShape(batch.len()))?;

        let mut query = sqlx::query(&sql);
        for product in batch {
            query = query
                .bind(product.id)
                .bind(product.price)
                .bind(product.title.as_str())
                .bind(product.category.as_str())
                .bind(product.brand.as_str())
                .bind(product.url.as_str())
                .bind(product.description.as_str());
        }

        let result = query.execute(&self.pool).await?;

        log::trace!(
            "bulk inserted {} of {} products",
            result.rows_affected(),
            batch.len()
        );
        Ok(result.rows_affected())
    }
}
