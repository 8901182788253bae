//! Object storage clients the ingest pipeline reads JSONL objects from.
//!
//! The pipeline only needs `fetch(key) -> byte stream`; everything else (credentials,
//! addressing, retries of the initial request) stays behind the [`ObjectStore`] trait.

pub mod http;
pub mod local;

use crate::config::{StoreConfig, StoreLocation};
use reqwest::StatusCode;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;

/// Owned, sendable byte stream over one object body.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object '{key}' not found")]
    NotFound { key: String },
    #[error("object store returned status {status} for '{key}'")]
    Status { key: String, status: StatusCode },
    #[error("object store HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error opening '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("invalid object store endpoint '{0}'")]
    InvalidEndpoint(String),
}

/// Source of object bodies addressed by key.
pub trait ObjectStore: Send + Sync {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<ObjectReader, StoreError>> + Send;
}

/// Store selected at runtime from [`StoreConfig`].
pub enum StoreClient {
    Http(HttpObjectStore),
    Local(LocalObjectStore),
}

impl StoreClient {
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match &config.location {
            StoreLocation::Http { endpoint, bucket } => Ok(StoreClient::Http(
                HttpObjectStore::new(endpoint, bucket, config.timeout)?,
            )),
            StoreLocation::Local { root } => {
                Ok(StoreClient::Local(LocalObjectStore::new(root.clone())))
            }
        }
    }
}

impl ObjectStore for StoreClient {
    async fn fetch(&self, key: &str) -> Result<ObjectReader, StoreError> {
        match self {
            StoreClient::Http(store) => store.fetch(key).await,
            StoreClient::Local(store) => store.fetch(key).await,
        }
    }
}
