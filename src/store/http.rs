use super::{ObjectReader, ObjectStore, StoreError};
use futures_util::TryStreamExt;
use reqwest::{StatusCode, Url};
use std::io;
use std::time::Duration;
use tokio_util::io::StreamReader;

/// Reads objects from an S3-compatible endpoint using path-style URLs
/// (`{endpoint}/{bucket}/{key}`).
///
/// Intended for public buckets or gateways that authenticate at the network edge;
/// request signing is not performed here.
#[derive(Clone)]
pub struct HttpObjectStore {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, bucket: &str, timeout: Duration) -> Result<Self, StoreError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| StoreError::InvalidEndpoint(endpoint.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::InvalidEndpoint(endpoint.to_string()));
        }

        // No total request timeout: bodies can take minutes to stream. Stalls are caught
        // by the per-read timeout instead.
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent("product-ingest/0.1")
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            http,
            endpoint,
            bucket: bucket.to_string(),
        })
    }

    /// Build the object URL, percent-encoding each key segment.
    pub fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidEndpoint(self.endpoint.to_string()))?;
            segments.pop_if_empty();
            segments.push(&self.bucket);
            segments.extend(key.split('/'));
        }
        Ok(url)
    }
}

impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, key: &str) -> Result<ObjectReader, StoreError> {
        let url = self.object_url(key)?;
        log::debug!("fetching object {}", url);

        let response = self.http.get(url).send().await.map_err(StoreError::Http)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            status => {
                return Err(StoreError::Status {
                    key: key.to_string(),
                    status,
                });
            }
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}
