//! Environment-driven configuration for the ingest job and the object store.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Postgres caps a single statement at 65535 bind parameters.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Number of bound columns per product row.
pub const PRODUCT_COLUMNS: usize = 7;

pub const DEFAULT_BATCH_SIZE: usize = 4000;
pub const DEFAULT_PARSER_WORKERS: usize = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_MAX_INFLIGHT_BATCHES: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 200;
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_OBJECT_KEYS: &str =
    "products-1.jsonl,products-2.jsonl,products-3.jsonl,products-4.jsonl";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// What the parser pool does with a line that is not a valid product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Log and count the record, keep going.
    #[default]
    Skip,
    /// Abort the whole run on the first malformed record.
    Fail,
}

impl FromStr for DecodePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(DecodePolicy::Skip),
            "fail" => Ok(DecodePolicy::Fail),
            other => Err(ConfigError::Invalid {
                key: "INGEST_DECODE_POLICY",
                reason: format!("expected 'skip' or 'fail', got '{other}'"),
            }),
        }
    }
}

/// Tuning knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub parser_workers: usize,
    pub queue_capacity: usize,
    pub max_inflight_batches: usize,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub max_line_bytes: usize,
    pub decode_policy: DecodePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parser_workers: DEFAULT_PARSER_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_inflight_batches: DEFAULT_MAX_INFLIGHT_BATCHES,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            decode_policy: DecodePolicy::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let decode_policy = match env_opt_string("INGEST_DECODE_POLICY") {
            Some(value) => value.parse()?,
            None => DecodePolicy::default(),
        };

        let config = Self {
            batch_size: env_usize("INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            parser_workers: env_usize("INGEST_PARSER_WORKERS", DEFAULT_PARSER_WORKERS),
            queue_capacity: env_usize("INGEST_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            max_inflight_batches: env_usize(
                "INGEST_MAX_INFLIGHT_BATCHES",
                DEFAULT_MAX_INFLIGHT_BATCHES,
            ),
            max_retries: env_u32("INGEST_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_base: env_duration_millis("INGEST_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS),
            max_line_bytes: env_usize("INGEST_MAX_LINE_BYTES", DEFAULT_MAX_LINE_BYTES),
            decode_policy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_BATCH_SIZE",
                reason: "must be at least 1".into(),
            });
        }
        match self.batch_size.checked_mul(PRODUCT_COLUMNS) {
            Some(params) if params <= MAX_BIND_PARAMS => {}
            _ => {
                return Err(ConfigError::Invalid {
                    key: "INGEST_BATCH_SIZE",
                    reason: format!(
                        "{} rows exceed the limit of {} bind parameters at {} per row",
                        self.batch_size, MAX_BIND_PARAMS, PRODUCT_COLUMNS
                    ),
                });
            }
        }
        if self.parser_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_PARSER_WORKERS",
                reason: "must be at least 1".into(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_QUEUE_CAPACITY",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_inflight_batches == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_MAX_INFLIGHT_BATCHES",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_MAX_LINE_BYTES",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Where objects are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// S3-compatible HTTP endpoint, path-style addressing.
    Http { endpoint: String, bucket: String },
    /// Plain directory on local disk; keys are relative paths.
    Local { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: StoreLocation,
    pub timeout: Duration,
    pub object_keys: Vec<String>,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let location = match env_opt_string("OBJECT_STORE_LOCAL_DIR") {
            Some(dir) => StoreLocation::Local {
                root: PathBuf::from(dir),
            },
            None => StoreLocation::Http {
                endpoint: env_opt_string("OBJECT_STORE_ENDPOINT")
                    .ok_or(ConfigError::Missing("OBJECT_STORE_ENDPOINT"))?,
                bucket: env_opt_string("OBJECT_STORE_BUCKET")
                    .ok_or(ConfigError::Missing("OBJECT_STORE_BUCKET"))?,
            },
        };

        Ok(Self::with_location(location))
    }

    /// Keys and timeout from the environment, objects from `location`.
    pub fn with_location(location: StoreLocation) -> Self {
        let keys = env_opt_string("INGEST_OBJECT_KEYS")
            .unwrap_or_else(|| DEFAULT_OBJECT_KEYS.to_string());

        Self {
            location,
            timeout: env_duration_millis("OBJECT_STORE_TIMEOUT_MS", 30_000),
            object_keys: split_keys(&keys),
        }
    }
}

/// Split a comma-separated key list, dropping blanks.
pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 4000);
        assert_eq!(config.parser_workers, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn batch_size_must_fit_bind_limit() {
        let config = IngestConfig {
            batch_size: 9363,
            ..IngestConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "INGEST_BATCH_SIZE",
                ..
            })
        ));

        let config = IngestConfig {
            batch_size: 9362,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn huge_batch_size_is_rejected_not_overflowed() {
        for batch_size in [usize::MAX / 2, usize::MAX] {
            let config = IngestConfig {
                batch_size,
                ..IngestConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    key: "INGEST_BATCH_SIZE",
                    ..
                })
            ));
        }
    }

    #[test]
    fn zero_workers_rejected() {
        let config = IngestConfig {
            parser_workers: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig {
            max_inflight_batches: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn decode_policy_parses_case_insensitively() {
        assert_eq!("SKIP".parse::<DecodePolicy>(), Ok(DecodePolicy::Skip));
        assert_eq!(" fail ".parse::<DecodePolicy>(), Ok(DecodePolicy::Fail));
        assert!("retry".parse::<DecodePolicy>().is_err());
    }

    #[test]
    fn split_keys_ignores_blanks() {
        assert_eq!(
            split_keys(" a.jsonl, ,b.jsonl,"),
            vec!["a.jsonl".to_string(), "b.jsonl".to_string()]
        );
        assert!(split_keys("").is_empty());
    }
}
