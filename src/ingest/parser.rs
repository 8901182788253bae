//! Parser pool: N blocking workers decoding raw lines into [`Product`]s.

use crate::config::DecodePolicy;
use crate::ingest::error::PipelineError;
use crate::ingest::reader::RawRecord;
use crate::ingest::stats::{Counters, RejectedRecord};
use crate::models::Product;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Decode one line as a product.
///
/// Text containing NUL is rejected here: Postgres `TEXT` cannot store it, and the whole
/// batch would fail at insert time.
pub fn decode(record: &RawRecord) -> Result<Product, serde_json::Error> {
    let product: Product = serde_json::from_slice(&record.bytes)?;
    let text_fields = [
        ("title", &product.title),
        ("category", &product.category),
        ("brand", &product.brand),
        ("url", &product.url),
        ("description", &product.description),
    ];
    if let Some((field, _)) = text_fields.iter().find(|(_, value)| value.contains('\0')) {
        return Err(serde::de::Error::custom(format!(
            "field `{field}` contains a NUL character"
        )));
    }
    Ok(product)
}

/// Start `workers` parser threads sharing one input queue.
///
/// Workers take records in whatever order they win the receiver lock. Each worker owns
/// a clone of `parsed_tx`, so the parsed queue closes once the last worker returns.
pub fn spawn_workers(
    workers: usize,
    raw_rx: mpsc::Receiver<RawRecord>,
    parsed_tx: mpsc::Sender<Product>,
    policy: DecodePolicy,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) -> Vec<JoinHandle<Result<(), PipelineError>>> {
    let raw_rx = Arc::new(Mutex::new(raw_rx));

    (0..workers)
        .map(|worker_id| {
            let raw_rx = raw_rx.clone();
            let parsed_tx = parsed_tx.clone();
            let cancel = cancel.clone();
            let counters = counters.clone();
            tokio::task::spawn_blocking(move || {
                run_worker(worker_id, &raw_rx, &parsed_tx, policy, &cancel, &counters)
            })
        })
        .collect()
}

fn run_worker(
    worker_id: usize,
    raw_rx: &Mutex<mpsc::Receiver<RawRecord>>,
    parsed_tx: &mpsc::Sender<Product>,
    policy: DecodePolicy,
    cancel: &CancellationToken,
    counters: &Counters,
) -> Result<(), PipelineError> {
    let mut parsed = 0u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Hold the lock only for the hand-off of a single record.
        let next = raw_rx.lock().blocking_recv();
        let Some(record) = next else {
            break;
        };

        let product = match decode(&record) {
            Ok(product) => product,
            Err(source) => match policy {
                DecodePolicy::Skip => {
                    log::warn!(
                        "parser {}: skipping '{}' line {}: {}",
                        worker_id,
                        record.source,
                        record.line,
                        source
                    );
                    counters.record_reject(RejectedRecord {
                        source: record.source.to_string(),
                        line: record.line,
                        reason: source.to_string(),
                    });
                    continue;
                }
                DecodePolicy::Fail => {
                    let err = PipelineError::Decode {
                        key: record.source.to_string(),
                        line: record.line,
                        source,
                    };
                    log::error!("parser {}: {}", worker_id, err);
                    cancel.cancel();
                    return Err(err);
                }
            },
        };

        if parsed_tx.blocking_send(product).is_err() {
            // Accumulator is gone; nothing left to feed.
            break;
        }
        parsed += 1;
        counters.records_parsed.fetch_add(1, Ordering::Relaxed);
    }

    log::debug!("parser {}: finished after {} records", worker_id, parsed);
    Ok(())
}
