//! Pipeline coordinator: wires readers, the parser pool, the accumulator and the loader
//! together and owns the join barriers between them.

use crate::config::IngestConfig;
use crate::ingest::accumulator::{BatchAccumulator, BatchDispatcher};
use crate::ingest::error::PipelineError;
use crate::ingest::loader::BatchSink;
use crate::ingest::parser;
use crate::ingest::reader::{self, RawRecord, SourceReader};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::stats::{Counters, LoadSummary};
use crate::models::Product;
use crate::store::ObjectStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Streams JSONL objects into a [`BatchSink`].
///
/// ```text
/// readers ─▶ raw queue ─▶ parser pool ─▶ parsed queue ─▶ accumulator ─▶ loader tasks
/// ```
///
/// Both queues are bounded by `queue_capacity`, loader fan-out by
/// `max_inflight_batches`. The first fatal error cancels every stage; the run then
/// drains in-flight loads and returns that error.
pub struct IngestPipeline<S: BatchSink> {
    config: IngestConfig,
    sink: Arc<S>,
}

impl<S: BatchSink> IngestPipeline<S> {
    pub fn new(config: IngestConfig, sink: Arc<S>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Fetch every key from `store`, then load them all in one run.
    ///
    /// All objects are opened before any reading starts, so a missing key fails the
    /// run without touching the database.
    pub async fn run<O: ObjectStore>(
        &self,
        store: &O,
        keys: &[String],
    ) -> Result<LoadSummary, PipelineError> {
        let mut sources = Vec::with_capacity(keys.len());
        for key in keys {
            let body = store
                .fetch(key)
                .await
                .map_err(|source| PipelineError::Fetch {
                    key: key.clone(),
                    source,
                })?;
            sources.push((key.clone(), body));
        }
        self.run_sources(sources).await
    }

    /// Load already-open object bodies, one reader per body.
    pub async fn run_sources<R>(
        &self,
        sources: Vec<(String, R)>,
    ) -> Result<LoadSummary, PipelineError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let started_at = Utc::now();
        let clock = Instant::now();
        let objects = sources.len();

        log::info!(
            "ingest starting: {} objects, batch size {}, {} parser workers, {} in-flight batches",
            objects,
            self.config.batch_size,
            self.config.parser_workers,
            self.config.max_inflight_batches
        );

        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let (raw_tx, raw_rx) = mpsc::channel::<RawRecord>(self.config.queue_capacity);
        let (parsed_tx, mut parsed_rx) = mpsc::channel::<Product>(self.config.queue_capacity);

        let readers: Vec<_> = sources
            .into_iter()
            .map(|(key, body)| {
                let reader = SourceReader::new(key, body, self.config.max_line_bytes);
                tokio::spawn(reader::pump(
                    reader,
                    raw_tx.clone(),
                    cancel.clone(),
                    counters.clone(),
                ))
            })
            .collect();
        // Readers hold the only senders now: the raw queue closes when the last one ends.
        drop(raw_tx);
        let readers_done = tokio::spawn(join_stage("reader", readers, cancel.clone()));

        let parsers = parser::spawn_workers(
            self.config.parser_workers,
            raw_rx,
            parsed_tx,
            self.config.decode_policy,
            cancel.clone(),
            counters.clone(),
        );
        let parsers_done = tokio::spawn(join_stage("parser", parsers, cancel.clone()));

        let mut accumulator = BatchAccumulator::new(self.config.batch_size);
        let mut dispatcher = BatchDispatcher::new(
            self.sink.clone(),
            self.config.max_inflight_batches,
            RetryPolicy {
                max_retries: self.config.max_retries,
                base: self.config.retry_base,
            },
            cancel.clone(),
        );

        loop {
            let product = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = parsed_rx.recv() => match next {
                    Some(product) => product,
                    None => break,
                },
            };

            if let Some(batch) = accumulator.push(product) {
                if dispatcher.dispatch(batch).await.is_err() {
                    break;
                }
            }
        }
        // Unblocks any parser still waiting to hand over a record.
        drop(parsed_rx);

        let readers = settle(readers_done.await, "reader");
        let parsers = settle(parsers_done.await, "parser");
        let mut failure = readers.err().or(parsers.err());

        if failure.is_none() && !cancel.is_cancelled() {
            if let Some(residual) = accumulator.take_residual() {
                // A refusal here means a loader task cancelled the run; its error
                // surfaces from `finish` below.
                let _ = dispatcher.dispatch_inline(residual).await;
            }
        }

        let (results, load_failure) = dispatcher.finish().await;
        if failure.is_none() {
            failure = load_failure.map(PipelineError::from);
        }

        let mut summary = LoadSummary::new(objects, started_at);
        summary.absorb_counters(&counters);
        for result in results {
            summary.record_batch(result);
        }
        summary.finished_at = Utc::now();
        summary.elapsed = clock.elapsed();

        match failure {
            None => {
                log::info!("ingest complete: {}", summary);
                Ok(summary)
            }
            Some(err) => {
                log::error!("ingest aborted: {}; progress before abort: {}", err, summary);
                Err(err)
            }
        }
    }
}

/// Join barrier for one stage: wait for every worker, keep the first error.
async fn join_stage(
    stage: &'static str,
    handles: Vec<JoinHandle<Result<(), PipelineError>>>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let workers = handles.len();
    let mut first_error = None;

    for handle in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(PipelineError::Worker {
                stage,
                message: e.to_string(),
            }),
        };
        if let Err(e) = outcome {
            cancel.cancel();
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            log::debug!("{} stage: all {} workers finished", stage, workers);
            Ok(())
        }
    }
}

fn settle(
    joined: Result<Result<(), PipelineError>, tokio::task::JoinError>,
    stage: &'static str,
) -> Result<(), PipelineError> {
    joined.map_err(|e| PipelineError::Worker {
        stage,
        message: e.to_string(),
    })?
}
