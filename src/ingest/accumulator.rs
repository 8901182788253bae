//! Batch accumulation and bounded dispatch to the bulk loader.

use crate::ingest::loader::{BatchSink, LoadError};
use crate::ingest::retry::{RetryPolicy, retry_with_backoff};
use crate::ingest::stats::BatchResult;
use crate::models::Product;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Immutable batch snapshot handed to one loader invocation.
pub type Batch = Arc<[Product]>;

/// Fixed-capacity buffer that cuts the parsed stream into batches of `capacity`.
///
/// The backing `Vec` is allocated once. Emitting a batch moves its rows into a new,
/// separately allocated [`Batch`] and leaves the buffer empty with its capacity intact.
pub struct BatchAccumulator {
    buf: Vec<Product>,
    capacity: usize,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append one product; returns the full batch when this push filled the buffer.
    pub fn push(&mut self, product: Product) -> Option<Batch> {
        self.buf.push(product);
        if self.buf.len() == self.capacity {
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// Whatever is left once input is exhausted, if anything.
    pub fn take_residual(&mut self) -> Option<Batch> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.snapshot())
        }
    }

    fn snapshot(&mut self) -> Batch {
        self.buf.drain(..).collect()
    }
}

/// Dispatch refused because the run has been cancelled.
#[derive(Debug, PartialEq, Eq)]
pub struct Cancelled;

/// Spawns loader invocations for full batches, at most `max_inflight` at a time.
///
/// Dispatch waits for a free slot, so a slow store throttles the accumulator and,
/// through the bounded queues, the readers.
pub struct BatchDispatcher<S: BatchSink> {
    sink: Arc<S>,
    slots: Arc<Semaphore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    inflight: JoinSet<Result<BatchResult, LoadError>>,
    results: Vec<BatchResult>,
    fatal: Option<LoadError>,
    dispatched: u64,
}

impl<S: BatchSink> BatchDispatcher<S> {
    pub fn new(
        sink: Arc<S>,
        max_inflight: usize,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            slots: Arc::new(Semaphore::new(max_inflight.max(1))),
            retry,
            cancel,
            inflight: JoinSet::new(),
            results: Vec::new(),
            fatal: None,
            dispatched: 0,
        }
    }

    /// Hand a full batch to a new background loader invocation.
    pub async fn dispatch(&mut self, batch: Batch) -> Result<(), Cancelled> {
        let permit = self.acquire_slot().await?;

        self.dispatched += 1;
        let label = format!("batch {}", self.dispatched);
        log::debug!("dispatching {} ({} rows)", label, batch.len());

        let sink = self.sink.clone();
        let retry = self.retry;
        let cancel = self.cancel.clone();
        self.inflight.spawn(async move {
            let outcome = load_batch(&*sink, &batch, &label, &retry, &cancel).await;
            drop(permit);
            outcome
        });

        self.reap_finished();
        Ok(())
    }

    /// Load the residual batch on the caller's task and wait for it.
    pub async fn dispatch_inline(&mut self, batch: Batch) -> Result<(), Cancelled> {
        let permit = self.acquire_slot().await?;

        self.dispatched += 1;
        let label = format!("batch {} (residual)", self.dispatched);
        log::debug!("loading {} ({} rows)", label, batch.len());

        let outcome = load_batch(&*self.sink, &batch, &label, &self.retry, &self.cancel).await;
        drop(permit);
        self.record(outcome);
        Ok(())
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            permit = self.slots.clone().acquire_owned() => permit.map_err(|_| Cancelled),
        }
    }

    /// Number of batches handed to the loader so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Final barrier: wait for every in-flight invocation.
    pub async fn finish(mut self) -> (Vec<BatchResult>, Option<LoadError>) {
        while let Some(joined) = self.inflight.join_next().await {
            self.record_joined(joined);
        }
        (self.results, self.fatal)
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.inflight.try_join_next() {
            self.record_joined(joined);
        }
    }

    fn record_joined(
        &mut self,
        joined: Result<Result<BatchResult, LoadError>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(outcome) => self.record(outcome),
            Err(e) => {
                log::error!("loader task panicked: {}", e);
                self.cancel.cancel();
                if self.fatal.is_none() {
                    self.fatal = Some(LoadError::Database(sqlx::Error::WorkerCrashed));
                }
            }
        }
    }

    fn record(&mut self, outcome: Result<BatchResult, LoadError>) {
        match outcome {
            Ok(result) => self.results.push(result),
            Err(e) => {
                if self.fatal.is_none() {
                    self.fatal = Some(e);
                }
            }
        }
    }
}

/// One loader invocation: retry transient failures, report-and-skip when the budget
/// runs out or the server rejects the rows themselves, and cancel the run on anything else.
async fn load_batch<S: BatchSink>(
    sink: &S,
    batch: &[Product],
    label: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<BatchResult, LoadError> {
    let rows = batch.len();
    match retry_with_backoff(label, retry, || sink.insert_batch(batch)).await {
        Ok(inserted) => Ok(BatchResult::Loaded { rows, inserted }),
        Err(e) if e.is_transient() => {
            log::warn!("{}: skipping {} rows after retries: {}", label, rows, e);
            Ok(BatchResult::Failed { rows })
        }
        Err(e) if e.is_data_rejection() => {
            log::warn!("{}: skipping {} rows rejected by the server: {}", label, rows, e);
            Ok(BatchResult::Failed { rows })
        }
        Err(e) => {
            log::error!("{}: {}", label, e);
            cancel.cancel();
            Err(e)
        }
    }
}
