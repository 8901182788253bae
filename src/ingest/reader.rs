//! Source reader: one object body in, owned line records out.

use crate::ingest::error::PipelineError;
use crate::ingest::stats::Counters;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const READ_BUF_CAPACITY: usize = 256 * 1024;
const LINE_BUF_CAPACITY: usize = 4096;

/// One undelimited input line plus where it came from.
///
/// `bytes` is always a fresh allocation owned by the record; it never aliases the
/// reader's scan buffer, so records can be queued and retained indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub source: Arc<str>,
    /// 1-based line number within `source`.
    pub line: u64,
    pub bytes: Vec<u8>,
}

/// Lazy, non-restartable line scanner over a single object.
///
/// Internally one scan buffer is reused for every line. Each emitted [`RawRecord`]
/// receives its own copy of the line (copy-on-emit); callers never observe the scan
/// buffer. Trailing `\r` is dropped and whitespace-only lines are skipped.
pub struct SourceReader<R> {
    key: Arc<str>,
    inner: BufReader<R>,
    scan: Vec<u8>,
    line: u64,
    blank_lines: u64,
    max_line_bytes: usize,
}

impl<R: AsyncRead + Unpin> SourceReader<R> {
    pub fn new(key: impl Into<Arc<str>>, body: R, max_line_bytes: usize) -> Self {
        Self {
            key: key.into(),
            inner: BufReader::with_capacity(READ_BUF_CAPACITY, body),
            scan: Vec::with_capacity(LINE_BUF_CAPACITY),
            line: 0,
            blank_lines: 0,
            max_line_bytes,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    pub fn blank_lines(&self) -> u64 {
        self.blank_lines
    }

    /// Next non-blank line, or `None` at end of stream.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, PipelineError> {
        loop {
            self.scan.clear();

            // Room for the line terminator; anything past that is over the limit.
            let limit = self.max_line_bytes as u64 + 2;
            let n = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.scan)
                .await
                .map_err(|source| PipelineError::Read {
                    key: self.key.to_string(),
                    line: self.line,
                    source,
                })?;
            if n == 0 {
                return Ok(None);
            }
            self.line += 1;

            let content = trim_line_end(&self.scan);
            if content.len() > self.max_line_bytes {
                return Err(PipelineError::LineTooLong {
                    key: self.key.to_string(),
                    line: self.line,
                    limit: self.max_line_bytes,
                });
            }
            if content.iter().all(u8::is_ascii_whitespace) {
                self.blank_lines += 1;
                continue;
            }

            return Ok(Some(RawRecord {
                source: self.key.clone(),
                line: self.line,
                bytes: content.to_vec(),
            }));
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Drive one reader to completion, pushing every record onto the raw queue.
///
/// Returns early (successfully) when the run is cancelled or the queue's consumers are
/// gone; whichever stage caused that reports its own error.
pub async fn pump<R: AsyncRead + Unpin>(
    mut reader: SourceReader<R>,
    raw_tx: mpsc::Sender<RawRecord>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) -> Result<(), PipelineError> {
    let mut last_seen = (0u64, 0u64);
    let result = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = reader.next_record() => next,
        };

        let record = match next {
            Ok(Some(record)) => record,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => false,
            sent = raw_tx.send(record) => sent.is_ok(),
        };
        if !sent {
            break Ok(());
        }

        // Keep shared counters roughly current without touching them per line.
        if reader.lines_read() - last_seen.0 >= 10_000 {
            flush_counts(&reader, &mut last_seen, &counters);
        }
    };

    flush_counts(&reader, &mut last_seen, &counters);
    match &result {
        Ok(()) => log::info!(
            "reader '{}': finished after {} lines",
            reader.key(),
            reader.lines_read()
        ),
        Err(e) => {
            log::error!("reader '{}': {}", reader.key(), e);
            cancel.cancel();
        }
    }
    result
}

fn flush_counts<R>(reader: &SourceReader<R>, last_seen: &mut (u64, u64), counters: &Counters) {
    counters
        .lines_read
        .fetch_add(reader.line - last_seen.0, Ordering::Relaxed);
    counters
        .blank_lines
        .fetch_add(reader.blank_lines - last_seen.1, Ordering::Relaxed);
    *last_seen = (reader.line, reader.blank_lines);
}
