use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_stream::{self as stream};
use tracing::{debug, info, warn};

use crate::error::{FailedChunk, PartialWriteError};
use crate::store::WideColumnStore;
use crate::table::types::{Chunk, Item, RetryPolicy};
use crate::{Error, schema::TableSchema};

/// Default number of items per chunk
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default number of chunks written at the same time
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Parameters of a bulk write
#[derive(Clone, Debug)]
pub struct BulkPutOptions {
    /// Items per chunk
    pub batch_size: usize,
    /// Maximum chunks in flight
    pub max_concurrency: usize,
    /// Retry of throttled or unprocessed writes
    pub retry: RetryPolicy,
    /// No chunk is dispatched after this instant
    pub deadline: Option<Instant>,
}

impl Default for BulkPutOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

impl BulkPutOptions {
    /// Options with the given chunk size and concurrency
    pub fn new(batch_size: usize, max_concurrency: usize) -> Self {
        Self {
            batch_size,
            max_concurrency,
            ..Self::default()
        }
    }

    /// Replaces the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stops dispatching chunks once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stops dispatching chunks once `timeout` has elapsed from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be positive".into()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidArgument(
                "max_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Summary of one fully written chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Position of the chunk
    pub index: usize,
    /// Items written
    pub items: usize,
    /// Retries needed
    pub retries: usize,
}

/// Bulk write output containing per-chunk tracking and timing
#[must_use = "bulk write results carry the chunk summaries and metrics"]
#[derive(Clone, Debug, Default)]
pub struct BulkPutOutput {
    /// Written chunks, ordered by index
    pub chunks: Vec<ChunkSummary>,
    /// Total execution time including all retries
    pub total_duration: Duration,
}

impl BulkPutOutput {
    /// Number of chunks attempted
    pub fn chunks_attempted(&self) -> usize {
        self.chunks.len()
    }

    /// Number of items written
    pub fn items_written(&self) -> usize {
        self.chunks.iter().map(|c| c.items).sum()
    }

    /// Number of retry attempts across every chunk
    pub fn retry_count(&self) -> usize {
        self.chunks.iter().map(|c| c.retries).sum()
    }
}

enum ChunkOutcome {
    Written(ChunkSummary),
    Failed(FailedChunk),
    Undispatched(Chunk),
}

/// Buffering writer for one chunk
///
/// Items are buffered and flushed whenever the buffer reaches the store's
/// per-request cap. Unprocessed items and throttled requests are retried
/// with backoff until the retry policy gives up.
pub(crate) struct BufferedWriter<'a, S> {
    store: &'a S,
    table: &'a str,
    retry: &'a RetryPolicy,
    buffer: Vec<Item>,
    capacity: usize,
    written: usize,
    retries: usize,
}

impl<'a, S: WideColumnStore> BufferedWriter<'a, S> {
    pub(crate) fn new(store: &'a S, table: &'a str, retry: &'a RetryPolicy) -> Self {
        let capacity = store.max_batch_write_items().max(1);
        Self {
            store,
            table,
            retry,
            buffer: Vec::with_capacity(capacity),
            capacity,
            written: 0,
            retries: 0,
        }
    }

    pub(crate) async fn put(&mut self, item: Item) -> Result<(), Error> {
        self.buffer.push(item);
        if self.buffer.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flushes the remaining buffer; returns `(items written, retries)`
    pub(crate) async fn close(mut self) -> Result<(usize, usize), Error> {
        self.flush().await?;
        Ok((self.written, self.retries))
    }

    async fn flush(&mut self) -> Result<(), Error> {
        let mut pending = std::mem::take(&mut self.buffer);
        let mut attempt = 0;

        while !pending.is_empty() {
            match self.store.batch_write_item(self.table, &pending).await {
                Ok(unprocessed) => {
                    self.written += pending.len().saturating_sub(unprocessed.len());
                    pending = unprocessed;
                    if pending.is_empty() {
                        break;
                    }
                    if attempt >= self.retry.max_retries {
                        return Err(Error::throttling(
                            "BatchWriteItem",
                            format!(
                                "{} items left unprocessed after {} retries",
                                pending.len(),
                                attempt
                            ),
                        ));
                    }
                    debug!(unprocessed = pending.len(), attempt, "retrying unprocessed items");
                }
                Err(e) if self.retry.should_retry(&e) && attempt < self.retry.max_retries => {
                    warn!(error = %e, attempt, "batch write throttled, backing off");
                }
                Err(e) => return Err(e),
            }

            sleep(self.retry.delay(attempt)).await;
            attempt += 1;
            self.retries += 1;
        }

        Ok(())
    }
}

/// Writes one chunk through a buffering writer
pub(crate) async fn write_chunk<S: WideColumnStore>(
    store: &S,
    table: &str,
    chunk: &Chunk,
    retry: &RetryPolicy,
) -> Result<ChunkSummary, Error> {
    let mut writer = BufferedWriter::new(store, table, retry);
    for item in chunk.items() {
        writer.put(item.clone()).await?;
    }
    let (items, retries) = writer.close().await?;

    info!(table, chunk = chunk.index(), items, retries, "batch loaded chunk");
    Ok(ChunkSummary {
        index: chunk.index(),
        items,
        retries,
    })
}

/// Checks that every item carries the table's key attributes
pub(crate) fn check_items(schema: &TableSchema, items: &[Item]) -> Result<(), Error> {
    items
        .iter()
        .enumerate()
        .try_for_each(|(index, item)| check_item(schema, item).map_err(|reason| Error::InvalidItem { index, reason }))
}

pub(crate) fn check_item(schema: &TableSchema, item: &Item) -> Result<(), String> {
    for key in &schema.key_schema {
        let value = item
            .get(&key.attribute_name)
            .ok_or_else(|| format!("missing key attribute '{}'", key.attribute_name))?;
        if let Some(expected) = schema.attribute_type(&key.attribute_name) {
            if !expected.matches(value) {
                return Err(format!(
                    "key attribute '{}' is not of type {:?}",
                    key.attribute_name, expected
                ));
            }
        }
    }
    Ok(())
}

/// Writes items in concurrently processed chunks
///
/// Items are split into contiguous chunks of `options.batch_size`; at most
/// `options.max_concurrency` chunks are written at the same time. A chunk
/// that exhausts its retries fails on its own; sibling chunks carry on.
///
/// # Returns
///
/// `Ok` when every chunk was written. Otherwise [`Error::PartialWrite`]
/// carrying the failed chunks, and the chunks left undispatched when the
/// deadline elapsed, for re-submission.
pub async fn bulk_put<S: WideColumnStore>(
    store: &S,
    table: &str,
    items: Vec<Item>,
    options: &BulkPutOptions,
) -> Result<BulkPutOutput, Error> {
    options.validate()?;

    let start_time = Instant::now();
    let chunks = Chunk::partition(items, options.batch_size);
    let total = chunks.len();
    let deadline = options.deadline;
    let retry = &options.retry;

    debug!(table, chunks = total, concurrency = options.max_concurrency, "starting bulk put");

    let outcomes: Vec<ChunkOutcome> = stream::iter(chunks.into_iter().map(|chunk| async move {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return ChunkOutcome::Undispatched(chunk);
        }
        match write_chunk(store, table, &chunk, retry).await {
            Ok(summary) => ChunkOutcome::Written(summary),
            Err(error) => {
                warn!(table, chunk = chunk.index(), error = %error, "chunk failed");
                ChunkOutcome::Failed(FailedChunk { chunk, error })
            }
        }
    }))
    .buffer_unordered(options.max_concurrency)
    .collect()
    .await;

    let mut output = BulkPutOutput::default();
    let mut partial = PartialWriteError::default();

    for outcome in outcomes {
        match outcome {
            ChunkOutcome::Written(summary) => output.chunks.push(summary),
            ChunkOutcome::Failed(failed) => partial.failed_chunks.push(failed),
            ChunkOutcome::Undispatched(chunk) => partial.undispatched_chunks.push(chunk),
        }
    }

    output.chunks.sort_by_key(|c| c.index);
    output.total_duration = start_time.elapsed();

    if partial.unwritten_chunk_count() > 0 {
        partial.succeeded_chunks = output.chunks.len();
        partial.failed_chunks.sort_by_key(|f| f.chunk.index());
        partial.undispatched_chunks.sort_by_key(Chunk::index);
        warn!(table, %partial, "bulk put incomplete");
        return Err(partial.into());
    }

    info!(
        table,
        chunks = total,
        items = output.items_written(),
        elapsed_ms = output.total_duration.as_millis() as u64,
        "bulk put complete"
    );
    Ok(output)
}
