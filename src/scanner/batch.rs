use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info, warn};

use crate::catalog::{CHUNK_SIZE, Catalog, PendingRecord};
use crate::metrics::{ErrorScope, Metrics};

/// Buffered records that trigger an immediate flush.
pub(crate) const FLUSH_THRESHOLD: usize = 500;
/// Wall-clock flush interval for a quiet buffer.
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Capacity of the worker→writer record channel.
pub(crate) const RECORD_QUEUE_CAPACITY: usize = 2_000;
/// Time allowed for the final flush once shutdown begins.
pub(crate) const SHUTDOWN_FLUSH_DEADLINE: Duration = Duration::from_secs(30);

/// Totals accumulated by the writer over one scan.
#[derive(Debug, Default, Clone)]
pub struct WriterStats {
    /// File rows inserted.
    pub inserted: usize,
    /// File rows rewritten.
    pub updated: usize,
    /// Records that failed even in single-record transactions.
    pub failed: usize,
    /// Records dropped because the shutdown deadline elapsed.
    pub dropped: usize,
}

/// Drain the record channel into the catalog until every sender is gone.
///
/// Flushes when the buffer reaches [`FLUSH_THRESHOLD`], when
/// [`FLUSH_INTERVAL`] passes with records waiting, and finally on channel
/// disconnect, the last bounded by [`SHUTDOWN_FLUSH_DEADLINE`]. Runs on its
/// own thread; the catalog handle is the scan's single writing session.
pub(crate) fn run_writer(
    catalog: &Catalog,
    records: Receiver<PendingRecord>,
    metrics: &Metrics,
) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut buffer: Vec<PendingRecord> = Vec::with_capacity(FLUSH_THRESHOLD);
    let mut last_flush = Instant::now();

    loop {
        match records.recv_timeout(Duration::from_millis(200)) {
            Ok(record) => {
                buffer.push(record);
                if buffer.len() >= FLUSH_THRESHOLD {
                    flush(catalog, &mut buffer, metrics, &mut stats);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() && last_flush.elapsed() >= FLUSH_INTERVAL {
                    flush(catalog, &mut buffer, metrics, &mut stats);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    final_flush(catalog, &mut buffer, metrics, &mut stats);
    stats
}

fn flush(
    catalog: &Catalog,
    buffer: &mut Vec<PendingRecord>,
    metrics: &Metrics,
    stats: &mut WriterStats,
) {
    if buffer.is_empty() {
        return;
    }
    let batch: Vec<PendingRecord> = buffer.drain(..).collect();
    let started = Instant::now();
    match catalog.upsert_batch(&batch) {
        Ok(outcome) => {
            metrics.observe_db_flush(started.elapsed(), batch.len());
            metrics.inc_db_writes((outcome.inserted + outcome.updated) as u64);
            if !outcome.failed_paths.is_empty() {
                metrics.add_errors(ErrorScope::DbFlush, outcome.failed_paths.len() as u64);
                warn!(
                    "Flush quarantined {} records: {:?}",
                    outcome.failed_paths.len(),
                    outcome.failed_paths
                );
            }
            info!(
                "Flushed {} records ({} inserted, {} updated)",
                batch.len(),
                outcome.inserted,
                outcome.updated
            );
            stats.inserted += outcome.inserted;
            stats.updated += outcome.updated;
            stats.failed += outcome.failed_paths.len();
        }
        Err(err) => {
            metrics.add_errors(ErrorScope::DbFlush, batch.len() as u64);
            stats.failed += batch.len();
            error!("Flush of {} records failed: {err}", batch.len());
        }
    }
}

/// Flush remaining records on shutdown, one chunk at a time, dropping
/// whatever is still buffered when the deadline elapses.
fn final_flush(
    catalog: &Catalog,
    buffer: &mut Vec<PendingRecord>,
    metrics: &Metrics,
    stats: &mut WriterStats,
) {
    if buffer.is_empty() {
        return;
    }
    let deadline = Instant::now() + SHUTDOWN_FLUSH_DEADLINE;
    while !buffer.is_empty() {
        if Instant::now() >= deadline {
            let dropped = buffer.len();
            buffer.clear();
            stats.dropped += dropped;
            metrics.add_errors(ErrorScope::DbFlush, dropped as u64);
            error!("Shutdown flush deadline elapsed; dropped {dropped} buffered records");
            return;
        }
        let take = buffer.len().min(CHUNK_SIZE);
        let mut chunk: Vec<PendingRecord> = buffer.drain(..take).collect();
        flush(catalog, &mut chunk, metrics, stats);
    }
}
