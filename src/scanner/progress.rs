use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::metrics::Metrics;

/// Refresh period of the status line (10 Hz ceiling).
const REFRESH_PERIOD: Duration = Duration::from_millis(100);

/// Shared counters behind the status line. Producers bump them with relaxed
/// atomics; only the display thread reads them.
#[derive(Debug, Default)]
pub(crate) struct ProgressCounters {
    /// Paths emitted by the walker.
    pub discovered: AtomicU64,
    /// Paths fully handled by a worker.
    pub processed: AtomicU64,
    /// Paths released without hashing.
    pub skipped: AtomicU64,
}

/// Drive the single-line status display and the queue gauge until stopped.
///
/// The line is written to stderr only when stderr is a terminal; the queue
/// gauge is refreshed either way.
pub(crate) fn run_display<T>(
    counters: &ProgressCounters,
    queue: &Receiver<T>,
    metrics: &Metrics,
    stop: &AtomicBool,
) {
    let tty = stderr_is_tty();
    let mut last_line_len = 0usize;
    while !stop.load(Ordering::Relaxed) {
        metrics.set_queue_pending(queue.len() as u64);
        if tty {
            last_line_len = draw(counters, last_line_len);
        }
        std::thread::sleep(REFRESH_PERIOD);
    }
    metrics.set_queue_pending(0);
    if tty {
        draw(counters, last_line_len);
        eprintln!();
    }
}

fn draw(counters: &ProgressCounters, last_line_len: usize) -> usize {
    let discovered = counters.discovered.load(Ordering::Relaxed);
    let processed = counters.processed.load(Ordering::Relaxed);
    let skipped = counters.skipped.load(Ordering::Relaxed);
    let line =
        format!("Scanning: {processed}/{discovered} files processed, {skipped} unchanged");
    // Pad over the previous line so a shrinking line leaves no tail.
    let padding = last_line_len.saturating_sub(line.len());
    eprint!("\r{line}{}", " ".repeat(padding));
    line.len()
}

#[cfg(unix)]
fn stderr_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDERR_FILENO) == 1 }
}

#[cfg(not(unix))]
fn stderr_is_tty() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn display_stops_and_zeroes_the_queue_gauge() {
        let counters = ProgressCounters::default();
        counters.discovered.store(10, Ordering::Relaxed);
        counters.processed.store(4, Ordering::Relaxed);
        let (tx, rx) = bounded::<u32>(8);
        tx.send(1).unwrap();
        let metrics = Metrics::new("progress-test");
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let display = scope.spawn(|| run_display(&counters, &rx, &metrics, &stop));
            std::thread::sleep(Duration::from_millis(250));
            assert!(
                metrics
                    .render()
                    .contains("queue_files_pending{machine=\"progress-test\"} 1")
            );
            stop.store(true, Ordering::Relaxed);
            display.join().unwrap();
        });
        assert!(
            metrics
                .render()
                .contains("queue_files_pending{machine=\"progress-test\"} 0")
        );
    }
}
