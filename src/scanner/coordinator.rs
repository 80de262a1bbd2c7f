use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, Operation, PendingRecord};
use crate::config::Settings;
use crate::metrics::{ErrorScope, Metrics};

use super::ScanError;
use super::archive::{self, ArchiveEntry, ArchiveError, ArchiveKind, EntryFlow};
use super::batch::{self, RECORD_QUEUE_CAPACITY, WriterStats};
use super::decide::{Decision, decide};
use super::hash;
use super::ignore::IgnoreRules;
use super::progress::{self, ProgressCounters};
use super::walk;

/// Capacity of the walker→worker path queue.
pub(crate) const PATH_QUEUE_CAPACITY: usize = 10_000;
/// Worker pool ceiling; hashing saturates well before this on most disks.
const MAX_WORKERS: usize = 8;

type WorkItem = (PathBuf, fs::Metadata);

/// Inputs for one scan run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory tree to index.
    pub root: PathBuf,
    /// Machine label stored in every written record.
    pub machine: String,
    /// Catalog database location.
    pub db_path: PathBuf,
    /// Scan tunables (archives, size gates, ignore rules).
    pub settings: Settings,
    /// Worker thread override; `None` picks min(CPU count, 8).
    pub worker_count: Option<usize>,
}

/// Summary of a scan run.
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    /// Paths emitted by the walker.
    pub discovered: u64,
    /// Paths fully handled by a worker.
    pub processed: u64,
    /// Paths released unchanged, without hashing.
    pub skipped: u64,
    /// File rows inserted.
    pub inserted: usize,
    /// File rows rewritten.
    pub updated: usize,
    /// Records that failed to persist.
    pub failed: usize,
    /// Records dropped at the shutdown deadline.
    pub dropped: usize,
}

/// Result of a scan that ran to completion or clean interruption.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Counters for the run.
    pub stats: ScanStats,
    /// True when an interrupt ended the scan early.
    pub interrupted: bool,
}

/// Run one scan: walk the root, decide per file, hash what changed, and
/// persist in batches.
///
/// Thread layout: the walker runs on the calling thread, N workers hash and
/// submit records, one writer owns the catalog's writing session, and one
/// display thread drives the status line. All queues are bounded, so memory
/// stays flat and the walker backpressures naturally. An interrupt (the
/// `cancel` flag) stops path intake, lets in-flight hashes finish, and ends
/// with a deadline-bounded final flush.
pub fn run_scan(
    options: &ScanOptions,
    metrics: &Metrics,
    cancel: &AtomicBool,
) -> Result<ScanOutcome, ScanError> {
    let root = options
        .root
        .canonicalize()
        .map_err(|source| ScanError::Io {
            path: options.root.clone(),
            source,
        })?;
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot(root));
    }
    let rules = if options.settings.enable_ignore_rules {
        let rules = IgnoreRules::load(&root);
        info!("Loaded {} ignore rules from scan root", rules.len());
        rules
    } else {
        IgnoreRules::empty()
    };
    let scanned_ns = now_epoch_ns();
    let scan_started = Instant::now();
    let worker_count = options
        .worker_count
        .unwrap_or_else(default_worker_count)
        .max(1);

    // Sessions are opened up front so an unopenable catalog fails the run
    // before any thread starts.
    let writer_catalog = Catalog::open(&options.db_path)?;
    let mut worker_catalogs = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        worker_catalogs.push(Catalog::open(&options.db_path)?);
    }

    let (path_tx, path_rx) = bounded::<WorkItem>(PATH_QUEUE_CAPACITY);
    let (record_tx, record_rx) = bounded::<PendingRecord>(RECORD_QUEUE_CAPACITY);

    let counters = ProgressCounters::default();
    let stop_display = AtomicBool::new(false);

    metrics.set_scan_in_progress(true);
    metrics.set_workers_running(worker_count as u64);
    info!(
        "Scanning {} with {worker_count} workers into {}",
        root.display(),
        options.db_path.display()
    );

    let scan_result: Result<(WriterStats, Result<(), ScanError>), ScanError> =
        thread::scope(|scope| {
            let writer = thread::Builder::new()
                .name("findex-writer".into())
                .spawn_scoped(scope, move || {
                    batch::run_writer(&writer_catalog, record_rx, metrics)
                })
                .map_err(|err| ScanError::Pipeline(format!("failed to spawn writer: {err}")))?;

            let mut workers = Vec::with_capacity(worker_count);
            for (index, catalog) in worker_catalogs.into_iter().enumerate() {
                let context = WorkerContext {
                    catalog,
                    paths: path_rx.clone(),
                    records: record_tx.clone(),
                    machine: &options.machine,
                    settings: &options.settings,
                    scanned_ns,
                    metrics,
                    counters: &counters,
                    cancel,
                };
                let handle = thread::Builder::new()
                    .name(format!("findex-worker-{index}"))
                    .spawn_scoped(scope, move || context.run())
                    .map_err(|err| {
                        ScanError::Pipeline(format!("failed to spawn worker: {err}"))
                    })?;
                workers.push(handle);
            }
            drop(record_tx);

            let display_queue = path_rx.clone();
            drop(path_rx);
            let counters_ref = &counters;
            let stop_display_ref = &stop_display;
            let display = thread::Builder::new()
                .name("findex-progress".into())
                .spawn_scoped(scope, move || {
                    progress::run_display(counters_ref, &display_queue, metrics, stop_display_ref)
                })
                .map_err(|err| ScanError::Pipeline(format!("failed to spawn display: {err}")))?;

            let walk_result = walk::walk_files(&root, &rules, cancel, metrics, &mut |path,
                                                                                     meta| {
                counters.discovered.fetch_add(1, Ordering::Relaxed);
                enqueue_path(&path_tx, (path, meta), cancel)
            });
            drop(path_tx);

            for worker in workers {
                worker
                    .join()
                    .map_err(|_| ScanError::Pipeline("worker thread panicked".into()))?;
            }
            let writer_stats = writer
                .join()
                .map_err(|_| ScanError::Pipeline("writer thread panicked".into()))?;
            stop_display.store(true, Ordering::Relaxed);
            display
                .join()
                .map_err(|_| ScanError::Pipeline("display thread panicked".into()))?;
            Ok((writer_stats, walk_result))
        });

    metrics.set_workers_running(0);
    metrics.set_queue_pending(0);
    metrics.set_scan_in_progress(false);
    metrics.observe_scan_duration(scan_started.elapsed());

    let (writer_stats, walk_result) = scan_result?;
    match walk_result {
        Ok(()) | Err(ScanError::Canceled) => {}
        Err(err) => return Err(err),
    }

    let stats = ScanStats {
        discovered: counters.discovered.load(Ordering::Relaxed),
        processed: counters.processed.load(Ordering::Relaxed),
        skipped: counters.skipped.load(Ordering::Relaxed),
        inserted: writer_stats.inserted,
        updated: writer_stats.updated,
        failed: writer_stats.failed,
        dropped: writer_stats.dropped,
    };
    let interrupted = cancel.load(Ordering::Relaxed);
    info!(
        "Scan {}: {} discovered, {} processed, {} unchanged, {} inserted, {} updated, \
         {} failed, {} dropped",
        if interrupted { "interrupted" } else { "finished" },
        stats.discovered,
        stats.processed,
        stats.skipped,
        stats.inserted,
        stats.updated,
        stats.failed,
        stats.dropped,
    );
    Ok(ScanOutcome { stats, interrupted })
}

/// Push one item into the bounded path queue, re-checking the cancel flag
/// while the queue backpressures so an interrupt can't strand the walker in
/// a blocking send.
fn enqueue_path(
    path_tx: &Sender<WorkItem>,
    mut item: WorkItem,
    cancel: &AtomicBool,
) -> Result<(), ScanError> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(ScanError::Canceled);
        }
        match path_tx.send_timeout(item, std::time::Duration::from_millis(100)) {
            Ok(()) => return Ok(()),
            Err(crossbeam_channel::SendTimeoutError::Timeout(returned)) => item = returned,
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                return Err(ScanError::Pipeline("path queue closed".into()));
            }
        }
    }
}

fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

/// Everything one worker thread needs: its own catalog session, the two
/// queue ends, and the shared run parameters.
struct WorkerContext<'scan> {
    catalog: Catalog,
    paths: Receiver<WorkItem>,
    records: Sender<PendingRecord>,
    machine: &'scan str,
    settings: &'scan Settings,
    scanned_ns: i64,
    metrics: &'scan Metrics,
    counters: &'scan ProgressCounters,
    cancel: &'scan AtomicBool,
}

impl WorkerContext<'_> {
    fn run(self) {
        while let Ok((path, metadata)) = self.paths.recv() {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            self.process_file(&path, &metadata);
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn process_file(&self, path: &Path, metadata: &fs::Metadata) {
        self.metrics.inc_files(1);
        let started = Instant::now();
        let size = metadata.len();
        let modified_ns = metadata
            .modified()
            .map(system_time_ns)
            .unwrap_or_default();
        let created_ns = metadata
            .created()
            .map(system_time_ns)
            .unwrap_or(modified_ns);
        let path_str = path.to_string_lossy().into_owned();

        let prior = match self.catalog.lookup_by_path(&path_str) {
            Ok(prior) => prior,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Prior-record lookup failed");
                self.metrics.inc_errors(ErrorScope::Worker);
                None
            }
        };
        let operation = match decide(size, modified_ns, prior.as_ref()) {
            Decision::Skip => {
                debug!(path = %path.display(), "Skipping unchanged file");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Decision::Add => Operation::Add,
            Decision::Mod => Operation::Mod,
        };

        let digests = match hash::digest_file(path) {
            Ok(digests) => digests,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to hash file");
                self.metrics.inc_errors(ErrorScope::ScanFile);
                return;
            }
        };
        self.metrics.inc_bytes_hashed(digests.size);
        self.metrics.observe_file_duration(started.elapsed());

        let record = PendingRecord {
            name: file_basename(path),
            path: path_str,
            machine: self.machine.to_string(),
            created_ns,
            modified_ns,
            scanned_ns: self.scanned_ns,
            operation,
            is_archived: false,
            archive_path: None,
            size: digests.size,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
        };
        if self.records.send(record).is_err() {
            error!("Record queue closed; writer is gone");
            self.metrics.inc_errors(ErrorScope::Worker);
            return;
        }

        if self.settings.scan_archives
            && let Some(kind) = ArchiveKind::detect(path)
        {
            self.scan_archive(path, kind, size);
        }
    }

    fn scan_archive(&self, path: &Path, kind: ArchiveKind, archive_size: u64) {
        if archive_size > self.settings.max_archive_size {
            debug!(
                archive = %path.display(),
                size = archive_size,
                "Skipping archive over the size gate"
            );
            self.metrics.inc_errors(ErrorScope::ArchiveSkip);
            return;
        }
        info!(archive = %path.display(), "Scanning archive");
        let archive_path_str = path.to_string_lossy().into_owned();

        let result = archive::visit_archive(path, kind, &mut |entry, stream| {
            if self.cancel.load(Ordering::Relaxed) {
                return EntryFlow::Stop;
            }
            self.process_archive_entry(path, kind, &archive_path_str, entry, stream)
        });
        match result {
            Ok(outcome) => {
                self.metrics.inc_archives(kind.label());
                if outcome.failed_entries > 0 {
                    self.metrics
                        .add_errors(ErrorScope::ArchiveRead, outcome.failed_entries as u64);
                }
            }
            Err(ArchiveError::Unsupported { reason, .. }) => {
                debug!(archive = %path.display(), %reason, "Archive skipped as unsupported");
                self.metrics.inc_errors(ErrorScope::ArchiveSkip);
            }
            Err(err @ ArchiveError::Open { .. }) => {
                warn!(archive = %path.display(), error = %err, "Failed to open archive");
                self.metrics.inc_errors(ErrorScope::ScanArchive);
            }
        }
    }

    fn process_archive_entry(
        &self,
        archive_file: &Path,
        kind: ArchiveKind,
        archive_path_str: &str,
        entry: &ArchiveEntry,
        stream: &mut dyn std::io::Read,
    ) -> EntryFlow {
        if entry.size > self.settings.max_archive_file_size {
            debug!(
                archive = %archive_file.display(),
                entry = %entry.internal_path,
                size = entry.size,
                "Skipping archived entry over the size gate"
            );
            self.metrics.inc_errors(ErrorScope::ArchiveSkip);
            return EntryFlow::Continue;
        }

        let virtual_path = archive::virtual_path(archive_file, &entry.internal_path);
        let prior = match self.catalog.lookup_by_path(&virtual_path) {
            Ok(prior) => prior,
            Err(err) => {
                warn!(path = %virtual_path, error = %err, "Prior-record lookup failed");
                self.metrics.inc_errors(ErrorScope::Worker);
                None
            }
        };
        let operation = match decide(entry.size, entry.modified_ns, prior.as_ref()) {
            Decision::Skip => {
                debug!(path = %virtual_path, "Skipping unchanged archived entry");
                return EntryFlow::Continue;
            }
            Decision::Add => Operation::Add,
            Decision::Mod => Operation::Mod,
        };

        let digests = match hash::digest_stream(stream, Some(entry.size)) {
            Ok(digests) => digests,
            Err(err) => {
                warn!(path = %virtual_path, error = %err, "Failed to hash archived entry");
                return EntryFlow::Failed;
            }
        };
        self.metrics.inc_archive_entries(kind.label());
        self.metrics.inc_bytes_hashed(digests.size);

        let record = PendingRecord {
            name: internal_basename(&entry.internal_path),
            path: virtual_path,
            machine: self.machine.to_string(),
            created_ns: entry.modified_ns,
            modified_ns: entry.modified_ns,
            scanned_ns: self.scanned_ns,
            operation,
            is_archived: true,
            archive_path: Some(archive_path_str.to_string()),
            size: digests.size,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
        };
        if self.records.send(record).is_err() {
            error!("Record queue closed; writer is gone");
            self.metrics.inc_errors(ErrorScope::Worker);
            return EntryFlow::Stop;
        }
        EntryFlow::Continue
    }
}

fn file_basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn internal_basename(internal_path: &str) -> String {
    internal_path
        .rsplit('/')
        .next()
        .unwrap_or(internal_path)
        .to_string()
}

fn system_time_ns(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or_default()
}

fn now_epoch_ns() -> i64 {
    system_time_ns(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::io::Write;
    use tempfile::tempdir;

    fn options(root: &Path, db_path: &Path) -> ScanOptions {
        ScanOptions {
            root: root.to_path_buf(),
            machine: "test-machine".to_string(),
            db_path: db_path.to_path_buf(),
            settings: Settings::default(),
            worker_count: Some(2),
        }
    }

    fn scan(options: &ScanOptions) -> ScanOutcome {
        let metrics = Metrics::disabled();
        let cancel = AtomicBool::new(false);
        run_scan(options, &metrics, &cancel).unwrap()
    }

    #[test]
    fn empty_root_writes_no_rows() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let db_path = dir.path().join("indexer.db");

        let metrics = Metrics::new("empty-test");
        let cancel = AtomicBool::new(false);
        let outcome = run_scan(&options(&root, &db_path), &metrics, &cancel).unwrap();

        assert!(!outcome.interrupted);
        assert_eq!(outcome.stats.discovered, 0);
        assert_eq!(outcome.stats.inserted, 0);
        let catalog = Catalog::open(&db_path).unwrap();
        let stats = catalog.statistics().unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_hashes, 0);
        let text = metrics.render();
        assert!(text.contains("directories_scanned_total{machine=\"empty-test\"} 1"));
        assert!(text.contains("scan_in_progress{machine=\"empty-test\"} 0"));
        assert!(text.contains("scan_duration_seconds_count{machine=\"empty-test\"} 1"));
    }

    #[test]
    fn identical_files_share_one_hash_row() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let payload = vec![0x5au8; 1024];
        std::fs::write(root.join("a.bin"), &payload).unwrap();
        std::fs::write(root.join("b.bin"), &payload).unwrap();
        let db_path = dir.path().join("indexer.db");

        let outcome = scan(&options(&root, &db_path));
        assert_eq!(outcome.stats.inserted, 2);

        let catalog = Catalog::open(&db_path).unwrap();
        let stats = catalog.statistics().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_hashes, 1);
        assert_eq!(stats.unique_bytes, 1024);

        let groups = catalog.duplicates(2, 10).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paths.len(), 2);
        assert_eq!(groups[0].hash.size, 1024);
    }

    #[test]
    fn rescan_of_unchanged_corpus_skips_everything() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        for idx in 0..10 {
            std::fs::write(root.join(format!("file-{idx}.bin")), format!("payload-{idx}"))
                .unwrap();
        }
        let db_path = dir.path().join("indexer.db");

        let first = scan(&options(&root, &db_path));
        assert_eq!(first.stats.inserted, 10);
        assert_eq!(first.stats.skipped, 0);

        let second = scan(&options(&root, &db_path));
        assert_eq!(second.stats.discovered, 10);
        assert_eq!(second.stats.skipped, 10);
        assert_eq!(second.stats.inserted, 0);
        assert_eq!(second.stats.updated, 0);

        let catalog = Catalog::open(&db_path).unwrap();
        assert_eq!(catalog.statistics().unwrap().total_hashes, 10);
    }

    #[test]
    fn modified_file_is_rewritten_as_mod() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let target = root.join("volatile.bin");
        std::fs::write(&target, b"before").unwrap();
        let db_path = dir.path().join("indexer.db");

        scan(&options(&root, &db_path));
        // A different length guarantees the size predicate fires even when
        // the filesystem's mtime granularity is coarse.
        std::fs::write(&target, b"after-rewrite").unwrap();
        let second = scan(&options(&root, &db_path));
        assert_eq!(second.stats.updated, 1);
        assert_eq!(second.stats.inserted, 0);

        let catalog = Catalog::open(&db_path).unwrap();
        let (record, hash) = catalog
            .lookup_by_path(&target.canonicalize().unwrap().to_string_lossy())
            .unwrap()
            .unwrap();
        assert_eq!(record.operation, Operation::Mod);
        assert_eq!(hash.size, b"after-rewrite".len() as u64);
    }

    #[test]
    fn zip_entries_get_virtual_paths() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let zip_path = root.join("box.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let zip_options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, data) in [
                ("x.txt", b"alpha".as_slice()),
                ("dir/y.txt", b"beta".as_slice()),
                ("dir/z.bin", b"gamma".as_slice()),
            ] {
                writer.start_file(name, zip_options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        let db_path = dir.path().join("indexer.db");

        let outcome = scan(&options(&root, &db_path));
        // The container plus its three entries.
        assert_eq!(outcome.stats.inserted, 4);

        let catalog = Catalog::open(&db_path).unwrap();
        let archive_abs = zip_path.canonicalize().unwrap();
        for internal in ["x.txt", "dir/y.txt", "dir/z.bin"] {
            let virtual_path = format!("{}::{internal}", archive_abs.display());
            let (record, _) = catalog
                .lookup_by_path(&virtual_path)
                .unwrap()
                .unwrap_or_else(|| panic!("missing record for {virtual_path}"));
            assert!(record.is_archived);
            assert_eq!(
                record.archive_path.as_deref(),
                Some(archive_abs.to_string_lossy().as_ref())
            );
        }
    }

    #[test]
    fn archive_over_size_gate_is_not_opened() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let zip_path = root.join("big.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("inner.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"payload").unwrap();
            writer.finish().unwrap();
        }
        let db_path = dir.path().join("indexer.db");

        let mut opts = options(&root, &db_path);
        // One byte below the on-disk size: the container is indexed, its
        // entries are not.
        opts.settings.max_archive_size = std::fs::metadata(&zip_path).unwrap().len() - 1;
        let outcome = scan(&opts);
        assert_eq!(outcome.stats.inserted, 1);

        let catalog = Catalog::open(&db_path).unwrap();
        assert_eq!(catalog.statistics().unwrap().archived_files, 0);
    }

    #[test]
    fn entry_size_gate_is_exact() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let zip_path = root.join("edge.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let zip_options = zip::write::SimpleFileOptions::default();
            writer.start_file("exactly.bin", zip_options).unwrap();
            writer.write_all(&[0u8; 64]).unwrap();
            writer.start_file("over.bin", zip_options).unwrap();
            writer.write_all(&[0u8; 65]).unwrap();
            writer.finish().unwrap();
        }
        let db_path = dir.path().join("indexer.db");

        let mut opts = options(&root, &db_path);
        opts.settings.max_archive_file_size = 64;
        scan(&opts);

        let catalog = Catalog::open(&db_path).unwrap();
        assert_eq!(catalog.statistics().unwrap().archived_files, 1);
        let archive_abs = zip_path.canonicalize().unwrap();
        assert!(
            catalog
                .lookup_by_path(&format!("{}::exactly.bin", archive_abs.display()))
                .unwrap()
                .is_some()
        );
        assert!(
            catalog
                .lookup_by_path(&format!("{}::over.bin", archive_abs.display()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn zero_byte_file_gets_the_empty_digests() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("empty.bin"), b"").unwrap();
        let db_path = dir.path().join("indexer.db");

        scan(&options(&root, &db_path));
        let catalog = Catalog::open(&db_path).unwrap();
        let root_abs = root.canonicalize().unwrap();
        let (_, hash) = catalog
            .lookup_by_path(&root_abs.join("empty.bin").to_string_lossy())
            .unwrap()
            .unwrap();
        assert_eq!(hash.size, 0);
        assert_eq!(hash.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            hash.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn cancel_before_start_interrupts_cleanly() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.bin"), b"a").unwrap();
        let db_path = dir.path().join("indexer.db");

        let metrics = Metrics::new("cancel-test");
        let cancel = AtomicBool::new(true);
        let outcome = run_scan(&options(&root, &db_path), &metrics, &cancel).unwrap();
        assert!(outcome.interrupted);
        assert!(
            metrics
                .render()
                .contains("scan_in_progress{machine=\"cancel-test\"} 0")
        );
    }

    #[test]
    fn rescan_after_catalog_removal_reproduces_identities() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("one.bin"), b"one-payload").unwrap();
        std::fs::write(root.join("sub/two.bin"), b"two-payload").unwrap();
        let db_path = dir.path().join("indexer.db");

        scan(&options(&root, &db_path));
        let first = snapshot(&db_path);

        std::fs::remove_file(&db_path).unwrap();
        scan(&options(&root, &db_path));
        let second = snapshot(&db_path);

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    fn snapshot(db_path: &Path) -> Vec<(String, String, String, String, u64)> {
        let catalog = Catalog::open(db_path).unwrap();
        let mut rows: Vec<_> = catalog
            .search(&crate::catalog::SearchQuery {
                limit: Some(10_000),
                ..Default::default()
            })
            .unwrap()
            .into_iter()
            .map(|(record, hash)| (record.path, hash.md5, hash.sha1, hash.sha256, hash.size))
            .collect();
        rows.sort();
        rows
    }
}
