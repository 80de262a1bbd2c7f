//! Scan observability: counters, gauges, and histograms with a scrape
//! endpoint.
//!
//! Hot-path updates are atomic increments; histograms take a short mutex off
//! the per-file fast path. The registry is a capability constructed once at
//! startup and handed to each pipeline stage. When metrics are disabled the
//! registry is inert and no port is opened.
//!
//! `GET /metrics` serves the Prometheus text exposition format from a
//! dedicated listener thread.

use std::{
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{info, warn};

/// First port probed when the caller asks for automatic selection.
pub const AUTO_PORT_START: u16 = 9000;
/// Number of ports probed during automatic selection.
const AUTO_PORT_SPAN: u16 = 100;

/// Archive container label for `archives_scanned_total` and
/// `archive_entries_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLabel {
    Zip,
    Tar,
    Rar,
}

impl ArchiveLabel {
    const ALL: [ArchiveLabel; 3] = [ArchiveLabel::Zip, ArchiveLabel::Tar, ArchiveLabel::Rar];

    fn as_str(self) -> &'static str {
        match self {
            ArchiveLabel::Zip => "zip",
            ArchiveLabel::Tar => "tar",
            ArchiveLabel::Rar => "rar",
        }
    }

    fn index(self) -> usize {
        match self {
            ArchiveLabel::Zip => 0,
            ArchiveLabel::Tar => 1,
            ArchiveLabel::Rar => 2,
        }
    }
}

/// Scope label for `errors_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    ScanFile,
    ScanArchive,
    Worker,
    DirIter,
    DbFlush,
    ArchiveRead,
    ArchiveSkip,
}

impl ErrorScope {
    const ALL: [ErrorScope; 7] = [
        ErrorScope::ScanFile,
        ErrorScope::ScanArchive,
        ErrorScope::Worker,
        ErrorScope::DirIter,
        ErrorScope::DbFlush,
        ErrorScope::ArchiveRead,
        ErrorScope::ArchiveSkip,
    ];

    fn as_str(self) -> &'static str {
        match self {
            ErrorScope::ScanFile => "scan_file",
            ErrorScope::ScanArchive => "scan_archive",
            ErrorScope::Worker => "worker",
            ErrorScope::DirIter => "dir_iter",
            ErrorScope::DbFlush => "db_flush",
            ErrorScope::ArchiveRead => "archive_read",
            ErrorScope::ArchiveSkip => "archive_skip",
        }
    }

    fn index(self) -> usize {
        match self {
            ErrorScope::ScanFile => 0,
            ErrorScope::ScanArchive => 1,
            ErrorScope::Worker => 2,
            ErrorScope::DirIter => 3,
            ErrorScope::DbFlush => 4,
            ErrorScope::ArchiveRead => 5,
            ErrorScope::ArchiveSkip => 6,
        }
    }
}

const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];
const BATCH_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0];
const SCAN_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1_800.0, 3_600.0, 14_400.0,
];

struct Histogram {
    buckets: &'static [f64],
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new(buckets: &'static [f64]) -> Self {
        Self {
            buckets,
            counts: vec![0; buckets.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (idx, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                self.counts[idx] += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

/// Counter/gauge/histogram registry shared by every pipeline stage.
///
/// All series carry a `machine` label. A disabled registry turns every
/// update into a no-op.
pub struct Metrics {
    enabled: bool,
    machine: String,
    files_scanned: AtomicU64,
    directories_scanned: AtomicU64,
    archives_scanned: [AtomicU64; 3],
    archive_entries: [AtomicU64; 3],
    errors: [AtomicU64; 7],
    db_writes: AtomicU64,
    bytes_hashed: AtomicU64,
    scan_in_progress: AtomicU64,
    queue_files_pending: AtomicU64,
    workers_running: AtomicU64,
    scan_file_duration: Mutex<Histogram>,
    db_flush_duration: Mutex<Histogram>,
    batch_size: Mutex<Histogram>,
    scan_duration: Mutex<Histogram>,
}

impl Metrics {
    /// Create an active registry labelled with the scanning machine.
    pub fn new(machine: impl Into<String>) -> Self {
        Self::build(true, machine.into())
    }

    /// Create an inert registry: every update is a no-op and `serve` refuses
    /// to open a port.
    pub fn disabled() -> Self {
        Self::build(false, String::new())
    }

    fn build(enabled: bool, machine: String) -> Self {
        Self {
            enabled,
            machine,
            files_scanned: AtomicU64::new(0),
            directories_scanned: AtomicU64::new(0),
            archives_scanned: std::array::from_fn(|_| AtomicU64::new(0)),
            archive_entries: std::array::from_fn(|_| AtomicU64::new(0)),
            errors: std::array::from_fn(|_| AtomicU64::new(0)),
            db_writes: AtomicU64::new(0),
            bytes_hashed: AtomicU64::new(0),
            scan_in_progress: AtomicU64::new(0),
            queue_files_pending: AtomicU64::new(0),
            workers_running: AtomicU64::new(0),
            scan_file_duration: Mutex::new(Histogram::new(DURATION_BUCKETS)),
            db_flush_duration: Mutex::new(Histogram::new(DURATION_BUCKETS)),
            batch_size: Mutex::new(Histogram::new(BATCH_BUCKETS)),
            scan_duration: Mutex::new(Histogram::new(SCAN_BUCKETS)),
        }
    }

    /// True when updates are recorded and the endpoint may be served.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn inc_files(&self, n: u64) {
        if self.enabled {
            self.files_scanned.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn inc_dirs(&self, n: u64) {
        if self.enabled {
            self.directories_scanned.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn inc_archives(&self, label: ArchiveLabel) {
        if self.enabled {
            self.archives_scanned[label.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_archive_entries(&self, label: ArchiveLabel) {
        if self.enabled {
            self.archive_entries[label.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_errors(&self, scope: ErrorScope) {
        self.add_errors(scope, 1);
    }

    pub fn add_errors(&self, scope: ErrorScope, n: u64) {
        if self.enabled {
            self.errors[scope.index()].fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn inc_db_writes(&self, n: u64) {
        if self.enabled {
            self.db_writes.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn inc_bytes_hashed(&self, n: u64) {
        if self.enabled {
            self.bytes_hashed.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn set_scan_in_progress(&self, in_progress: bool) {
        if self.enabled {
            self.scan_in_progress
                .store(u64::from(in_progress), Ordering::Relaxed);
        }
    }

    pub fn set_queue_pending(&self, pending: u64) {
        if self.enabled {
            self.queue_files_pending.store(pending, Ordering::Relaxed);
        }
    }

    pub fn set_workers_running(&self, workers: u64) {
        if self.enabled {
            self.workers_running.store(workers, Ordering::Relaxed);
        }
    }

    pub fn observe_file_duration(&self, duration: Duration) {
        if self.enabled
            && let Ok(mut histogram) = self.scan_file_duration.lock()
        {
            histogram.observe(duration.as_secs_f64());
        }
    }

    pub fn observe_db_flush(&self, duration: Duration, batch_size: usize) {
        if !self.enabled {
            return;
        }
        if let Ok(mut histogram) = self.db_flush_duration.lock() {
            histogram.observe(duration.as_secs_f64());
        }
        if let Ok(mut histogram) = self.batch_size.lock() {
            histogram.observe(batch_size as f64);
        }
    }

    /// Record one scan's overall wall-clock duration.
    pub fn observe_scan_duration(&self, duration: Duration) {
        if self.enabled
            && let Ok(mut histogram) = self.scan_duration.lock()
        {
            histogram.observe(duration.as_secs_f64());
        }
    }

    /// Current value of `files_scanned_total`, for the progress display.
    pub fn files_scanned(&self) -> u64 {
        self.files_scanned.load(Ordering::Relaxed)
    }

    /// Render every series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(4096);
        let machine = escape_label(&self.machine);

        self.render_counter(
            &mut out,
            "files_scanned_total",
            "Files processed",
            &machine,
            &self.files_scanned,
        );
        self.render_counter(
            &mut out,
            "directories_scanned_total",
            "Directories entered",
            &machine,
            &self.directories_scanned,
        );

        push_header(&mut out, "archives_scanned_total", "Archives processed", "counter");
        for label in ArchiveLabel::ALL {
            let value = self.archives_scanned[label.index()].load(Ordering::Relaxed);
            out.push_str(&format!(
                "archives_scanned_total{{machine=\"{machine}\",type=\"{}\"}} {value}\n",
                label.as_str()
            ));
        }
        push_header(
            &mut out,
            "archive_entries_total",
            "Archive entries processed",
            "counter",
        );
        for label in ArchiveLabel::ALL {
            let value = self.archive_entries[label.index()].load(Ordering::Relaxed);
            out.push_str(&format!(
                "archive_entries_total{{machine=\"{machine}\",type=\"{}\"}} {value}\n",
                label.as_str()
            ));
        }
        push_header(&mut out, "errors_total", "Errors by scope", "counter");
        for scope in ErrorScope::ALL {
            let value = self.errors[scope.index()].load(Ordering::Relaxed);
            out.push_str(&format!(
                "errors_total{{machine=\"{machine}\",scope=\"{}\"}} {value}\n",
                scope.as_str()
            ));
        }

        self.render_counter(
            &mut out,
            "db_writes_total",
            "File records written",
            &machine,
            &self.db_writes,
        );
        self.render_counter(
            &mut out,
            "bytes_hashed_total",
            "Bytes fed to the hasher",
            &machine,
            &self.bytes_hashed,
        );

        self.render_gauge(
            &mut out,
            "scan_in_progress",
            "1 while a scan is running",
            &machine,
            &self.scan_in_progress,
        );
        self.render_gauge(
            &mut out,
            "queue_files_pending",
            "Paths waiting in the work queue",
            &machine,
            &self.queue_files_pending,
        );
        self.render_gauge(
            &mut out,
            "workers_running",
            "Active worker threads",
            &machine,
            &self.workers_running,
        );

        self.render_histogram(
            &mut out,
            "scan_file_duration_seconds",
            "Per-file processing duration",
            &machine,
            &self.scan_file_duration,
        );
        self.render_histogram(
            &mut out,
            "db_flush_duration_seconds",
            "Batch flush duration",
            &machine,
            &self.db_flush_duration,
        );
        self.render_histogram(
            &mut out,
            "batch_size",
            "Records per flush",
            &machine,
            &self.batch_size,
        );
        self.render_histogram(
            &mut out,
            "scan_duration_seconds",
            "Overall scan duration",
            &machine,
            &self.scan_duration,
        );
        out
    }

    fn render_counter(
        &self,
        out: &mut String,
        name: &str,
        help: &str,
        machine: &str,
        value: &AtomicU64,
    ) {
        push_header(out, name, help, "counter");
        out.push_str(&format!(
            "{name}{{machine=\"{machine}\"}} {}\n",
            value.load(Ordering::Relaxed)
        ));
    }

    fn render_gauge(
        &self,
        out: &mut String,
        name: &str,
        help: &str,
        machine: &str,
        value: &AtomicU64,
    ) {
        push_header(out, name, help, "gauge");
        out.push_str(&format!(
            "{name}{{machine=\"{machine}\"}} {}\n",
            value.load(Ordering::Relaxed)
        ));
    }

    fn render_histogram(
        &self,
        out: &mut String,
        name: &str,
        help: &str,
        machine: &str,
        histogram: &Mutex<Histogram>,
    ) {
        let Ok(histogram) = histogram.lock() else {
            return;
        };
        push_header(out, name, help, "histogram");
        for (idx, bound) in histogram.buckets.iter().enumerate() {
            out.push_str(&format!(
                "{name}_bucket{{machine=\"{machine}\",le=\"{bound}\"}} {}\n",
                histogram.counts[idx]
            ));
        }
        out.push_str(&format!(
            "{name}_bucket{{machine=\"{machine}\",le=\"+Inf\"}} {}\n",
            histogram.count
        ));
        out.push_str(&format!(
            "{name}_sum{{machine=\"{machine}\"}} {}\n",
            histogram.sum
        ));
        out.push_str(&format!(
            "{name}_count{{machine=\"{machine}\"}} {}\n",
            histogram.count
        ));
    }
}

fn push_header(out: &mut String, name: &str, help: &str, kind: &str) {
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n"));
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Running `/metrics` listener. Dropping it stops the thread and closes the
/// port.
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MetricsServer {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and join the listener thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind the scrape endpoint and start serving `GET /metrics`.
///
/// A port of 0 probes upward from [`AUTO_PORT_START`] until a free port is
/// found. Returns an error for a disabled registry.
pub fn serve(
    metrics: Arc<Metrics>,
    host: &str,
    port: u16,
) -> Result<MetricsServer, std::io::Error> {
    if !metrics.enabled() {
        return Err(std::io::Error::other("metrics registry is disabled"));
    }
    let listener = bind(host, port)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    info!("Metrics endpoint listening on http://{addr}/metrics");

    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);
    let join = thread::Builder::new()
        .name("findex-metrics".into())
        .spawn(move || accept_loop(listener, metrics, thread_shutdown))?;

    Ok(MetricsServer {
        addr,
        shutdown,
        join: Some(join),
    })
}

fn bind(host: &str, port: u16) -> Result<TcpListener, std::io::Error> {
    if port != 0 {
        return TcpListener::bind((host, port));
    }
    let mut last_err = None;
    for candidate in AUTO_PORT_START..AUTO_PORT_START.saturating_add(AUTO_PORT_SPAN) {
        match TcpListener::bind((host, candidate)) {
            Ok(listener) => return Ok(listener),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("no free metrics port")))
}

fn accept_loop(listener: TcpListener, metrics: Arc<Metrics>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_scrape(stream, &metrics) {
                    warn!("Metrics scrape failed: {err}");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!("Metrics accept failed: {err}");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn handle_scrape(stream: TcpStream, metrics: &Metrics) -> std::io::Result<()> {
    // Some platforms hand accepted sockets the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    stream.set_write_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut stream = reader.into_inner();
    let path = request_line.split_whitespace().nth(1).unwrap_or("");
    if request_line.starts_with("GET") && (path == "/metrics" || path == "/") {
        let body = metrics.render();
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )?;
    } else {
        let body = "not found\n";
        write!(
            stream,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )?;
    }
    stream.flush()
}
