use std::path::PathBuf;
use std::sync::Arc;

use findex::catalog::Catalog;
use findex::config::Settings;
use findex::metrics::{self, Metrics};
use findex::scanner::{self, ScanOptions};
use findex::{logging, signals};

/// Scan completed (or nothing to do).
const EXIT_OK: i32 = 0;
/// Fatal initialization error.
const EXIT_INIT_ERROR: i32 = 1;
/// Interrupted by a signal; shutdown was still clean.
const EXIT_INTERRUPTED: i32 = 2;
/// Catalog failed its health check at startup.
const EXIT_UNHEALTHY_CATALOG: i32 = 3;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(EXIT_INIT_ERROR);
        }
    }
}

fn run() -> Result<i32, String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(EXIT_OK);
    };

    let settings = Settings::load_or_default()
        .map_err(|err| format!("Failed to load configuration: {err}"))?;
    if let Err(err) = logging::init(&options.log_path) {
        // Scanning still works without a log file.
        eprintln!("Logging setup failed, continuing without a log file: {err}");
    }
    signals::install().map_err(|err| format!("Failed to install signal handlers: {err}"))?;

    {
        let catalog = Catalog::open(&options.db_path)
            .map_err(|err| format!("Failed to open catalog {}: {err}", options.db_path.display()))?;
        if let Err(err) = catalog.health_check() {
            tracing::error!("Catalog health check failed: {err}");
            eprintln!("Catalog health check failed: {err}");
            return Ok(EXIT_UNHEALTHY_CATALOG);
        }
    }

    let registry = if options.metrics_port.is_some() {
        Arc::new(Metrics::new(&options.machine_name))
    } else {
        Arc::new(Metrics::disabled())
    };
    let server = match options.metrics_port {
        Some(port) => Some(
            metrics::serve(Arc::clone(&registry), &options.metrics_host, port)
                .map_err(|err| format!("Failed to bind metrics endpoint: {err}"))?,
        ),
        None => None,
    };

    let scan_options = ScanOptions {
        root: options.path,
        machine: options.machine_name,
        db_path: options.db_path,
        settings,
        worker_count: None,
    };
    let outcome = scanner::run_scan(&scan_options, &registry, signals::cancel_flag())
        .map_err(|err| err.to_string())?;

    if let Some(server) = server {
        server.shutdown();
    }
    Ok(if outcome.interrupted {
        EXIT_INTERRUPTED
    } else {
        EXIT_OK
    })
}

#[derive(Debug, Clone)]
struct CliOptions {
    path: PathBuf,
    machine_name: String,
    db_path: PathBuf,
    log_path: PathBuf,
    metrics_host: String,
    metrics_port: Option<u16>,
}

fn parse_args(args: Vec<String>) -> Result<Option<CliOptions>, String> {
    let mut path: Option<PathBuf> = None;
    let mut machine_name: Option<String> = None;
    let mut db_path = PathBuf::from("indexer.db");
    let mut log_path = PathBuf::from("indexer.log");
    let mut metrics_host = "0.0.0.0".to_string();
    let mut metrics_port: Option<u16> = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--machine-name" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--machine-name requires a value".to_string())?;
                machine_name = Some(value.clone());
            }
            "--db-path" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--db-path requires a value".to_string())?;
                db_path = PathBuf::from(value);
            }
            "--log-path" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--log-path requires a value".to_string())?;
                log_path = PathBuf::from(value);
            }
            "--metrics-host" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--metrics-host requires a value".to_string())?;
                metrics_host = value.clone();
            }
            "--metrics-port" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--metrics-port requires a value".to_string())?;
                let port: u16 = value
                    .parse()
                    .map_err(|_| format!("Invalid --metrics-port value: {value}"))?;
                metrics_port = Some(port);
            }
            flag if flag.starts_with('-') => {
                return Err(format!("Unknown argument: {flag}\n\n{}", help_text()));
            }
            positional => {
                if path.is_some() {
                    return Err(format!(
                        "Unexpected extra positional argument: {positional}\n\n{}",
                        help_text()
                    ));
                }
                path = Some(PathBuf::from(positional));
            }
        }
        idx += 1;
    }

    let Some(path) = path else {
        return Err(format!("A scan path is required\n\n{}", help_text()));
    };
    Ok(Some(CliOptions {
        path,
        machine_name: machine_name.unwrap_or_else(default_machine_name),
        db_path,
        log_path,
        metrics_host,
        metrics_port,
    }))
}

fn default_machine_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn help_text() -> String {
    [
        "findex — index files into a content-addressed catalog",
        "",
        "Usage:",
        "  findex <path> [options]",
        "",
        "Options:",
        "  --machine-name <name>   Label stored in every written record (default: hostname)",
        "  --db-path <file>        Catalog location (default: indexer.db)",
        "  --log-path <file>       Scan log location (default: indexer.log)",
        "  --metrics-host <addr>   Metrics bind address (default: 0.0.0.0)",
        "  --metrics-port <port>   Metrics port; 0 auto-selects from 9000; omit to disable",
        "  -h, --help              Show this help",
        "",
        "Exit codes: 0 ok, 1 init error, 2 interrupted, 3 catalog health check failed",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_defaults() {
        let options = parse_args(vec!["/data".to_string()]).unwrap().unwrap();
        assert_eq!(options.path, PathBuf::from("/data"));
        assert_eq!(options.db_path, PathBuf::from("indexer.db"));
        assert_eq!(options.log_path, PathBuf::from("indexer.log"));
        assert_eq!(options.metrics_host, "0.0.0.0");
        assert!(options.metrics_port.is_none());
    }

    #[test]
    fn parse_args_reads_all_options() {
        let options = parse_args(
            [
                "/data",
                "--machine-name",
                "box-a",
                "--db-path",
                "/var/lib/catalog.db",
                "--log-path",
                "/tmp/scan.log",
                "--metrics-host",
                "127.0.0.1",
                "--metrics-port",
                "0",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(options.machine_name, "box-a");
        assert_eq!(options.db_path, PathBuf::from("/var/lib/catalog.db"));
        assert_eq!(options.metrics_host, "127.0.0.1");
        assert_eq!(options.metrics_port, Some(0));
    }

    #[test]
    fn parse_args_rejects_missing_path_and_unknown_flags() {
        assert!(parse_args(vec![]).is_err());
        assert!(parse_args(vec!["--bogus".to_string()]).is_err());
        assert!(parse_args(vec!["/a".to_string(), "/b".to_string()]).is_err());
        assert!(parse_args(vec!["/a".to_string(), "--metrics-port".to_string()]).is_err());
        assert!(
            parse_args(vec![
                "/a".to_string(),
                "--metrics-port".to_string(),
                "junk".to_string()
            ])
            .is_err()
        );
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse_args(vec!["--help".to_string()]).unwrap().is_none());
    }
}
