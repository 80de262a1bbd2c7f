//! RAR reading through the external `unrar` tool.
//!
//! Listing comes from `unrar lt` (the technical listing is stable across
//! tool versions); entry bytes are streamed from `unrar p -inul`. When no
//! tool is installed, `visit` fails with `Unsupported` and the coordinator
//! records a skip rather than an error.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use time::PrimitiveDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::warn;

use super::{
    ArchiveEntry, ArchiveError, ENTRY_FAIL_THRESHOLD, EntryFlow, EntryVisitor, VisitOutcome,
    normalize_internal,
};

const UNRAR_BIN: &str = "unrar";

static TOOL_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Probe for the extraction tool once per process.
fn tool_available() -> bool {
    *TOOL_AVAILABLE.get_or_init(|| {
        let probe = Command::new(UNRAR_BIN)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match probe {
            Ok(mut child) => {
                let _ = child.wait();
                true
            }
            Err(_) => {
                warn!(
                    "RAR support disabled: `{UNRAR_BIN}` not found; \
                     install unrar to index RAR archives"
                );
                false
            }
        }
    })
}

pub(super) fn visit(
    path: &Path,
    visit: &mut EntryVisitor<'_>,
) -> Result<VisitOutcome, ArchiveError> {
    if !tool_available() {
        return Err(ArchiveError::Unsupported {
            path: path.to_path_buf(),
            reason: format!("`{UNRAR_BIN}` is not installed"),
        });
    }

    let listing = Command::new(UNRAR_BIN)
        .args(["lt", "-idq", "--"])
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|err| ArchiveError::Open {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    if !listing.status.success() {
        return Err(ArchiveError::Open {
            path: path.to_path_buf(),
            message: format!("`{UNRAR_BIN} lt` exited with {}", listing.status),
        });
    }
    let entries = parse_listing(&String::from_utf8_lossy(&listing.stdout));

    let mut outcome = VisitOutcome::default();
    for meta in entries {
        match stream_entry(path, &meta, visit) {
            Ok(EntryFlow::Continue) => {}
            Ok(EntryFlow::Failed) | Err(()) => {
                if note_failure(&mut outcome, path) {
                    break;
                }
            }
            Ok(EntryFlow::Stop) => break,
        }
    }
    Ok(outcome)
}

/// Pipe one entry's bytes through the visitor. `Err(())` means the tool
/// failed before or after the visit.
fn stream_entry(
    path: &Path,
    meta: &ArchiveEntry,
    visit: &mut EntryVisitor<'_>,
) -> Result<EntryFlow, ()> {
    let mut child = Command::new(UNRAR_BIN)
        .args(["p", "-inul", "--"])
        .arg(path)
        .arg(&meta.internal_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| {
            warn!(
                archive = %path.display(),
                entry = %meta.internal_path,
                error = %err,
                "Failed to spawn RAR extraction"
            );
        })?;
    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.wait();
        return Err(());
    };

    let flow = visit(meta, &mut stdout as &mut dyn Read);

    // Drain whatever the visitor left unread so the tool can exit.
    let mut sink = [0u8; 8192];
    while matches!(stdout.read(&mut sink), Ok(read) if read > 0) {}
    drop(stdout);
    match child.wait() {
        Ok(status) if status.success() => Ok(flow),
        Ok(status) => {
            warn!(
                archive = %path.display(),
                entry = %meta.internal_path,
                %status,
                "RAR extraction exited abnormally"
            );
            Err(())
        }
        Err(err) => {
            warn!(
                archive = %path.display(),
                entry = %meta.internal_path,
                error = %err,
                "Failed to reap RAR extraction"
            );
            Err(())
        }
    }
}

fn note_failure(outcome: &mut VisitOutcome, path: &Path) -> bool {
    outcome.failed_entries += 1;
    if outcome.failed_entries >= ENTRY_FAIL_THRESHOLD {
        warn!(
            archive = %path.display(),
            failures = outcome.failed_entries,
            "Too many entry failures; abandoning archive"
        );
        outcome.abandoned = true;
        return true;
    }
    false
}

/// Parse `unrar lt` output: one `Key: value` block per entry, blocks led by
/// a `Name:` line. Directories are dropped.
fn parse_listing(text: &str) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut name: Option<String> = None;
    let mut size: u64 = 0;
    let mut modified_ns: i64 = 0;
    let mut is_file = true;

    let mut finish =
        |name: &mut Option<String>, size: &mut u64, modified_ns: &mut i64, is_file: &mut bool| {
            if let Some(done) = name.take()
                && *is_file
                && !done.is_empty()
            {
                entries.push(ArchiveEntry {
                    internal_path: normalize_internal(&done),
                    size: *size,
                    modified_ns: *modified_ns,
                });
            }
            *size = 0;
            *modified_ns = 0;
            *is_file = true;
        };

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "name" => {
                finish(&mut name, &mut size, &mut modified_ns, &mut is_file);
                name = Some(value.to_string());
            }
            "type" => is_file = value.eq_ignore_ascii_case("file"),
            "size" => size = value.parse().unwrap_or(0),
            "mtime" | "modified" => modified_ns = parse_mtime_ns(value),
            _ => {}
        }
    }
    finish(&mut name, &mut size, &mut modified_ns, &mut is_file);
    entries
}

/// Parse `2024-05-02 10:11:12,123456789` (fraction optional) to epoch
/// nanoseconds, assuming UTC. 0 when unparseable.
fn parse_mtime_ns(value: &str) -> i64 {
    const FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let (stamp, fraction) = match value.split_once(',') {
        Some((stamp, fraction)) => (stamp.trim(), fraction.trim()),
        None => (value.trim(), ""),
    };
    let Ok(parsed) = PrimitiveDateTime::parse(stamp, FORMAT) else {
        return 0;
    };
    let nanos: i64 = {
        let digits: String = fraction.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            0
        } else {
            // Right-pad to nanosecond precision.
            format!("{digits:0<9}")[..9].parse().unwrap_or(0)
        }
    };
    let seconds = parsed.assume_utc().unix_timestamp();
    seconds.saturating_mul(1_000_000_000).saturating_add(nanos)
}
