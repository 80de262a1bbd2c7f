use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::warn;

use crate::metrics::{ErrorScope, Metrics};

use super::ScanError;
use super::ignore::IgnoreRules;

/// Walk `root` depth-first, yielding regular files to the visitor.
///
/// Entries within each directory are visited in lexicographic order, files
/// before descent into subdirectories. Symlinks are never followed and
/// non-regular files are skipped silently. Traversal errors below the root
/// are counted and logged without aborting the walk; a visitor error or a
/// raised cancel flag ends it.
pub(super) fn walk_files(
    root: &Path,
    rules: &IgnoreRules,
    cancel: &AtomicBool,
    metrics: &Metrics,
    visitor: &mut dyn FnMut(PathBuf, fs::Metadata) -> Result<(), ScanError>,
) -> Result<(), ScanError> {
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot(root.to_path_buf()));
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if cancel.load(Ordering::Relaxed) {
            return Err(ScanError::Canceled);
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if dir != root => {
                warn!(
                    dir = %dir.display(),
                    error = %source,
                    "Failed to read directory during scan"
                );
                metrics.inc_errors(ErrorScope::DirIter);
                continue;
            }
            Err(source) => {
                return Err(ScanError::Io { path: dir, source });
            }
        };
        metrics.inc_dirs(1);

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry_result in entries {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Failed to read directory entry during scan"
                    );
                    metrics.inc_errors(ErrorScope::DirIter);
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to read file type during scan"
                    );
                    metrics.inc_errors(ErrorScope::DirIter);
                    continue;
                }
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                if !rules.excluded(&path, true) {
                    subdirs.push(path);
                }
                continue;
            }
            // Devices, sockets and FIFOs fall through here and are dropped.
            if file_type.is_file() && !rules.excluded(&path, false) {
                files.push(path);
            }
        }

        files.sort();
        for path in files {
            if cancel.load(Ordering::Relaxed) {
                return Err(ScanError::Canceled);
            }
            let metadata = match path.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to stat file during scan"
                    );
                    metrics.inc_errors(ErrorScope::DirIter);
                    continue;
                }
            };
            visitor(path, metadata)?;
        }

        subdirs.sort();
        // Reverse push so the lexicographically first subdirectory pops next.
        for sub in subdirs.into_iter().rev() {
            stack.push(sub);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use tempfile::tempdir;

    fn collect(root: &Path, rules: &IgnoreRules) -> Vec<PathBuf> {
        let cancel = AtomicBool::new(false);
        let metrics = Metrics::disabled();
        let mut seen = Vec::new();
        walk_files(root, rules, &cancel, &metrics, &mut |path, _meta| {
            seen.push(path);
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn yields_files_in_deterministic_sorted_order() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("z.txt"), b"z").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b/inner.txt"), b"i").unwrap();
        std::fs::write(dir.path().join("a/inner.txt"), b"i").unwrap();

        let seen = collect(dir.path(), &IgnoreRules::empty());
        let expected = vec![
            dir.path().join("a.txt"),
            dir.path().join("z.txt"),
            dir.path().join("a/inner.txt"),
            dir.path().join("b/inner.txt"),
        ];
        assert_eq!(seen, expected);

        let again = collect(dir.path(), &IgnoreRules::empty());
        assert_eq!(seen, again);
    }

    #[test]
    fn dot_and_underscore_directories_are_pruned() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        std::fs::create_dir_all(dir.path().join("_work")).unwrap();
        std::fs::write(dir.path().join(".hidden/x.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("_work/y.txt"), b"y").unwrap();
        std::fs::write(dir.path().join("kept.txt"), b"k").unwrap();

        let seen = collect(dir.path(), &IgnoreRules::empty());
        assert_eq!(seen, vec![dir.path().join("kept.txt")]);
    }

    #[test]
    fn name_rules_prune_whole_subtrees() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vendor/deep")).unwrap();
        std::fs::write(dir.path().join("vendor/deep/x.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("kept.txt"), b"k").unwrap();

        let rules = IgnoreRules::parse("vendor\n");
        let seen = collect(dir.path(), &rules);
        assert_eq!(seen, vec![dir.path().join("kept.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        use std::os::unix::fs as unix_fs;
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/x.txt"), b"x").unwrap();
        unix_fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let seen = collect(dir.path(), &IgnoreRules::empty());
        assert_eq!(seen, vec![dir.path().join("real/x.txt")]);
    }

    #[test]
    fn cancel_stops_the_walk() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let cancel = AtomicBool::new(true);
        let metrics = Metrics::disabled();
        let result = walk_files(
            dir.path(),
            &IgnoreRules::empty(),
            &cancel,
            &metrics,
            &mut |_, _| Ok(()),
        );
        assert!(matches!(result, Err(ScanError::Canceled)));
    }

    #[test]
    fn missing_root_is_invalid() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        let metrics = Metrics::disabled();
        let result = walk_files(
            &dir.path().join("absent"),
            &IgnoreRules::empty(),
            &cancel,
            &metrics,
            &mut |_, _| Ok(()),
        );
        assert!(matches!(result, Err(ScanError::InvalidRoot(_))));
    }

    #[test]
    fn directories_entered_are_counted() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let cancel = AtomicBool::new(false);
        let metrics = Metrics::new("walker-test");
        walk_files(
            dir.path(),
            &IgnoreRules::empty(),
            &cancel,
            &metrics,
            &mut |_, _| Ok(()),
        )
        .unwrap();
        assert!(
            metrics
                .render()
                .contains("directories_scanned_total{machine=\"walker-test\"} 2")
        );
    }
}
