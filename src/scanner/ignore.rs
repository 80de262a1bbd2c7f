use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

/// Well-known rules file, read from the scan root when ignore rules are
/// enabled.
pub const IGNORE_FILE_NAME: &str = ".ignore";

/// Exclusion rules consulted before descending into a directory and before
/// yielding a file.
///
/// Two rule forms: a rule without `/` matches any directory whose basename
/// equals it exactly; a rule containing `/` matches any path containing it
/// as a substring. Independently of loaded rules, directories whose basename
/// starts with `.` or `_` are always excluded.
#[derive(Debug, Default, Clone)]
pub struct IgnoreRules {
    names: HashSet<String>,
    substrings: Vec<String>,
}

impl IgnoreRules {
    /// Rule set that matches nothing beyond the dot/underscore default.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse rules from text: blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        let mut rules = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains('/') {
                rules.substrings.push(line.to_string());
            } else {
                rules.names.insert(line.to_string());
            }
        }
        rules
    }

    /// Load the `.ignore` file from the scan root. A missing file yields the
    /// empty rule set; a read failure is logged and ignored.
    pub fn load(root: &Path) -> Self {
        let path = root.join(IGNORE_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::empty(),
            Err(err) => {
                warn!("Failed to read {}: {err}", path.display());
                Self::empty()
            }
        }
    }

    /// Number of loaded rules.
    pub fn len(&self) -> usize {
        self.names.len() + self.substrings.len()
    }

    /// True when no rules were loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decide whether a path is excluded from the scan. Pure function of the
    /// inputs and the loaded rule set.
    pub fn excluded(&self, path: &Path, is_directory: bool) -> bool {
        if is_directory
            && let Some(name) = path.file_name().and_then(|name| name.to_str())
        {
            if name.starts_with('.') || name.starts_with('_') {
                return true;
            }
            if self.names.contains(name) {
                return true;
            }
        }
        if !self.substrings.is_empty() {
            let normalized = path.to_string_lossy().replace('\\', "/");
            if self
                .substrings
                .iter()
                .any(|rule| normalized.contains(rule.as_str()))
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dot_and_underscore_directories_are_always_excluded() {
        let rules = IgnoreRules::empty();
        assert!(rules.excluded(Path::new("/root/.git"), true));
        assert!(rules.excluded(Path::new("/root/_build"), true));
        assert!(!rules.excluded(Path::new("/root/src"), true));
        // Files are not subject to the dot/underscore default.
        assert!(!rules.excluded(Path::new("/root/.hidden"), false));
    }

    #[test]
    fn name_rules_match_directory_basenames_exactly() {
        let rules = IgnoreRules::parse("node_modules\ntarget\n");
        assert!(rules.excluded(Path::new("/a/node_modules"), true));
        assert!(rules.excluded(Path::new("/a/b/target"), true));
        assert!(!rules.excluded(Path::new("/a/node_modules_extra"), true));
        // Name rules apply to directories only.
        assert!(!rules.excluded(Path::new("/a/target"), false));
    }

    #[test]
    fn substring_rules_match_any_path() {
        let rules = IgnoreRules::parse("cache/tmp\n");
        assert!(rules.excluded(Path::new("/data/cache/tmp/x.bin"), false));
        assert!(rules.excluded(Path::new("/data/cache/tmp"), true));
        assert!(!rules.excluded(Path::new("/data/cache"), true));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let rules = IgnoreRules::parse("# comment\n\n  \nbuild\n");
        assert_eq!(rules.len(), 1);
        assert!(rules.excluded(Path::new("/a/build"), true));
    }

    #[test]
    fn load_missing_file_yields_empty_rules() {
        let dir = tempdir().unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert!(rules.is_empty());
    }

    #[test]
    fn load_reads_rules_from_scan_root() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE_NAME), "vendor\nsrc/gen/\n").unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert_eq!(rules.len(), 2);
        assert!(rules.excluded(Path::new("/x/vendor"), true));
        assert!(rules.excluded(Path::new("/x/src/gen/out.rs"), false));
    }
}
