use crate::catalog::{FileRecord, HashRow};

/// Incremental classification of one walker item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Unchanged since the prior record; release without hashing.
    Skip,
    /// Never catalogued at this path.
    Add,
    /// Catalogued, but size or mtime moved.
    Mod,
}

/// Classify a file from its current stat and the catalog's prior record.
///
/// Size and mtime equality is exact: timestamps carry sub-second precision,
/// so any drift indicates a real write. Does no I/O and never hashes.
pub fn decide(size: u64, modified_ns: i64, prior: Option<&(FileRecord, HashRow)>) -> Decision {
    match prior {
        None => Decision::Add,
        Some((record, hash)) if hash.size == size && record.modified_ns == modified_ns => {
            Decision::Skip
        }
        Some(_) => Decision::Mod,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Operation;

    fn prior(size: u64, modified_ns: i64) -> (FileRecord, HashRow) {
        (
            FileRecord {
                id: 1,
                hash_id: 1,
                name: "a.bin".to_string(),
                path: "/data/a.bin".to_string(),
                machine: "m".to_string(),
                created_ns: 10,
                modified_ns,
                scanned_ns: 20,
                operation: Operation::Add,
                is_archived: false,
                archive_path: None,
            },
            HashRow {
                id: 1,
                size,
                md5: String::new(),
                sha1: String::new(),
                sha256: String::new(),
            },
        )
    }

    #[test]
    fn no_prior_record_is_add() {
        assert_eq!(decide(10, 100, None), Decision::Add);
    }

    #[test]
    fn matching_size_and_mtime_is_skip() {
        let existing = prior(10, 100);
        assert_eq!(decide(10, 100, Some(&existing)), Decision::Skip);
    }

    #[test]
    fn size_change_is_mod() {
        let existing = prior(10, 100);
        assert_eq!(decide(11, 100, Some(&existing)), Decision::Mod);
    }

    #[test]
    fn mtime_drift_is_mod_even_by_one_nanosecond() {
        let existing = prior(10, 100);
        assert_eq!(decide(10, 101, Some(&existing)), Decision::Mod);
        assert_eq!(decide(10, 99, Some(&existing)), Decision::Mod);
    }
}
