//! Cheap file-level overlap test run before any detection strategy.
//!
//! Two pull requests that touch disjoint files cannot conflict under either
//! strategy, so the intersection of their file sets decides whether the
//! expensive comparison runs at all.

use std::collections::BTreeSet;

use glob_match::glob_match;
use tracing::debug;

use crate::models::ChangeSet;

/// File-set intersection with optional ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct OverlapPrefilter {
    /// Glob patterns for paths that never count as overlap (e.g. lockfiles).
    ignore_patterns: Vec<String>,
}

impl OverlapPrefilter {
    pub fn new(ignore_patterns: Vec<String>) -> Self {
        Self { ignore_patterns }
    }

    /// Paths present in both change sets, minus ignored paths.
    pub fn overlapping_files(&self, a: &ChangeSet, b: &ChangeSet) -> BTreeSet<String> {
        let shared: BTreeSet<String> = overlapping_files(&a.files, &b.files)
            .into_iter()
            .filter(|path| !self.is_ignored(path))
            .collect();

        debug!(
            a = a.proposal_id,
            b = b.proposal_id,
            shared = shared.len(),
            "prefilter evaluated"
        );
        shared
    }

    /// Whether `path` matches any ignore pattern.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| glob_match(pattern, path))
    }
}

/// Plain intersection of two path sets.
pub fn overlapping_files(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a.intersection(b).cloned().collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn set(id: u64, files: &[&str]) -> ChangeSet {
        ChangeSet::new(id, files.iter().map(|f| f.to_string()), BTreeMap::new())
    }

    #[test]
    fn test_disjoint_files() {
        let filter = OverlapPrefilter::default();
        assert!(filter
            .overlapping_files(&set(1, &["a.rs"]), &set(2, &["b.rs"]))
            .is_empty());
    }

    #[test]
    fn test_shared_files() {
        let filter = OverlapPrefilter::default();
        let shared = filter.overlapping_files(
            &set(1, &["a.rs", "b.rs", "c.rs"]),
            &set(2, &["b.rs", "c.rs", "d.rs"]),
        );
        assert_eq!(shared.into_iter().collect::<Vec<_>>(), vec!["b.rs", "c.rs"]);
    }

    #[test]
    fn test_ignored_patterns_do_not_count() {
        let filter = OverlapPrefilter::new(vec!["**/Cargo.lock".into(), "Cargo.lock".into()]);
        let shared = filter.overlapping_files(
            &set(1, &["Cargo.lock", "crates/x/Cargo.lock", "src/main.rs"]),
            &set(2, &["Cargo.lock", "crates/x/Cargo.lock"]),
        );
        assert!(shared.is_empty());
    }
}
