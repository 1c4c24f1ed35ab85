//! Domain model types used throughout MergeWatch.
//!
//! These types bridge the hosting-API client, the detection strategies, and
//! the report renderers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::patch::parse_unified_diff;

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// Identifies one open pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeProposalRef {
    /// Pull request number.
    pub id: u64,
    /// Head branch name.
    pub branch: String,
    /// Login of the pull request author.
    pub author: String,
    /// Title, for display only.
    #[serde(default)]
    pub title: String,
    /// Browser URL, for display only.
    #[serde(default)]
    pub html_url: Option<String>,
}

impl ChangeProposalRef {
    pub fn new(id: u64, branch: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id,
            branch: branch.into(),
            author: author.into(),
            title: String::new(),
            html_url: None,
        }
    }
}

/// An added line in the post-image of a diff hunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineChange {
    /// 1-based line number in the post-image.
    pub line: u32,
    /// Added content, without the leading `+`.
    pub content: String,
    /// Up to two post-image lines either side of the change.
    pub context: Vec<String>,
}

/// The files and added lines of one pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub proposal_id: u64,
    pub files: BTreeSet<String>,
    pub hunks: BTreeMap<String, Vec<LineChange>>,
}

impl ChangeSet {
    /// Build a change set from per-file line changes. Every key of `hunks`
    /// is also a member of `files`.
    pub fn new(
        proposal_id: u64,
        files: impl IntoIterator<Item = String>,
        hunks: BTreeMap<String, Vec<LineChange>>,
    ) -> Self {
        let mut files: BTreeSet<String> = files.into_iter().collect();
        files.extend(hunks.keys().cloned());
        Self {
            proposal_id,
            files,
            hunks,
        }
    }

    /// Build a change set from a raw multi-file `git diff`.
    pub fn from_unified_diff(proposal_id: u64, diff: &str) -> Self {
        Self::new(proposal_id, Vec::new(), parse_unified_diff(diff))
    }

    /// Line changes recorded for `path`, empty if the file has none.
    pub fn changes_for(&self, path: &str) -> &[LineChange] {
        self.hunks.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Which detection algorithm produced a report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// Real merge attempt in a local workspace.
    #[default]
    Merge,
    /// Post-image line overlap computed from diff hunks.
    Patch,
}

impl std::fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

impl std::str::FromStr for DetectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "patch" => Ok(Self::Patch),
            other => Err(format!("unknown strategy '{}' (expected merge or patch)", other)),
        }
    }
}

/// Per-file conflicting lines, each vector ascending and deduplicated.
pub type ConflictingFiles = BTreeMap<String, Vec<u32>>;

/// Conflicts between the focal pull request and one other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub other: ChangeProposalRef,
    pub conflicting_files: ConflictingFiles,
}

/// A pair that could not be evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedPair {
    pub proposal_id: u64,
    pub reason: String,
}

/// Output of one detection run for a focal pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub focal_id: u64,
    pub focal_author: String,
    pub strategy: DetectionStrategy,
    pub records: Vec<ConflictRecord>,
    /// Authors of conflicting pull requests, never the focal author.
    pub reviewers: BTreeSet<String>,
    #[serde(default)]
    pub skipped: Vec<SkippedPair>,
    pub generated_at: DateTime<Utc>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Sort and deduplicate every line vector, dropping files left empty.
pub fn normalize_lines(files: ConflictingFiles) -> ConflictingFiles {
    files
        .into_iter()
        .filter_map(|(path, mut lines)| {
            lines.sort_unstable();
            lines.dedup();
            (!lines.is_empty()).then_some((path, lines))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_includes_hunk_paths() {
        let mut hunks = BTreeMap::new();
        hunks.insert(
            "src/lib.rs".to_string(),
            vec![LineChange {
                line: 3,
                content: "fn x() {}".into(),
                context: vec![],
            }],
        );
        let set = ChangeSet::new(1, vec!["README.md".to_string()], hunks);
        assert!(set.files.contains("README.md"));
        assert!(set.files.contains("src/lib.rs"));
        assert_eq!(set.changes_for("src/lib.rs").len(), 1);
        assert!(set.changes_for("README.md").is_empty());
    }

    #[test]
    fn test_change_set_from_unified_diff() {
        let diff = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -10,2 +10,3 @@
 fn a() {}
+fn b() {}
 fn c() {}
diff --git a/logo.png b/logo.png
Binary files a/logo.png and b/logo.png differ
";
        let set = ChangeSet::from_unified_diff(4, diff);
        assert_eq!(set.proposal_id, 4);
        assert_eq!(
            set.files.iter().collect::<Vec<_>>(),
            vec!["logo.png", "src/lib.rs"]
        );
        assert_eq!(set.changes_for("src/lib.rs")[0].line, 11);
        assert!(set.changes_for("logo.png").is_empty());
    }

    #[test]
    fn test_normalize_lines() {
        let mut files = ConflictingFiles::new();
        files.insert("a.txt".into(), vec![9, 3, 3, 4]);
        files.insert("b.txt".into(), vec![]);
        let normalized = normalize_lines(files);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized["a.txt"], vec![3, 4, 9]);
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("patch".parse::<DetectionStrategy>().unwrap(), DetectionStrategy::Patch);
        assert_eq!(DetectionStrategy::Merge.to_string(), "merge");
        assert!("rebase".parse::<DetectionStrategy>().is_err());
    }
}
