//! Side-effect-free overlap detection from unified-diff hunks.
//!
//! Each added line is pinned to its post-image line number. Two pull requests
//! collide when they add a line at the same number of the same file. This is
//! coarser than a real merge: it misses near-miss edits a merge would still
//! flag, and reports coincidental same-line additions that would merge
//! cleanly. In exchange it touches no repository state.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, warn};

use super::strategy::{ConflictStrategy, Side};
use crate::errors::DetectionError;
use crate::models::{normalize_lines, ChangeSet, ConflictingFiles, DetectionStrategy, LineChange};

/// Lines of context kept on either side of an added line.
const CONTEXT_RADIUS: usize = 2;

fn hunk_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@").expect("hunk header regex is valid")
    })
}

/// Parse the hunks of a single file's patch into added-line records.
///
/// Text before the first hunk header (including `---`/`+++` file headers) is
/// ignored.
pub fn parse_hunks(patch: &str) -> Vec<LineChange> {
    // Post-image lines of the current hunk, with their numbers, so context
    // can be taken from both sides of an addition.
    let mut post_image: Vec<(u32, &str)> = Vec::new();
    let mut added: Vec<usize> = Vec::new();
    let mut changes = Vec::new();
    let mut counter: Option<u32> = None;

    for line in patch.lines() {
        if let Some(caps) = hunk_header().captures(line) {
            flush_hunk(&post_image, &added, &mut changes);
            post_image.clear();
            added.clear();
            let start: u32 = caps[1].parse().unwrap_or(0);
            counter = Some(start.saturating_sub(1));
            continue;
        }

        let Some(current) = counter.as_mut() else {
            continue;
        };

        // File headers only precede the first hunk, so inside a hunk a
        // `+++` line is an addition whose content starts with `++`.
        if line.starts_with('-') || line.starts_with('\\') {
            continue;
        }

        *current += 1;
        if let Some(content) = line.strip_prefix('+') {
            added.push(post_image.len());
            post_image.push((*current, content));
        } else {
            post_image.push((*current, line.strip_prefix(' ').unwrap_or(line)));
        }
    }
    flush_hunk(&post_image, &added, &mut changes);

    changes
}

fn flush_hunk(post_image: &[(u32, &str)], added: &[usize], out: &mut Vec<LineChange>) {
    for &idx in added {
        let (line, content) = post_image[idx];
        let lo = idx.saturating_sub(CONTEXT_RADIUS);
        let hi = (idx + CONTEXT_RADIUS + 1).min(post_image.len());
        let context = (lo..hi)
            .filter(|&i| i != idx)
            .map(|i| post_image[i].1.to_string())
            .collect();
        out.push(LineChange {
            line,
            content: content.to_string(),
            context,
        });
    }
}

/// Split a multi-file `git diff` into per-file added lines.
///
/// Files are keyed by their post-image path (`+++ b/<path>`); deleted files
/// (`+++ /dev/null`) fall back to the `diff --git` header path.
pub fn parse_unified_diff(diff: &str) -> BTreeMap<String, Vec<LineChange>> {
    let mut files = BTreeMap::new();
    let mut current_path: Option<String> = None;
    let mut current_body = String::new();
    let mut in_hunks = false;

    let mut flush = |path: Option<String>, body: &str| {
        if let Some(path) = path {
            files.insert(path, parse_hunks(body));
        }
    };

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush(current_path.take(), &current_body);
            current_body.clear();
            in_hunks = false;
            current_path = rest.rsplit_once(" b/").map(|(_, path)| path.to_string());
            continue;
        }
        if !in_hunks {
            if let Some(path) = line.strip_prefix("+++ ") {
                if path != "/dev/null" {
                    current_path = Some(path.strip_prefix("b/").unwrap_or(path).to_string());
                }
                continue;
            }
            in_hunks = line.starts_with("@@");
        }
        current_body.push_str(line);
        current_body.push('\n');
    }
    flush(current_path.take(), &current_body);

    if files.is_empty() && !diff.trim().is_empty() {
        warn!("unified diff contained no recognizable file sections");
    }
    files
}

/// Post-image lines added by both change sets, per shared file.
pub fn overlap(a: &ChangeSet, b: &ChangeSet) -> ConflictingFiles {
    let mut result = ConflictingFiles::new();

    for (path, a_changes) in &a.hunks {
        let b_changes = b.changes_for(path);
        if b_changes.is_empty() {
            continue;
        }
        let lines: Vec<u32> = a_changes
            .iter()
            .filter(|ac| b_changes.iter().any(|bc| bc.line == ac.line))
            .map(|ac| ac.line)
            .collect();
        if !lines.is_empty() {
            result.insert(path.clone(), lines);
        }
    }

    let result = normalize_lines(result);
    debug!(
        a = a.proposal_id,
        b = b.proposal_id,
        files = result.len(),
        "patch overlap computed"
    );
    result
}

/// Strategy wrapper around [`overlap`]. Stateless and safe to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchOverlapAnalyzer;

impl ConflictStrategy for PatchOverlapAnalyzer {
    fn kind(&self) -> DetectionStrategy {
        DetectionStrategy::Patch
    }

    fn compare(&self, focal: Side<'_>, other: Side<'_>) -> Result<ConflictingFiles, DetectionError> {
        Ok(overlap(focal.changes, other.changes))
    }
}
