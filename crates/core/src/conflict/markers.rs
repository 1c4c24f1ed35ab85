//! Extraction of conflicting line numbers from merge-conflict markers.
//!
//! A file left behind by a failed merge contains blocks of the form
//!
//! ```text
//! <<<<<<< ours
//! ours lines
//! ||||||| base        (diff3 style only)
//! base lines
//! =======
//! theirs lines
//! >>>>>>> theirs
//! ```
//!
//! Only lines outside these blocks advance the line counter, so a block is
//! anchored at the 1-based line number its first line would have once
//! resolved. Within a
//! block, ours and theirs are compared index by index and only positions
//! whose content actually differs are reported.

use tracing::trace;

const OURS_MARKER: &str = "<<<<<<<";
const BASE_MARKER: &str = "|||||||";
const SEPARATOR_MARKER: &str = "=======";
const THEIRS_MARKER: &str = ">>>>>>>";

/// Parser position relative to conflict blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Normal,
    InOurs,
    InBase,
    InTheirs,
}

/// Return the line numbers where the two sides of each conflict block diverge.
///
/// The result is in block order and may contain duplicates; callers sort and
/// deduplicate. When one side of a block is longer than the other, only the
/// indices present on both sides are compared.
pub fn conflicting_lines(content: &str) -> Vec<u32> {
    let mut state = ParseState::Normal;
    let mut line_number: u32 = 0;
    let mut block_start: u32 = 0;
    let mut ours: Vec<&str> = Vec::new();
    let mut theirs: Vec<&str> = Vec::new();
    let mut result = Vec::new();

    for line in content.lines() {
        match state {
            ParseState::Normal => {
                if line.starts_with(OURS_MARKER) {
                    state = ParseState::InOurs;
                    block_start = line_number + 1;
                    ours.clear();
                    theirs.clear();
                } else {
                    line_number += 1;
                }
            }
            ParseState::InOurs => {
                if line.starts_with(SEPARATOR_MARKER) {
                    state = ParseState::InTheirs;
                } else if line.starts_with(BASE_MARKER) {
                    state = ParseState::InBase;
                } else {
                    ours.push(line);
                }
            }
            ParseState::InBase => {
                if line.starts_with(SEPARATOR_MARKER) {
                    state = ParseState::InTheirs;
                }
            }
            ParseState::InTheirs => {
                if line.starts_with(THEIRS_MARKER) {
                    state = ParseState::Normal;
                    let diverging = diverging_lines(block_start, &ours, &theirs);
                    trace!(
                        block_start,
                        ours = ours.len(),
                        theirs = theirs.len(),
                        diverging = diverging.len(),
                        "resolved conflict block"
                    );
                    result.extend(diverging);
                } else {
                    theirs.push(line);
                }
            }
        }
    }

    result
}

/// Compare both sides over the shorter length and emit `start + index` for
/// every differing index.
fn diverging_lines(start: u32, ours: &[&str], theirs: &[&str]) -> Vec<u32> {
    ours.iter()
        .zip(theirs.iter())
        .enumerate()
        .filter(|(_, (o, t))| o != t)
        .map(|(index, _)| start + index as u32)
        .collect()
}
