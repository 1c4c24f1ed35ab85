//! Version-control operations needed to simulate a merge.
//!
//! [`MergeWorkspace`] is the seam between the merge simulator and the real
//! repository. Merges report a structured [`MergeOutcome`] so callers never
//! have to interpret tool output, and tests can drive the simulator with an
//! in-memory fake.

use crate::errors::GitError;

/// Prefix of the short names of temporary branches created for a comparison.
pub const TEMP_REF_PREFIX: &str = "tmp_";

/// Full ref name of the temporary branch for `branch`.
pub fn temp_ref_name(branch: &str) -> String {
    format!("refs/heads/{}{}", TEMP_REF_PREFIX, branch)
}

/// Result of a merge attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge applied without conflicts (or there was nothing to merge).
    Clean,
    /// The merge left these paths unmerged.
    Conflict(Vec<String>),
}

/// A single working copy that can be checked out, merged into, and reset.
///
/// All mutating methods take `&mut self`: the workspace holds one checkout
/// and one merge state, so callers must serialize access to it.
pub trait MergeWorkspace {
    /// Fetch `branch` from the remote into the full ref name `destination`,
    /// replacing any existing ref of that name.
    fn fetch(&mut self, branch: &str, destination: &str) -> Result<(), GitError>;

    /// Force-checkout `reference` and attach HEAD to it.
    fn checkout(&mut self, reference: &str) -> Result<(), GitError>;

    /// Merge `reference` into the working tree without committing and
    /// without fast-forwarding HEAD.
    fn merge(&mut self, reference: &str) -> Result<MergeOutcome, GitError>;

    /// Commit a clean pending merge onto the checked-out branch.
    fn commit_merge(&mut self, message: &str) -> Result<(), GitError>;

    /// Paths left unmerged by the last merge.
    fn unmerged_paths(&self) -> Result<Vec<String>, GitError>;

    /// Current working-tree content of `path`.
    fn read_working_file(&self, path: &str) -> Result<String, GitError>;

    /// Clear any in-progress merge state.
    fn abort_merge(&mut self) -> Result<(), GitError>;

    /// Reset index and working tree to HEAD.
    fn reset_hard(&mut self) -> Result<(), GitError>;

    /// Return HEAD to wherever it pointed when the workspace was opened.
    fn restore_original(&mut self) -> Result<(), GitError>;

    /// Delete `reference`. Deleting a missing ref succeeds.
    fn delete_ref(&mut self, reference: &str) -> Result<(), GitError>;

    /// Full names of refs starting with `prefix`.
    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, GitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_ref_name() {
        assert_eq!(temp_ref_name("feature/login"), "refs/heads/tmp_feature/login");
    }
}
