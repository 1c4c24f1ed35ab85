//! Merge-attempt based conflict detection.
//!
//! For each pair the simulator fetches both branches into temporary refs,
//! checks out the focal side (optionally after absorbing the integration
//! branch), attempts a no-commit merge of the other side, and parses the
//! conflict markers left in the working tree.
//!
//! The workspace is a single shared checkout. It lives behind a mutex and
//! every comparison runs inside a [`PairSession`] whose `Drop` aborts the
//! merge, resets the tree, restores the original HEAD, and deletes the
//! temporary refs, so no pair can observe another pair's state.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, instrument, warn};

use super::markers::conflicting_lines;
use super::strategy::{ConflictStrategy, Side};
use crate::errors::{DetectionError, GitError};
use crate::git::workspace::{temp_ref_name, MergeOutcome, MergeWorkspace, TEMP_REF_PREFIX};
use crate::models::{normalize_lines, ConflictingFiles, DetectionStrategy};

/// Detects conflicts by actually merging branches in a scratch workspace.
pub struct MergeSimulator<W: MergeWorkspace> {
    workspace: Mutex<W>,
    /// Branch merged into the focal side before comparing, if any.
    integration_branch: Option<String>,
}

impl<W: MergeWorkspace> MergeSimulator<W> {
    pub fn new(workspace: W, integration_branch: Option<String>) -> Self {
        Self {
            workspace: Mutex::new(workspace),
            integration_branch,
        }
    }

    /// Give back the workspace.
    pub fn into_workspace(self) -> W {
        self.workspace
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete temporary refs left behind by an aborted earlier run.
    ///
    /// Returns the number of refs removed.
    #[instrument(skip(self))]
    pub fn sweep_stale_refs(&self) -> Result<usize, DetectionError> {
        let mut workspace = self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let prefix = format!("refs/heads/{}", TEMP_REF_PREFIX);
        let stale = workspace
            .list_refs(&prefix)
            .map_err(|e| DetectionError::Cleanup(e.to_string()))?;
        if stale.is_empty() {
            debug!("no stale temporary refs");
            return Ok(0);
        }

        // HEAD may still be attached to one of the stale refs.
        restore_workspace(&mut *workspace);

        let mut removed = 0;
        for reference in &stale {
            match workspace.delete_ref(reference) {
                Ok(()) => removed += 1,
                Err(e) => error!(reference = %reference, error = %e, "failed to delete stale ref"),
            }
        }
        info!(removed, found = stale.len(), "swept stale temporary refs");
        Ok(removed)
    }

    fn simulate(
        &self,
        session: &mut PairSession<'_, W>,
        focal: Side<'_>,
        other: Side<'_>,
    ) -> Result<ConflictingFiles, DetectionError> {
        let other_id = other.proposal.id;
        let sim_err = |e: GitError| DetectionError::MergeSimulation {
            proposal: other_id,
            detail: e.to_string(),
        };

        let ours = session.fetch(&focal.proposal.branch)?;
        let theirs = session.fetch(&other.proposal.branch)?;
        let base = match &self.integration_branch {
            Some(branch) => Some((branch.as_str(), session.fetch(branch)?)),
            None => None,
        };

        session.workspace.checkout(&ours).map_err(sim_err)?;

        if let Some((branch, base_ref)) = base {
            match session.workspace.merge(&base_ref).map_err(sim_err)? {
                MergeOutcome::Clean => {
                    let message = format!("Merge {} into {}", branch, focal.proposal.branch);
                    session.workspace.commit_merge(&message).map_err(sim_err)?;
                    debug!(branch, "integration branch absorbed");
                }
                MergeOutcome::Conflict(paths) => {
                    return Err(DetectionError::MergeSimulation {
                        proposal: other_id,
                        detail: format!(
                            "#{} conflicts with integration branch '{}' in {} file(s)",
                            focal.proposal.id,
                            branch,
                            paths.len()
                        ),
                    });
                }
            }
        }

        let paths = match session.workspace.merge(&theirs).map_err(sim_err)? {
            MergeOutcome::Clean => {
                debug!(other = other_id, "merge is clean");
                return Ok(ConflictingFiles::new());
            }
            MergeOutcome::Conflict(paths) => paths,
        };

        let mut files = ConflictingFiles::new();
        for path in paths {
            match session.workspace.read_working_file(&path) {
                Ok(content) => {
                    files.insert(path, conflicting_lines(&content));
                }
                // Delete/modify and binary conflicts leave nothing to parse.
                Err(e) => debug!(path = %path, error = %e, "conflicted file has no readable markers"),
            }
        }
        Ok(normalize_lines(files))
    }
}

impl<W: MergeWorkspace + Send> ConflictStrategy for MergeSimulator<W> {
    fn kind(&self) -> DetectionStrategy {
        DetectionStrategy::Merge
    }

    #[instrument(skip_all, fields(focal = focal.proposal.id, other = other.proposal.id))]
    fn compare(&self, focal: Side<'_>, other: Side<'_>) -> Result<ConflictingFiles, DetectionError> {
        let mut workspace = self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut session = PairSession::new(&mut *workspace);
        let result = self.simulate(&mut session, focal, other);
        drop(session);

        if let Ok(files) = &result {
            info!(files = files.len(), "merge simulation complete");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Session guard
// ---------------------------------------------------------------------------

/// Exclusive use of the workspace for one pair, with cleanup on drop.
struct PairSession<'a, W: MergeWorkspace> {
    workspace: &'a mut W,
    temp_refs: Vec<String>,
}

impl<'a, W: MergeWorkspace> PairSession<'a, W> {
    fn new(workspace: &'a mut W) -> Self {
        Self {
            workspace,
            temp_refs: Vec::new(),
        }
    }

    /// Fetch `branch` into a fresh temporary ref owned by this session.
    fn fetch(&mut self, branch: &str) -> Result<String, DetectionError> {
        let base = temp_ref_name(branch);
        let mut name = base.clone();
        let mut n = 2;
        while self.temp_refs.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        // Registered before fetching so a partial fetch is still cleaned up.
        self.temp_refs.push(name.clone());

        self.workspace
            .fetch(branch, &name)
            .map_err(|e| DetectionError::RefResolution {
                reference: branch.to_string(),
                detail: e.to_string(),
            })?;
        Ok(name)
    }
}

impl<W: MergeWorkspace> Drop for PairSession<'_, W> {
    fn drop(&mut self) {
        restore_workspace(&mut *self.workspace);
        for reference in self.temp_refs.drain(..) {
            if let Err(e) = self.workspace.delete_ref(&reference) {
                let err = DetectionError::Cleanup(format!("deleting {}: {}", reference, e));
                error!(error = %err, "temporary ref left behind");
            }
        }
    }
}

/// Abort any merge, hard reset, and return HEAD to its original position.
/// Failures are logged and never propagated.
fn restore_workspace<W: MergeWorkspace>(workspace: &mut W) {
    if let Err(e) = workspace.abort_merge() {
        error!(error = %DetectionError::Cleanup(e.to_string()), "abort merge failed");
    }
    if let Err(e) = workspace.reset_hard() {
        error!(error = %DetectionError::Cleanup(e.to_string()), "hard reset failed");
    }
    if let Err(e) = workspace.restore_original() {
        warn!(error = %DetectionError::Cleanup(e.to_string()), "restoring original HEAD failed");
    }
}
