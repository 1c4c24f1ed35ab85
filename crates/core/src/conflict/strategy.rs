//! Common interface of the conflict-detection strategies.

use crate::errors::DetectionError;
use crate::models::{ChangeProposalRef, ChangeSet, ConflictingFiles, DetectionStrategy};

/// One side of a pairwise comparison.
#[derive(Debug, Clone, Copy)]
pub struct Side<'a> {
    pub proposal: &'a ChangeProposalRef,
    pub changes: &'a ChangeSet,
}

impl<'a> Side<'a> {
    pub fn new(proposal: &'a ChangeProposalRef, changes: &'a ChangeSet) -> Self {
        Self { proposal, changes }
    }
}

/// Decides which lines two pull requests both touch in a conflicting way.
///
/// Implementations return per-file line numbers, each vector ascending and
/// deduplicated. An empty map means the pair does not conflict. An error
/// means the pair could not be evaluated.
pub trait ConflictStrategy: Send + Sync {
    /// Which algorithm this is, for reporting.
    fn kind(&self) -> DetectionStrategy;

    /// Compare `focal` against `other`.
    fn compare(&self, focal: Side<'_>, other: Side<'_>) -> Result<ConflictingFiles, DetectionError>;
}
