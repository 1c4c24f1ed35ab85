//! Pairwise conflict detection across all open pull requests.
//!
//! The [`ConflictEngine`] compares one focal pull request against every other
//! open pull request:
//!
//! 1. Change sets of all candidates are fetched from the [`ProposalSource`]
//!    with bounded concurrency.
//! 2. Each pair goes through the [`OverlapPrefilter`]; pairs without shared
//!    files are clean and never reach a strategy.
//! 3. Remaining pairs are evaluated one at a time by the configured
//!    [`ConflictStrategy`]. The merge strategy owns a single workspace, so
//!    pairs are never evaluated concurrently.
//! 4. Pairs that could not be evaluated are logged and listed as skipped.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::conflict::prefilter::OverlapPrefilter;
use crate::conflict::strategy::{ConflictStrategy, Side};
use crate::errors::{CoreError, DetectionError};
use crate::models::{ChangeProposalRef, ChangeSet, ConflictRecord, ConflictReport, SkippedPair};

/// Default number of change sets fetched at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Where open pull requests and their change sets come from.
pub trait ProposalSource: Send + Sync + 'static {
    fn list_open_proposals(
        &self,
    ) -> impl Future<Output = Result<Vec<ChangeProposalRef>, CoreError>> + Send;

    fn get_change_set(&self, id: u64) -> impl Future<Output = Result<ChangeSet, CoreError>> + Send;
}

/// Runs a detection strategy across all pairs involving one pull request.
pub struct ConflictEngine<S: ProposalSource> {
    source: Arc<S>,
    strategy: Box<dyn ConflictStrategy>,
    prefilter: OverlapPrefilter,
    max_concurrent_fetches: usize,
}

impl<S: ProposalSource> ConflictEngine<S> {
    pub fn new(source: Arc<S>, strategy: Box<dyn ConflictStrategy>) -> Self {
        Self {
            source,
            strategy,
            prefilter: OverlapPrefilter::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    pub fn with_prefilter(mut self, prefilter: OverlapPrefilter) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    /// List open pull requests, build the focal change set, and detect
    /// conflicts against every other open pull request.
    ///
    /// Fails only when the focal pull request itself cannot be loaded.
    #[instrument(skip(self))]
    pub async fn run(&self, focal_id: u64) -> Result<ConflictReport, CoreError> {
        let proposals = self.source.list_open_proposals().await?;
        let focal = proposals
            .iter()
            .find(|p| p.id == focal_id)
            .cloned()
            .ok_or_else(|| DetectionError::FocalChangeSet {
                id: focal_id,
                detail: "not among open pull requests".into(),
            })?;

        let focal_changes = self
            .source
            .get_change_set(focal_id)
            .await
            .map_err(|e| DetectionError::FocalChangeSet {
                id: focal_id,
                detail: e.to_string(),
            })?;

        Ok(self.detect_conflicts(&focal, &focal_changes, &proposals).await)
    }

    /// Compare `focal` against each candidate and aggregate the results.
    ///
    /// The focal pull request is skipped if it appears among the candidates.
    pub async fn detect_conflicts(
        &self,
        focal: &ChangeProposalRef,
        focal_changes: &ChangeSet,
        candidates: &[ChangeProposalRef],
    ) -> ConflictReport {
        let others: Vec<&ChangeProposalRef> =
            candidates.iter().filter(|c| c.id != focal.id).collect();
        info!(
            focal = focal.id,
            candidates = others.len(),
            strategy = %self.strategy.kind(),
            "detecting conflicts"
        );

        let ids: Vec<u64> = others.iter().map(|p| p.id).collect();
        let mut change_sets = self.fetch_change_sets(&ids).await;

        let mut records = Vec::new();
        let mut skipped = Vec::new();

        for other in others {
            let changes = match change_sets.remove(&other.id) {
                Some(Ok(changes)) => changes,
                Some(Err(e)) => {
                    let err = DetectionError::ChangeSetUnavailable {
                        id: other.id,
                        detail: e.to_string(),
                    };
                    warn!(error = %err, "skipping pull request");
                    skipped.push(skip(other.id, &err));
                    continue;
                }
                None => {
                    let err = DetectionError::ChangeSetUnavailable {
                        id: other.id,
                        detail: "fetch task did not complete".into(),
                    };
                    warn!(error = %err, "skipping pull request");
                    skipped.push(skip(other.id, &err));
                    continue;
                }
            };

            let shared = self.prefilter.overlapping_files(focal_changes, &changes);
            if shared.is_empty() {
                debug!(other = other.id, "no shared files");
                continue;
            }

            match self
                .strategy
                .compare(Side::new(focal, focal_changes), Side::new(other, &changes))
            {
                Ok(mut files) => {
                    files.retain(|path, _| !self.prefilter.is_ignored(path));
                    if files.is_empty() {
                        debug!(other = other.id, shared = shared.len(), "shared files but no conflicting lines");
                        continue;
                    }
                    info!(other = other.id, files = files.len(), "conflict detected");
                    records.push(ConflictRecord {
                        other: other.clone(),
                        conflicting_files: files,
                    });
                }
                Err(e) => {
                    match &e {
                        DetectionError::RefResolution { .. } => {
                            warn!(other = other.id, error = %e, "branch could not be resolved, skipping pair")
                        }
                        _ => warn!(other = other.id, error = %e, "pair is indeterminate, skipping"),
                    }
                    skipped.push(skip(other.id, &e));
                }
            }
        }

        let reviewers = reviewers_for(&records, &focal.author);
        info!(
            focal = focal.id,
            conflicts = records.len(),
            skipped = skipped.len(),
            "conflict detection complete"
        );

        ConflictReport {
            focal_id: focal.id,
            focal_author: focal.author.clone(),
            strategy: self.strategy.kind(),
            records,
            reviewers,
            skipped,
            generated_at: Utc::now(),
        }
    }

    async fn fetch_change_sets(&self, ids: &[u64]) -> HashMap<u64, Result<ChangeSet, CoreError>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let mut tasks = JoinSet::new();

        for &id in ids {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (id, source.get_change_set(id).await)
            });
        }

        let mut results = HashMap::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    results.insert(id, result);
                }
                Err(e) => error!(error = %e, "change set fetch task failed"),
            }
        }
        results
    }
}

fn skip(proposal_id: u64, err: &DetectionError) -> SkippedPair {
    SkippedPair {
        proposal_id,
        reason: err.to_string(),
    }
}

/// Distinct authors of conflicting pull requests, minus the focal author.
fn reviewers_for(records: &[ConflictRecord], focal_author: &str) -> BTreeSet<String> {
    records
        .iter()
        .map(|r| r.other.author.as_str())
        .filter(|author| !author.is_empty() && *author != focal_author)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::conflict::patch::{parse_hunks, PatchOverlapAnalyzer};
    use crate::errors::GitHubError;
    use crate::models::{ConflictingFiles, DetectionStrategy};

    /// In-memory source keyed by pull request number.
    #[derive(Default)]
    struct FakeSource {
        proposals: Vec<ChangeProposalRef>,
        change_sets: HashMap<u64, ChangeSet>,
    }

    impl FakeSource {
        fn add(&mut self, id: u64, author: &str, patches: &[(&str, &str)]) {
            self.proposals
                .push(ChangeProposalRef::new(id, format!("pr-{}", id), author));
            let hunks: BTreeMap<String, _> = patches
                .iter()
                .map(|(path, patch)| (path.to_string(), parse_hunks(patch)))
                .collect();
            self.change_sets
                .insert(id, ChangeSet::new(id, Vec::new(), hunks));
        }
    }

    impl ProposalSource for FakeSource {
        async fn list_open_proposals(&self) -> Result<Vec<ChangeProposalRef>, CoreError> {
            Ok(self.proposals.clone())
        }

        async fn get_change_set(&self, id: u64) -> Result<ChangeSet, CoreError> {
            self.change_sets
                .get(&id)
                .cloned()
                .ok_or_else(|| GitHubError::PullRequestNotFound(id).into())
        }
    }

    /// Strategy that counts invocations and reports every shared file.
    #[derive(Default)]
    struct CountingStrategy {
        calls: AtomicUsize,
    }

    impl ConflictStrategy for CountingStrategy {
        fn kind(&self) -> DetectionStrategy {
            DetectionStrategy::Merge
        }

        fn compare(&self, focal: Side<'_>, other: Side<'_>) -> Result<ConflictingFiles, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if other.proposal.branch == "pr-99" {
                return Err(DetectionError::RefResolution {
                    reference: "pr-99".into(),
                    detail: "gone".into(),
                });
            }
            Ok(focal
                .changes
                .files
                .intersection(&other.changes.files)
                .map(|f| (f.clone(), vec![1]))
                .collect())
        }
    }

    /// Focal touches a.txt lines 5-6; #7 touches a.txt line 6 and b.txt
    /// line 1; #8 touches only c.txt.
    fn scenario() -> FakeSource {
        let mut source = FakeSource::default();
        source.add(1, "alice", &[("a.txt", "@@ -4,3 +4,4 @@\n four\n+five\n+six\n seven\n")]);
        source.add(
            7,
            "bob",
            &[
                ("a.txt", "@@ -5,2 +5,3 @@\n five\n+six\n seven\n"),
                ("b.txt", "@@ -0,0 +1 @@\n+hello\n"),
            ],
        );
        source.add(8, "carol", &[("c.txt", "@@ -1,1 +1,2 @@\n x\n+y\n")]);
        source
    }

    #[tokio::test]
    async fn test_end_to_end_patch_strategy() {
        let engine = ConflictEngine::new(Arc::new(scenario()), Box::new(PatchOverlapAnalyzer));
        let report = engine.run(1).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].other.id, 7);
        let mut expected = ConflictingFiles::new();
        expected.insert("a.txt".into(), vec![6]);
        assert_eq!(report.records[0].conflicting_files, expected);
        assert_eq!(report.reviewers.iter().collect::<Vec<_>>(), vec!["bob"]);
        assert_eq!(report.strategy, DetectionStrategy::Patch);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_disjoint_files_never_reach_strategy() {
        let mut source = FakeSource::default();
        source.add(1, "alice", &[("a.txt", "@@ -1 +1,2 @@\n a\n+b\n")]);
        source.add(2, "bob", &[("z.txt", "@@ -1 +1,2 @@\n a\n+b\n")]);
        let strategy = Arc::new(CountingStrategy::default());

        struct Shared(Arc<CountingStrategy>);
        impl ConflictStrategy for Shared {
            fn kind(&self) -> DetectionStrategy {
                self.0.kind()
            }
            fn compare(&self, a: Side<'_>, b: Side<'_>) -> Result<ConflictingFiles, DetectionError> {
                self.0.compare(a, b)
            }
        }

        let engine = ConflictEngine::new(Arc::new(source), Box::new(Shared(Arc::clone(&strategy))));
        let report = engine.run(1).await.unwrap();

        assert!(!report.has_conflicts());
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_focal_author_never_reviewer() {
        let mut source = FakeSource::default();
        source.add(1, "alice", &[("a.txt", "@@ -1 +1,2 @@\n a\n+b\n")]);
        source.add(2, "alice", &[("a.txt", "@@ -1 +1,2 @@\n a\n+c\n")]);
        source.add(3, "dave", &[("a.txt", "@@ -1 +1,2 @@\n a\n+d\n")]);
        let engine = ConflictEngine::new(Arc::new(source), Box::new(PatchOverlapAnalyzer));

        let report = engine.run(1).await.unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.reviewers.iter().collect::<Vec<_>>(), vec!["dave"]);
    }

    #[tokio::test]
    async fn test_indeterminate_pairs_are_skipped() {
        let mut source = scenario();
        source.add(99, "erin", &[("a.txt", "@@ -1 +1,2 @@\n a\n+b\n")]);
        source
            .proposals
            .push(ChangeProposalRef::new(100, "pr-100", "frank"));
        let engine = ConflictEngine::new(Arc::new(source), Box::new(CountingStrategy::default()))
            .with_max_concurrent_fetches(1);

        let report = engine.run(1).await.unwrap();
        let skipped: Vec<u64> = report.skipped.iter().map(|s| s.proposal_id).collect();
        assert!(skipped.contains(&99));
        assert!(skipped.contains(&100));
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].other.id, 7);
    }

    #[tokio::test]
    async fn test_missing_focal_is_fatal() {
        let engine = ConflictEngine::new(Arc::new(scenario()), Box::new(PatchOverlapAnalyzer));
        let err = engine.run(42).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Detection(DetectionError::FocalChangeSet { id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_ignored_files_excluded() {
        let mut source = FakeSource::default();
        source.add(1, "alice", &[("Cargo.lock", "@@ -1 +1,2 @@\n a\n+b\n")]);
        source.add(2, "bob", &[("Cargo.lock", "@@ -1 +1,2 @@\n a\n+c\n")]);
        let engine = ConflictEngine::new(Arc::new(source), Box::new(PatchOverlapAnalyzer))
            .with_prefilter(OverlapPrefilter::new(vec!["Cargo.lock".into()]));

        let report = engine.run(1).await.unwrap();
        assert!(!report.has_conflicts());
    }
}
