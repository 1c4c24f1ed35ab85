//! End-to-end conflict detection against real git repositories.
//!
//! An "origin" repository holds one branch per pull request; the workspace
//! is a clone of it. Pull request metadata comes from an in-memory source,
//! so no network I/O is involved.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use git2::build::CheckoutBuilder;
use git2::{Repository, Signature};
use tempfile::TempDir;

use mergewatch_core::conflict::{MergeSimulator, OverlapPrefilter, PatchOverlapAnalyzer};
use mergewatch_core::errors::{CoreError, GitHubError};
use mergewatch_core::git::GitWorkspace;
use mergewatch_core::models::{ChangeProposalRef, ChangeSet};
use mergewatch_core::{ConflictEngine, ProposalSource};

// ===========================================================================
// Helpers
// ===========================================================================

const BASE_A: &str = "line 1\nline 2\nline 3\nline 4\nline 5\nline 6\nline 7\nline 8\nline 9\nline 10\n";

#[derive(Default)]
struct StaticSource {
    proposals: Vec<ChangeProposalRef>,
    change_sets: HashMap<u64, ChangeSet>,
}

impl StaticSource {
    fn add(&mut self, id: u64, branch: &str, author: &str, files: &[&str]) {
        self.proposals.push(ChangeProposalRef::new(id, branch, author));
        self.change_sets.insert(
            id,
            ChangeSet::new(id, files.iter().map(|f| f.to_string()), BTreeMap::new()),
        );
    }
}

impl ProposalSource for StaticSource {
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

fn commit_files(repo: &Repository, files: &[(&str, &str)], message: &str) {
    let workdir = repo.workdir().unwrap().to_path_buf();
    let mut index = repo.index().unwrap();
    for (path, content) in files {
        std::fs::write(workdir.join(path), content).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}

/// Create `branch` off `base` in `repo` and commit `files` onto it.
fn branch_with(repo: &Repository, base: &str, branch: &str, files: &[(&str, &str)]) {
    let base_commit = repo
        .find_branch(base, git2::BranchType::Local)
        .unwrap()
        .get()
        .peel_to_commit()
        .unwrap();
    repo.branch(branch, &base_commit, false).unwrap();
    repo.set_head(&format!("refs/heads/{}", branch)).unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();
    commit_files(repo, files, branch);
}

struct Fixture {
    _dir: TempDir,
    clone: Repository,
    workspace: GitWorkspace,
    main: String,
}

/// Origin with the scenario branches, and a clone opened as workspace.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let origin_path = dir.path().join("origin");
    let origin = Repository::init(&origin_path).unwrap();
    commit_files(
        &origin,
        &[("a.txt", BASE_A), ("b.txt", "b1\nb2\n"), ("c.txt", "c1\nc2\n")],
        "init",
    );
    let main = origin.head().unwrap().shorthand().unwrap().to_string();

    let a_focal = BASE_A.replace("line 5\nline 6\n", "five alice\nsix alice\n");
    branch_with(&origin, &main, "alice/focal", &[("a.txt", &a_focal)]);

    let a_bob = BASE_A.replace("line 6\n", "six bob\n");
    branch_with(
        &origin,
        &main,
        "bob/seven",
        &[("a.txt", &a_bob), ("b.txt", "b1 bob\nb2\n")],
    );

    branch_with(&origin, &main, "carol/eight", &[("c.txt", "c1\nc2 carol\n")]);

    let a_dave = BASE_A.replace("line 10\n", "ten dave\n");
    branch_with(&origin, &main, "dave/far", &[("a.txt", &a_dave)]);

    // The clone checks out whatever origin's HEAD points at.
    origin.set_head(&format!("refs/heads/{}", main)).unwrap();
    origin
        .checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();

    let clone_path = dir.path().join("clone");
    let clone = Repository::clone(origin_path.to_str().unwrap(), &clone_path).unwrap();
    let workspace = GitWorkspace::open(&clone_path, "origin", None).unwrap();

    Fixture {
        _dir: dir,
        clone,
        workspace,
        main,
    }
}

fn scenario_source() -> StaticSource {
    let mut source = StaticSource::default();
    source.add(1, "alice/focal", "alice", &["a.txt"]);
    source.add(7, "bob/seven", "bob", &["a.txt", "b.txt"]);
    source.add(8, "carol/eight", "carol", &["c.txt"]);
    source
}

fn temp_refs(repo: &Repository) -> Vec<String> {
    repo.references_glob("refs/heads/tmp_*")
        .unwrap()
        .filter_map(|r| r.ok().and_then(|r| r.name().map(str::to_string)))
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn merge_strategy_finds_overlapping_edit() {
    let fx = fixture();
    let simulator = MergeSimulator::new(fx.workspace, Some(fx.main.clone()));
    let engine = ConflictEngine::new(Arc::new(scenario_source()), Box::new(simulator));

    let report = engine.run(1).await.unwrap();

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.other.id, 7);
    assert_eq!(record.conflicting_files.keys().collect::<Vec<_>>(), vec!["a.txt"]);
    // Alice rewrote lines 5-6 and bob line 6; git reports both lines of the
    // overlapping region, and both differ between the two sides.
    assert_eq!(record.conflicting_files["a.txt"], vec![5, 6]);
    assert_eq!(report.reviewers.iter().collect::<Vec<_>>(), vec!["bob"]);
    assert!(report.skipped.is_empty());

    assert!(temp_refs(&fx.clone).is_empty());
    assert_eq!(
        fx.clone.head().unwrap().shorthand(),
        Some(fx.main.as_str())
    );
    let a = std::fs::read_to_string(fx.clone.workdir().unwrap().join("a.txt")).unwrap();
    assert_eq!(a, BASE_A);
}

#[tokio::test]
async fn merge_strategy_same_file_without_conflict() {
    let fx = fixture();
    let mut source = StaticSource::default();
    source.add(1, "alice/focal", "alice", &["a.txt"]);
    source.add(9, "dave/far", "dave", &["a.txt"]);

    let simulator = MergeSimulator::new(fx.workspace, None);
    let engine = ConflictEngine::new(Arc::new(source), Box::new(simulator));
    let report = engine.run(1).await.unwrap();

    assert!(!report.has_conflicts());
    assert!(report.reviewers.is_empty());
    assert!(temp_refs(&fx.clone).is_empty());
}

#[tokio::test]
async fn deleted_branch_is_skipped_and_run_continues() {
    let fx = fixture();
    let mut source = scenario_source();
    source.add(12, "erin/deleted", "erin", &["a.txt"]);

    let simulator = MergeSimulator::new(fx.workspace, None);
    let engine = ConflictEngine::new(Arc::new(source), Box::new(simulator));
    let report = engine.run(1).await.unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].proposal_id, 12);
    assert!(temp_refs(&fx.clone).is_empty());
}

#[tokio::test]
async fn ignored_paths_are_not_compared() {
    let fx = fixture();
    let simulator = MergeSimulator::new(fx.workspace, None);
    let engine = ConflictEngine::new(Arc::new(scenario_source()), Box::new(simulator))
        .with_prefilter(OverlapPrefilter::new(vec!["a.txt".into()]));

    let report = engine.run(1).await.unwrap();
    assert!(!report.has_conflicts());
}

#[test]
fn sweep_removes_leftover_refs() {
    let fx = fixture();
    let head = fx.clone.head().unwrap().peel_to_commit().unwrap();
    fx.clone.branch("tmp_left_behind", &head, false).unwrap();
    fx.clone.branch("tmp_other", &head, false).unwrap();

    let simulator = MergeSimulator::new(fx.workspace, None);
    assert_eq!(simulator.sweep_stale_refs().unwrap(), 2);
    assert!(temp_refs(&fx.clone).is_empty());
    assert!(fx
        .clone
        .find_branch(&fx.main, git2::BranchType::Local)
        .is_ok());
}

#[tokio::test]
async fn patch_strategy_needs_no_workspace() {
    let mut source = StaticSource::default();
    let focal = diffy::create_patch(BASE_A, &BASE_A.replace("line 5\n", "line 5\nnew six\n")).to_string();
    let other = diffy::create_patch(BASE_A, &BASE_A.replace("line 5\n", "line 5\nother six\n")).to_string();
    for (id, author, patch) in [(1, "alice", focal), (2, "bob", other)] {
        source.proposals.push(ChangeProposalRef::new(id, format!("b{}", id), author));
        let mut hunks = BTreeMap::new();
        hunks.insert(
            "a.txt".to_string(),
            mergewatch_core::conflict::patch::parse_hunks(&patch),
        );
        source.change_sets.insert(id, ChangeSet::new(id, Vec::new(), hunks));
    }

    let engine = ConflictEngine::new(Arc::new(source), Box::new(PatchOverlapAnalyzer));
    let report = engine.run(1).await.unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].conflicting_files["a.txt"], vec![6]);
}
