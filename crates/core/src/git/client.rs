//! Local Git workspace operations via `git2`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    Cred, ErrorCode, FetchOptions, MergeOptions, ObjectType, Oid, RemoteCallbacks, Repository,
    ResetType, Signature,
};
use tracing::{debug, info, instrument, warn};

use super::workspace::{MergeOutcome, MergeWorkspace, TEMP_REF_PREFIX};
use crate::errors::GitError;

const MERGE_AUTHOR_NAME: &str = "MergeWatch";
const MERGE_AUTHOR_EMAIL: &str = "mergewatch@localhost";

/// Where HEAD pointed when the workspace was opened.
#[derive(Debug, Clone)]
enum OriginalHead {
    Branch(String),
    Detached(Oid),
    Unborn,
}

/// A local clone used as the scratch area for merge simulations.
pub struct GitWorkspace {
    repo: Repository,
    repo_path: PathBuf,
    remote: String,
    token: Option<String>,
    original_head: OriginalHead,
}

impl GitWorkspace {
    /// Open an existing clone at `repo_path` that fetches from `remote`.
    pub fn open<P: AsRef<Path>>(
        repo_path: P,
        remote: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git workspace");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        if repo.is_bare() {
            return Err(GitError::RepositoryNotFound(format!(
                "{} (bare repositories have no working tree)",
                path.display()
            )));
        }
        let remote: String = remote.into();
        let original_head = current_head(&repo, &remote)?;
        debug!(?original_head, "recorded original HEAD");
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            remote,
            token,
            original_head,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = &self.token {
            let tok = tok.clone();
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        Ok(Signature::now(MERGE_AUTHOR_NAME, MERGE_AUTHOR_EMAIL)?)
    }
}

fn current_head(repo: &Repository, remote: &str) -> Result<OriginalHead, GitError> {
    let temp_prefix = format!("refs/heads/{}", TEMP_REF_PREFIX);
    match repo.head() {
        // Left on a temporary ref by an interrupted run; that ref is about to
        // be swept, so it cannot be what HEAD is restored to.
        Ok(head) if head.is_branch() && head.name().is_some_and(|n| n.starts_with(&temp_prefix)) => {
            match remote_default_branch(repo, remote) {
                Some(branch) => {
                    warn!(stale = ?head.name(), branch = %branch, "HEAD on a temporary ref, using remote default branch");
                    Ok(OriginalHead::Branch(branch))
                }
                None => {
                    warn!(stale = ?head.name(), "HEAD on a temporary ref, detaching at its commit");
                    Ok(OriginalHead::Detached(head.peel_to_commit()?.id()))
                }
            }
        }
        Ok(head) if head.is_branch() => Ok(OriginalHead::Branch(
            head.name().unwrap_or("HEAD").to_string(),
        )),
        Ok(head) => Ok(OriginalHead::Detached(head.peel_to_commit()?.id())),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(OriginalHead::Unborn)
        }
        Err(e) => Err(e.into()),
    }
}

/// Local branch tracking `refs/remotes/<remote>/HEAD`, if both exist.
fn remote_default_branch(repo: &Repository, remote: &str) -> Option<String> {
    let remote_head = repo
        .find_reference(&format!("refs/remotes/{}/HEAD", remote))
        .ok()?;
    let target = remote_head.symbolic_target()?;
    let name = target.strip_prefix(&format!("refs/remotes/{}/", remote))?;
    let local = format!("refs/heads/{}", name);
    repo.find_reference(&local).ok().map(|_| local)
}

impl MergeWorkspace for GitWorkspace {
    #[instrument(skip(self), fields(remote = %self.remote))]
    fn fetch(&mut self, branch: &str, destination: &str) -> Result<(), GitError> {
        if let Ok(mut existing) = self.repo.find_reference(destination) {
            warn!(destination, "replacing existing ref before fetch");
            existing.delete()?;
        }

        let mut remote = self.repo.find_remote(&self.remote)?;
        let refspec = format!("+refs/heads/{}:{}", branch, destination);
        let mut fetch_opts = self.fetch_options();
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)
            .map_err(|e| {
                if e.code() == ErrorCode::NotFound {
                    GitError::RefNotFound(branch.to_string())
                } else {
                    GitError::Git2Error(e)
                }
            })?;

        // A refspec whose source does not exist fetches nothing without error.
        self.repo
            .find_reference(destination)
            .map_err(|_| GitError::RefNotFound(branch.to_string()))?;
        debug!(branch, destination, "fetched branch");
        Ok(())
    }

    #[instrument(skip(self))]
    fn checkout(&mut self, reference: &str) -> Result<(), GitError> {
        let target = self
            .repo
            .find_reference(reference)
            .map_err(|_| GitError::RefNotFound(reference.to_string()))?
            .peel(ObjectType::Commit)?;
        self.repo
            .checkout_tree(&target, Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head(reference)?;
        debug!(reference, "checked out");
        Ok(())
    }

    #[instrument(skip(self))]
    fn merge(&mut self, reference: &str) -> Result<MergeOutcome, GitError> {
        let theirs = self
            .repo
            .find_reference(reference)
            .map_err(|_| GitError::RefNotFound(reference.to_string()))?;
        let annotated = self.repo.reference_to_annotated_commit(&theirs)?;

        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;
        if analysis.is_up_to_date() {
            debug!(reference, "already up to date");
            return Ok(MergeOutcome::Clean);
        }

        let mut merge_opts = MergeOptions::new();
        let mut checkout = CheckoutBuilder::new();
        checkout.allow_conflicts(true).conflict_style_merge(true);
        self.repo
            .merge(&[&annotated], Some(&mut merge_opts), Some(&mut checkout))
            .map_err(|e| GitError::MergeFailed(e.message().to_string()))?;

        let index = self.repo.index()?;
        if index.has_conflicts() {
            let paths = self.unmerged_paths()?;
            info!(reference, conflicted = paths.len(), "merge produced conflicts");
            Ok(MergeOutcome::Conflict(paths))
        } else {
            debug!(reference, "merge applied cleanly");
            Ok(MergeOutcome::Clean)
        }
    }

    #[instrument(skip(self))]
    fn commit_merge(&mut self, message: &str) -> Result<(), GitError> {
        let mut merge_heads = Vec::new();
        match self.repo.mergehead_foreach(|oid| {
            merge_heads.push(*oid);
            true
        }) {
            Ok(()) => {}
            // No MERGE_HEAD: the merge was a no-op.
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            return Err(GitError::MergeFailed(
                "cannot commit a merge with unresolved conflicts".into(),
            ));
        }
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let head = self.repo.head()?.peel_to_commit()?;
        let mut parents = vec![head];
        for oid in merge_heads {
            parents.push(self.repo.find_commit(oid)?);
        }
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let sig = self.signature()?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
        self.repo.cleanup_state()?;
        debug!(sha = %oid, "committed merge");
        Ok(())
    }

    fn unmerged_paths(&self) -> Result<Vec<String>, GitError> {
        let index = self.repo.index()?;
        let mut paths = BTreeSet::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict
                .our
                .or(conflict.their)
                .or(conflict.ancestor);
            if let Some(entry) = entry {
                paths.insert(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        Ok(paths.into_iter().collect())
    }

    fn read_working_file(&self, path: &str) -> Result<String, GitError> {
        let bytes = std::fs::read(self.repo_path.join(path))?;
        String::from_utf8(bytes).map_err(|_| GitError::NonTextFile(path.to_string()))
    }

    fn abort_merge(&mut self) -> Result<(), GitError> {
        self.repo.cleanup_state()?;
        Ok(())
    }

    fn reset_hard(&mut self) -> Result<(), GitError> {
        let head = match self.repo.head() {
            Ok(head) => head.peel(ObjectType::Commit)?,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.repo.reset(&head, ResetType::Hard, None)?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn restore_original(&mut self) -> Result<(), GitError> {
        match &self.original_head {
            OriginalHead::Branch(name) => {
                self.repo.set_head(name)?;
                self.repo
                    .checkout_head(Some(CheckoutBuilder::new().force()))?;
            }
            OriginalHead::Detached(oid) => {
                self.repo.set_head_detached(*oid)?;
                self.repo
                    .checkout_head(Some(CheckoutBuilder::new().force()))?;
            }
            OriginalHead::Unborn => {
                warn!("original HEAD was unborn, leaving HEAD where it is");
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_ref(&mut self, reference: &str) -> Result<(), GitError> {
        match self.repo.find_reference(reference) {
            Ok(mut r) => {
                r.delete()?;
                debug!(reference, "deleted ref");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, GitError> {
        let mut names = Vec::new();
        for reference in self.repo.references_glob(&format!("{}*", prefix))? {
            if let Some(name) = reference?.name() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
