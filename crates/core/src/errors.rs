//! Error types for the MergeWatch core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the local Git workspace (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// A merge ended in a state the workspace does not know how to interpret.
    #[error("unexpected merge failure: {0}")]
    MergeFailed(String),

    /// A working-tree file is not valid UTF-8 text.
    #[error("working file '{0}' is not valid UTF-8")]
    NonTextFile(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The requested pull request is not open or does not exist.
    #[error("pull request #{0} not found among open pull requests")]
    PullRequestNotFound(u64),

    /// JSON deserialization failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Detection errors
// ---------------------------------------------------------------------------

/// Errors raised while comparing two pull requests.
///
/// Only [`DetectionError::FocalChangeSet`] is fatal to a run; the others mark
/// a single pair as indeterminate.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// A branch or proposal could not be resolved or fetched.
    #[error("could not resolve '{reference}': {detail}")]
    RefResolution { reference: String, detail: String },

    /// The merge attempt failed for a reason other than a content conflict.
    #[error("merge simulation failed for #{proposal}: {detail}")]
    MergeSimulation { proposal: u64, detail: String },

    /// Restoring the workspace or deleting a temporary ref failed.
    #[error("workspace cleanup failed: {0}")]
    Cleanup(String),

    /// The focal pull request's change set could not be built.
    #[error("cannot build change set for focal pull request #{id}: {detail}")]
    FocalChangeSet { id: u64, detail: String },

    /// A candidate's change set could not be fetched.
    #[error("cannot fetch change set for #{id}: {detail}")]
    ChangeSetUnavailable { id: u64, detail: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from publishing a conflict report.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Posting the summary comment failed.
    #[error("failed to post conflict comment on #{pr}: {detail}")]
    CommentFailed { pr: u64, detail: String },

    /// Requesting reviewers failed.
    #[error("failed to request reviewers on #{pr}: {detail}")]
    ReviewRequestFailed { pr: u64, detail: String },

    /// Underlying GitHub error.
    #[error("notification GitHub error: {0}")]
    GitHub(#[from] GitHubError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = GitHubError::RateLimited {
            reset_at: "2025-01-01T00:00:00Z".into(),
        };
        assert!(err.to_string().contains("rate limit"));

        let err = DetectionError::RefResolution {
            reference: "feature/x".into(),
            detail: "no such branch".into(),
        };
        assert_eq!(err.to_string(), "could not resolve 'feature/x': no such branch");

        let err = ConfigError::EnvVarMissing {
            var: "GITHUB_TOKEN".into(),
            field: "github.token_env".into(),
        };
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = DetectionError::Cleanup("ref busy".into()).into();
        assert!(matches!(core_err, CoreError::Detection(_)));

        let core_err: CoreError = NotificationError::CommentFailed {
            pr: 3,
            detail: "HTTP 500".into(),
        }
        .into();
        assert!(matches!(core_err, CoreError::Notification(_)));
    }
}
