//! TOML-based configuration for MergeWatch.
//!
//! Secrets are never stored in the file. The GitHub token is referenced by
//! environment variable name (`token_env`) and resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::DetectionStrategy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log level filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// GitHub repository and API settings.
    pub github: GitHubConfig,

    /// Local scratch checkout used by the merge strategy.
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Repository in `owner/repo` format.
    pub repo: String,

    /// Environment variable holding the GitHub personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Integration branch pull requests are merged into (e.g. `main`).
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_branch() -> String {
    "main".into()
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Scratch checkout settings.
///
/// The checkout is dedicated to MergeWatch: its working tree is hard reset
/// after every comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Path to an existing clone of the repository.
    pub path: PathBuf,

    /// Remote that pull request branches are fetched from.
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_remote() -> String {
    "origin".into()
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub strategy: DetectionStrategy,

    /// Merge the integration branch into the focal side before comparing.
    #[serde(default = "default_true")]
    pub merge_integration_branch: bool,

    /// Delete leftover temporary refs before each run.
    #[serde(default = "default_true")]
    pub sweep_stale_refs: bool,

    /// Glob patterns for paths never reported as conflicting.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Upper bound on concurrent change set fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_concurrent_fetches() -> usize {
    crate::engine::DEFAULT_MAX_CONCURRENT_FETCHES
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::default(),
            merge_integration_branch: true,
            sweep_stale_refs: true,
            ignore_patterns: Vec::new(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

/// What to do with a finished report when publishing is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub post_comment: bool,

    #[serde(default = "default_true")]
    pub request_reviewers: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            post_comment: true,
            request_reviewers: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the GitHub token from the environment.
    ///
    /// A missing token only logs a warning; [`require_token`](Self::require_token)
    /// fails later for commands that need it.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        Ok(())
    }

    /// The resolved GitHub token, or an error naming the variable to set.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.github
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.github.token_env.clone(),
                field: "github.token_env".into(),
            })
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.repo.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must not be empty".into(),
            });
        }
        if self.github.repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must be in 'owner/repo' format".into(),
            });
        }
        if self.github.api_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.api_url".into(),
                detail: "API URL must not be empty".into(),
            });
        }
        if self.workspace.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workspace.path".into(),
                detail: "workspace path must not be empty".into(),
            });
        }
        if self.detection.merge_integration_branch && self.github.default_branch.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.default_branch".into(),
                detail: "required when detection.merge_integration_branch is set".into(),
            });
        }
        if self.detection.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "detection.max_concurrent_fetches".into(),
                detail: "must be > 0".into(),
            });
        }
        for pattern in &self.detection.ignore_patterns {
            if pattern.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "detection.ignore_patterns".into(),
                    detail: "patterns must not be empty".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Branch merged into the focal side before each comparison, if enabled.
    pub fn integration_branch(&self) -> Option<String> {
        self.detection
            .merge_integration_branch
            .then(|| self.github.default_branch.clone())
    }

    /// Commented starter configuration written by `mergewatch init`.
    pub fn template() -> &'static str {
        r#"# MergeWatch configuration
log_level = "info"

[github]
api_url = "https://api.github.com"
repo = "owner/repo"
token_env = "GITHUB_TOKEN"
default_branch = "main"

[workspace]
# Dedicated clone; its working tree is reset after every comparison.
path = "/var/lib/mergewatch/repo"
remote = "origin"

[detection]
# "merge" simulates real merges, "patch" compares diff hunks only.
strategy = "merge"
merge_integration_branch = true
sweep_stale_refs = true
ignore_patterns = ["**/Cargo.lock", "**/package-lock.json"]
max_concurrent_fetches = 4

[notify]
post_comment = true
request_reviewers = true
"#
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
