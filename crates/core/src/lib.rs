//! MergeWatch core library.
//!
//! Detects which open pull requests conflict with a given pull request and
//! at which lines, either by simulating merges in a scratch checkout or by
//! comparing diff hunks. Also provides configuration, a GitHub client, and
//! report publishing.

pub mod config;
pub mod conflict;
pub mod engine;
pub mod errors;
pub mod git;
pub mod models;
pub mod notify;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::format_line_ranges;
pub use engine::{ConflictEngine, ProposalSource};
pub use errors::CoreError;
pub use notify::Notifier;
