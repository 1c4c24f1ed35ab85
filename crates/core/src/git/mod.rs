//! Git and GitHub access for MergeWatch.

pub mod client;
pub mod github;
pub mod workspace;

pub use client::GitWorkspace;
pub use github::{GitHubClient, GitHubRepo};
pub use workspace::{MergeOutcome, MergeWorkspace};
