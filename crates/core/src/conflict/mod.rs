//! Conflict detection between pairs of pull requests.
//!
//! - [`prefilter`] decides from file sets alone whether a pair can conflict.
//! - [`simulator`] merges the branches in a scratch workspace and reads the
//!   conflict markers ([`markers`]).
//! - [`patch`] compares added lines from diff hunks without touching a
//!   repository.
//! - [`ranges`] renders line numbers for humans.

pub mod markers;
pub mod patch;
pub mod prefilter;
pub mod ranges;
pub mod simulator;
pub mod strategy;

pub use markers::conflicting_lines;
pub use patch::PatchOverlapAnalyzer;
pub use prefilter::OverlapPrefilter;
pub use ranges::format_line_ranges;
pub use simulator::MergeSimulator;
pub use strategy::{ConflictStrategy, Side};
