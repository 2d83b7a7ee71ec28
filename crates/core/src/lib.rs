//! mergeflow core library.
//!
//! This crate provides the three-way merge conflict resolution workflow:
//! conflict extraction, resolution policy, per-file application, commit
//! finalization, and hard reset, written against a narrow version-control
//! provider interface with a `git2` implementation.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod models;
pub mod repo_marker;
pub mod session;
pub mod vcs;

// Re-exports for convenience.
pub use config::EngineConfig;
pub use conflict::{ConflictSet, Resolution};
pub use git::GitRepository;
pub use session::{MergeSession, MergeStart, SessionSettings, SessionState};
pub use vcs::{MergeOutcome, Stage, VersionControl};
