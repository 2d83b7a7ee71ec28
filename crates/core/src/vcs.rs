//! The version-control provider seam.
//!
//! The engine is written purely against [`VersionControl`]; the git2-backed
//! implementation lives in [`crate::git`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::models::{CommitRecord, Identity};

/// Which side of a conflicted path to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 2: the version on the branch being merged into.
    Ours,
    /// Stage 3: the version on the branch being merged in.
    Theirs,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Raw conflict table of a failed merge, in the shape merge libraries report it.
///
/// For every path there is one row per conflict block. A row has one column per
/// entry of `merged_commits` (the line where that commit's chunk starts, or
/// `-1` when it contributed none) followed by one column holding the line where
/// the block ends.
///
/// Lines are 1-based and count lines in that commit's own version of the file,
/// not in the merged output with conflict markers. The end column counts in
/// the last merged commit's version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConflicts {
    pub merged_commits: Vec<String>,
    pub paths: BTreeMap<String, Vec<Vec<i64>>>,
}

/// Result of attempting a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge completed (up to date, fast-forward, or clean merge commit).
    Success { head: String },
    /// The merge stopped with conflicts left in the index.
    Conflicts(RawConflicts),
    /// No merge result was produced.
    Failed { reason: String },
}

/// Narrow read/write interface to a repository working copy.
///
/// One value of an implementing type is the repository handle for the whole
/// lifetime of a merge session.
pub trait VersionControl {
    /// Merge `source_ref` into the current branch.
    fn merge_attempt(&self, source_ref: &str) -> Result<MergeOutcome, GitError>;

    /// Rebuild the conflict table of a merge that is already in progress.
    fn pending_conflicts(&self) -> Result<MergeOutcome, GitError>;

    /// Overwrite `path` in the working tree with one side's version and stage it.
    fn checkout_path_from_stage(&self, path: &str, stage: Stage) -> Result<(), GitError>;

    /// Stage every working-tree change, including deletions.
    fn stage_all(&self) -> Result<(), GitError>;

    /// Commit the index, or rewrite the tip commit when `amend` is set.
    ///
    /// An amended tip keeps its parents and author; only its message, tree
    /// and committer change.
    fn commit(&self, author: &Identity, message: &str, amend: bool)
        -> Result<CommitRecord, GitError>;

    /// Force the index and working tree to match `reference`.
    fn hard_reset(&self, reference: &str) -> Result<(), GitError>;

    /// Resolve a reference name to a commit id. `None` means not found.
    fn resolve_ref(&self, name: &str) -> Result<Option<String>, GitError>;

    /// Working-tree content of `path`, or `None` if the file does not exist.
    fn read_worktree_file(&self, path: &str) -> Result<Option<Vec<u8>>, GitError>;

    /// Short name of the checked-out branch, if HEAD is on a branch.
    fn current_branch(&self) -> Result<Option<String>, GitError>;

    /// Identity from the repository's own configuration, if any.
    fn default_identity(&self) -> Option<Identity>;
}
