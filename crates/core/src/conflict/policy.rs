//! Resolution policy.
//!
//! Collects per-path decisions before they are applied. Later decisions for the
//! same path replace earlier ones, so overlapping ours/theirs lists resolve by
//! call order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::extractor::ConflictSet;
use crate::vcs::Stage;

/// How a conflicting path will be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Take the version from the branch being merged into.
    Ours,
    /// Take the version from the branch being merged in.
    Theirs,
    /// Left for the user to edit; never touched by the applier.
    Manual,
}

impl Resolution {
    /// The stage to check out, or `None` for manual resolution.
    pub fn stage(self) -> Option<Stage> {
        match self {
            Self::Ours => Some(Stage::Ours),
            Self::Theirs => Some(Stage::Theirs),
            Self::Manual => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Decision {
    resolution: Resolution,
    seq: u64,
}

/// Ordered set of pending resolution decisions.
#[derive(Debug, Default)]
pub struct ResolutionPolicy {
    decisions: BTreeMap<String, Decision>,
    next_seq: u64,
}

impl ResolutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision for one path, replacing any earlier one.
    pub fn set(&mut self, path: impl Into<String>, resolution: Resolution) {
        let path = path.into();
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(previous) = self.decisions.insert(path.clone(), Decision { resolution, seq }) {
            if previous.resolution != resolution {
                debug!(path = %path, from = %previous.resolution, to = %resolution, "decision replaced");
            }
        }
    }

    pub fn take_ours<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.set(path, Resolution::Ours);
        }
    }

    pub fn take_theirs<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.set(path, Resolution::Theirs);
        }
    }

    pub fn mark_manual<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.set(path, Resolution::Manual);
        }
    }

    /// Set both lists at once: ours first, then theirs.
    ///
    /// A path present in both lists ends up as [`Resolution::Theirs`].
    pub fn set_ours_and_theirs<I, J, S, T>(&mut self, ours: I, theirs: J)
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.take_ours(ours);
        self.take_theirs(theirs);
    }

    /// Take ours for every conflicting path matching `pattern`. Returns the match count.
    pub fn take_ours_matching(&mut self, pattern: &str, conflicts: &ConflictSet) -> usize {
        self.set_matching(pattern, conflicts, Resolution::Ours)
    }

    /// Take theirs for every conflicting path matching `pattern`. Returns the match count.
    pub fn take_theirs_matching(&mut self, pattern: &str, conflicts: &ConflictSet) -> usize {
        self.set_matching(pattern, conflicts, Resolution::Theirs)
    }

    fn set_matching(
        &mut self,
        pattern: &str,
        conflicts: &ConflictSet,
        resolution: Resolution,
    ) -> usize {
        let matched: Vec<String> = conflicts
            .paths()
            .filter(|p| glob_match::glob_match(pattern, p))
            .map(str::to_string)
            .collect();
        debug!(pattern, count = matched.len(), %resolution, "glob decision");
        let count = matched.len();
        for path in matched {
            self.set(path, resolution);
        }
        count
    }

    /// Current decision for `path`. Paths never mentioned are manual.
    pub fn classify_file(&self, path: &str) -> Resolution {
        self.decisions
            .get(path)
            .map(|d| d.resolution)
            .unwrap_or(Resolution::Manual)
    }

    /// Whether any ours/theirs decision is pending.
    pub fn has_pending(&self) -> bool {
        self.decisions.values().any(|d| d.resolution != Resolution::Manual)
    }

    /// Remove and return all ours/theirs decisions in the order they were made.
    ///
    /// Explicit manual decisions stay recorded.
    pub fn drain_decided(&mut self) -> Vec<(String, Stage)> {
        let mut decided: Vec<(u64, String, Stage)> = Vec::new();
        self.decisions.retain(|path, d| match d.resolution.stage() {
            Some(stage) => {
                decided.push((d.seq, path.clone(), stage));
                false
            }
            None => true,
        });
        decided.sort_by_key(|(seq, _, _)| *seq);
        decided.into_iter().map(|(_, path, stage)| (path, stage)).collect()
    }

    /// All recorded decisions sorted by path.
    pub fn decisions(&self) -> impl Iterator<Item = (&str, Resolution)> {
        self.decisions.iter().map(|(p, d)| (p.as_str(), d.resolution))
    }
}
