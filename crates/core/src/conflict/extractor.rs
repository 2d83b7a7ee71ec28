//! Conflict extraction.
//!
//! Turns the raw conflict table of a [`MergeOutcome`] into a normalized
//! [`ConflictSet`]. This is a pure transformation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConflictError;
use crate::vcs::{MergeOutcome, RawConflicts};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where one parent's contribution to a conflict block begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStart {
    /// Index into [`ConflictSet::merged_commits`].
    pub commit_index: usize,
    /// Line in that parent's version of the file.
    pub line: u64,
}

/// One contiguous conflict block in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// Chunk starts, ordered by commit index. Parents that contributed no
    /// chunk are absent.
    pub chunks: Vec<ChunkStart>,
    /// Line at which the block ends, if reported.
    pub end_line: Option<u64>,
}

impl ConflictRegion {
    /// Start line for the given parent, if it contributed a chunk.
    pub fn start_for(&self, commit_index: usize) -> Option<u64> {
        self.chunks
            .iter()
            .find(|c| c.commit_index == commit_index)
            .map(|c| c.line)
    }
}

/// All conflict regions produced by one merge attempt. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    merged_commits: Vec<String>,
    regions: BTreeMap<String, Vec<ConflictRegion>>,
}

impl ConflictSet {
    /// The merged commits; index 0 is ours, index 1 is theirs.
    pub fn merged_commits(&self) -> &[String] {
        &self.merged_commits
    }

    /// Conflicting paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn regions(&self, path: &str) -> Option<&[ConflictRegion]> {
        self.regions.get(path).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ConflictRegion])> {
        self.regions.iter().map(|(p, r)| (p.as_str(), r.as_slice()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.regions.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Number of conflicting paths.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Total number of conflict blocks across all paths.
    pub fn region_count(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    /// Human-readable report of every conflict block and where each chunk starts.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (path, regions) in &self.regions {
            out.push_str(&format!("File: {}\n", path));
            for (i, region) in regions.iter().enumerate() {
                out.push_str(&format!("  Conflict #{}\n", i + 1));
                for chunk in &region.chunks {
                    let commit = self
                        .merged_commits
                        .get(chunk.commit_index)
                        .map(String::as_str)
                        .unwrap_or("?");
                    out.push_str(&format!(
                        "   Chunk for {} starts on line #{}\n",
                        commit, chunk.line
                    ));
                }
            }
            out.push_str("\n\n");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Stateless conflict extractor.
pub struct ConflictExtractor;

impl ConflictExtractor {
    /// Build a [`ConflictSet`] from a merge outcome.
    ///
    /// A successful merge yields an empty set. A failed merge carries no conflict
    /// table at all and is reported as [`ConflictError::NoConflictData`].
    pub fn extract(outcome: &MergeOutcome) -> Result<ConflictSet, ConflictError> {
        match outcome {
            MergeOutcome::Success { head } => {
                debug!(head = %head, "merge succeeded, no conflicts to extract");
                Ok(ConflictSet::default())
            }
            MergeOutcome::Conflicts(raw) => Self::decode(raw),
            MergeOutcome::Failed { reason } => Err(ConflictError::NoConflictData(reason.clone())),
        }
    }

    /// Decode a raw conflict table.
    pub fn decode(raw: &RawConflicts) -> Result<ConflictSet, ConflictError> {
        let width = raw.merged_commits.len() + 1;
        let mut regions = BTreeMap::new();

        for (path, rows) in &raw.paths {
            let mut decoded = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != width {
                    return Err(ConflictError::NoConflictData(format!(
                        "conflict row for '{}' has {} columns, expected {}",
                        path,
                        row.len(),
                        width
                    )));
                }
                let (starts, end) = row.split_at(width - 1);
                let chunks = starts
                    .iter()
                    .enumerate()
                    .filter(|(_, line)| **line >= 0)
                    .map(|(commit_index, line)| ChunkStart { commit_index, line: *line as u64 })
                    .collect();
                let end_line = end.first().copied().filter(|l| *l >= 0).map(|l| l as u64);
                decoded.push(ConflictRegion { chunks, end_line });
            }
            regions.insert(path.clone(), decoded);
        }

        let set = ConflictSet { merged_commits: raw.merged_commits.clone(), regions };
        info!(
            paths = set.len(),
            regions = set.region_count(),
            "extracted conflict set"
        );
        Ok(set)
    }
}
