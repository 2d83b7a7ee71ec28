//! Stages the resolved working tree and writes the resolution commit.

use tracing::{debug, info, instrument, warn};

use super::markers::has_conflict_markers;
use crate::errors::SessionError;
use crate::models::{CommitRecord, Identity};
use crate::vcs::VersionControl;

/// Stateless commit finalizer.
pub struct CommitFinalizer;

impl CommitFinalizer {
    /// Stage everything (including deletions) and commit.
    ///
    /// With `amend` the tip commit is rewritten and keeps its parents and
    /// author; otherwise a new commit is appended on top of the tip.
    #[instrument(skip(repo, message), fields(author = %author))]
    pub fn commit_resolution<R: VersionControl + ?Sized>(
        repo: &R,
        author: &Identity,
        message: &str,
        amend: bool,
    ) -> Result<CommitRecord, SessionError> {
        repo.stage_all().map_err(SessionError::CommitFailure)?;
        debug!("working tree staged");

        let record = repo
            .commit(author, message, amend)
            .map_err(SessionError::CommitFailure)?;
        info!(sha = %record.id, amend, parents = record.parents.len(), "resolution committed");
        Ok(record)
    }

    /// Reject the commit if any of `paths` still carries conflict markers.
    ///
    /// Missing files are fine: deleting a path is a valid resolution.
    pub fn validate_markers<'a, R, I>(repo: &R, paths: I) -> Result<(), SessionError>
    where
        R: VersionControl + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let mut dirty = Vec::new();
        for path in paths {
            let content = repo.read_worktree_file(path).map_err(SessionError::CommitFailure)?;
            if content.as_deref().is_some_and(has_conflict_markers) {
                dirty.push(path.to_string());
            }
        }

        if dirty.is_empty() {
            return Ok(());
        }
        warn!(count = dirty.len(), "conflict markers remain");
        Err(SessionError::UnresolvedMarkers(dirty))
    }
}
