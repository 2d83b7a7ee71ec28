//! Materializes ours/theirs decisions into the working tree.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::errors::SessionError;
use crate::vcs::{Stage, VersionControl};

/// Paths written by one apply pass, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSet {
    pub entries: Vec<(String, Stage)>,
}

impl AppliedSet {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stateless applier. Each file is written atomically; no atomicity is offered
/// across files and nothing is rolled back on failure.
pub struct ResolutionApplier;

impl ResolutionApplier {
    #[instrument(skip(repo, decisions), fields(count = decisions.len()))]
    pub fn apply<R: VersionControl + ?Sized>(
        repo: &R,
        decisions: &[(String, Stage)],
    ) -> Result<AppliedSet, SessionError> {
        let mut applied = AppliedSet::default();

        for (path, stage) in decisions {
            if let Err(source) = repo.checkout_path_from_stage(path, *stage) {
                warn!(path = %path, %stage, error = %source, "checkout failed");
                return Err(SessionError::CheckoutFailure {
                    path: path.clone(),
                    applied: applied.paths().map(str::to_string).collect(),
                    source,
                });
            }
            applied.entries.push((path.clone(), *stage));
        }

        info!(applied = applied.len(), "resolution applied");
        Ok(applied)
    }
}
