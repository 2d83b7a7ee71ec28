//! Destructive hard reset used when a merge is abandoned.
//!
//! The engine performs no confirmation; callers gate this behind the user.

use tracing::{info, instrument, warn};

use crate::errors::{GitError, SessionError};
use crate::vcs::VersionControl;

/// Branch used when HEAD is detached and none is configured.
pub const FALLBACK_BRANCH: &str = "master";

/// Stateless reset operations.
pub struct StateReset;

impl StateReset {
    /// Hard-reset the index and working tree to `reference`.
    ///
    /// The reference is resolved first, so an unknown target leaves the working
    /// tree untouched. Returns the commit id reset to.
    #[instrument(skip(repo))]
    pub fn reset_to<R: VersionControl + ?Sized>(
        repo: &R,
        reference: &str,
    ) -> Result<String, SessionError> {
        let failure = |source: GitError| SessionError::ResetFailure {
            reference: reference.to_string(),
            source,
        };

        let target = match repo.resolve_ref(reference).map_err(failure)? {
            Some(id) => id,
            None => {
                warn!(reference, "reset target not found");
                return Err(failure(GitError::RefNotFound(reference.to_string())));
            }
        };

        repo.hard_reset(reference).map_err(failure)?;
        info!(reference, target = %target, "hard reset complete");
        Ok(target)
    }

    /// `refs/remotes/<remote>/<branch>`.
    pub fn remote_ref(remote: &str, branch: &str) -> String {
        format!("refs/remotes/{}/{}", remote, branch)
    }

    /// `refs/heads/<branch>`.
    pub fn local_ref(branch: &str) -> String {
        format!("refs/heads/{}", branch)
    }

    /// Pick the branch to reset: the configured one, else the checked-out one.
    pub fn branch_for<R: VersionControl + ?Sized>(
        repo: &R,
        configured: Option<&str>,
    ) -> String {
        if let Some(branch) = configured {
            return branch.to_string();
        }
        match repo.current_branch() {
            Ok(Some(branch)) => branch,
            _ => FALLBACK_BRANCH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_names() {
        assert_eq!(StateReset::remote_ref("origin", "master"), "refs/remotes/origin/master");
        assert_eq!(StateReset::local_ref("main"), "refs/heads/main");
    }
}
