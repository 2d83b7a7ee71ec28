//! Merge session: the conflict-resolution workflow for one merge attempt.
//!
//! A [`MergeSession`] owns the repository handle, the extracted
//! [`ConflictSet`], and the pending resolution decisions. It implements the
//! state machine
//!
//! ```text
//! Pending ──apply──▶ Resolving ──apply──▶ Resolving
//!    │                  │  └──commit──▶ Committed
//!    └──────reset───────┴──────reset──▶ Abandoned
//! ```
//!
//! The repository handle is acquired once and released when the session
//! reaches a terminal state or is closed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Span};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::conflict::{
    AppliedSet, CommitFinalizer, ConflictExtractor, ConflictSet, Resolution, ResolutionApplier,
    ResolutionPolicy, StateReset,
};
use crate::errors::{GitError, SessionError};
use crate::models::{CommitRecord, Identity};
use crate::vcs::{MergeOutcome, Stage, VersionControl};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a merge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Conflicts extracted, nothing applied yet.
    Pending,
    /// Some decisions have been applied.
    Resolving,
    /// The resolution was committed.
    Committed,
    /// The merge was abandoned by a hard reset.
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Abandoned)
    }

    fn can_transition(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Resolving)
                | (Self::Pending, Self::Abandoned)
                | (Self::Resolving, Self::Resolving)
                | (Self::Resolving, Self::Committed)
                | (Self::Resolving, Self::Abandoned)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolving => write!(f, "resolving"),
            Self::Committed => write!(f, "committed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Notification delivered to [`MergeSession::on_change`] listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    Applied { paths: Vec<String> },
}

/// Result of [`MergeSession::start`].
pub enum MergeStart<R> {
    /// The merge needed no resolution.
    Clean { head: String },
    /// The merge stopped with conflicts.
    Conflicted(MergeSession<R>),
}

/// Settings a session takes from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub author: Option<Identity>,
    pub remote: String,
    pub branch: Option<String>,
    pub validate_markers: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SessionSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            author: config.identity.identity(),
            remote: config.remote.name.clone(),
            branch: config.remote.branch.clone(),
            validate_markers: config.commit.validate_markers,
        }
    }
}

type Listener = Box<dyn FnMut(&SessionEvent) + Send>;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One conflict-resolution workflow against one repository working copy.
///
/// Not safe to run concurrently with another session on the same working copy.
pub struct MergeSession<R> {
    id: Uuid,
    repo: Option<R>,
    conflicts: ConflictSet,
    policy: ResolutionPolicy,
    resolved: BTreeMap<String, Stage>,
    state: SessionState,
    settings: SessionSettings,
    listeners: Vec<Listener>,
    span: Span,
}

impl<R: VersionControl> MergeSession<R> {
    /// Merge `source_ref` into the current branch and open a session if it conflicts.
    pub fn start(
        repo: R,
        source_ref: &str,
        settings: SessionSettings,
    ) -> Result<MergeStart<R>, SessionError> {
        let outcome = repo.merge_attempt(source_ref)?;
        match outcome {
            MergeOutcome::Success { head } => Ok(MergeStart::Clean { head }),
            other => Ok(MergeStart::Conflicted(Self::from_outcome(repo, &other, settings)?)),
        }
    }

    /// Pick up the merge already in progress in `repo`.
    pub fn resume(repo: R, settings: SessionSettings) -> Result<Self, SessionError> {
        let outcome = repo.pending_conflicts()?;
        let mut session = Self::from_outcome(repo, &outcome, settings)?;
        if session.conflicts.is_empty() && matches!(outcome, MergeOutcome::Conflicts(_)) {
            // Every conflict was settled by an earlier run; only the commit is left.
            session.state = SessionState::Resolving;
        }
        Ok(session)
    }

    /// Build a session from a merge outcome the caller already holds.
    pub fn from_outcome(
        repo: R,
        outcome: &MergeOutcome,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let conflicts = ConflictExtractor::extract(outcome)?;
        let id = Uuid::new_v4();
        let span = info_span!("merge_session", id = %id);
        span.in_scope(|| info!(paths = conflicts.len(), "merge session opened"));
        Ok(Self {
            id,
            repo: Some(repo),
            conflicts,
            policy: ResolutionPolicy::new(),
            resolved: BTreeMap::new(),
            state: SessionState::Pending,
            settings,
            listeners: Vec::new(),
            span,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ResolutionPolicy {
        &mut self.policy
    }

    /// Paths this session has already written, with the side taken.
    pub fn resolved(&self) -> &BTreeMap<String, Stage> {
        &self.resolved
    }

    /// Conflicting paths that no apply has touched.
    pub fn unresolved(&self) -> Vec<&str> {
        self.conflicts
            .paths()
            .filter(|p| !self.resolved.contains_key(*p))
            .collect()
    }

    /// The repository handle, while the session is open.
    pub fn repository(&self) -> Option<&R> {
        self.repo.as_ref()
    }

    /// Register a callback invoked on every state change and apply.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn take_ours<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.take_ours(paths);
    }

    pub fn take_theirs<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.take_theirs(paths);
    }

    /// Ours first, then theirs; theirs wins where the lists overlap.
    pub fn set_ours_and_theirs<I, J, S, T>(&mut self, ours: I, theirs: J)
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.policy.set_ours_and_theirs(ours, theirs);
    }

    pub fn classify_file(&self, path: &str) -> Resolution {
        self.policy.classify_file(path)
    }

    /// Apply every pending ours/theirs decision to the working tree.
    ///
    /// On a checkout failure the paths written so far stay written and the
    /// unapplied decisions are kept, so calling `apply` again resumes.
    pub fn apply(&mut self) -> Result<AppliedSet, SessionError> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_transition(SessionState::Resolving)?;

        let decisions = self.policy.drain_decided();
        let result = ResolutionApplier::apply(self.open_repo()?, &decisions);

        let applied: Vec<(String, Stage)> = match &result {
            Ok(set) => set.entries.clone(),
            Err(SessionError::CheckoutFailure { applied, .. }) => decisions
                .iter()
                .filter(|(p, _)| applied.contains(p))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };

        if result.is_err() {
            for (path, stage) in decisions.iter().filter(|d| !applied.contains(*d)) {
                let resolution = match stage {
                    Stage::Ours => Resolution::Ours,
                    Stage::Theirs => Resolution::Theirs,
                };
                self.policy.set(path.clone(), resolution);
            }
        }

        for (path, stage) in &applied {
            self.resolved.insert(path.clone(), *stage);
        }
        if result.is_ok() || !applied.is_empty() {
            self.transition(SessionState::Resolving);
            self.emit(SessionEvent::Applied {
                paths: applied.iter().map(|(p, _)| p.clone()).collect(),
            });
        }
        result
    }

    /// Stage all changes and commit the resolution.
    ///
    /// Manually resolved paths are not checked for leftover conflict markers
    /// unless `validate_markers` is enabled.
    pub fn commit(&mut self, message: &str, amend: bool) -> Result<CommitRecord, SessionError> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_transition(SessionState::Committed)?;
        let repo = self.open_repo()?;

        if self.settings.validate_markers {
            let manual: Vec<&str> = self.unresolved();
            CommitFinalizer::validate_markers(repo, manual)?;
        }

        let author = self
            .settings
            .author
            .clone()
            .or_else(|| repo.default_identity())
            .ok_or(SessionError::CommitFailure(GitError::IdentityMissing))?;

        let record = CommitFinalizer::commit_resolution(repo, &author, message, amend)?;
        self.transition(SessionState::Committed);
        self.release();
        Ok(record)
    }

    /// Apply pending decisions, then commit.
    pub fn merge_and_commit(
        &mut self,
        message: &str,
        amend: bool,
    ) -> Result<CommitRecord, SessionError> {
        self.apply()?;
        self.commit(message, amend)
    }

    /// Abandon the merge by hard-resetting to `reference`.
    ///
    /// Destructive: all uncommitted changes are discarded. On failure the
    /// session stays open and the working tree is untouched.
    pub fn reset_to(&mut self, reference: &str) -> Result<String, SessionError> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_transition(SessionState::Abandoned)?;

        let target = StateReset::reset_to(self.open_repo()?, reference)?;
        self.transition(SessionState::Abandoned);
        self.release();
        Ok(target)
    }

    /// Reset to the remote tracking branch, `refs/remotes/<remote>/<branch>`.
    pub fn reset_to_remote_state(&mut self) -> Result<String, SessionError> {
        let reference = self.remote_ref()?;
        self.reset_to(&reference)
    }

    /// Reset to the local branch tip, `refs/heads/<branch>`.
    pub fn reset_to_local_state(&mut self) -> Result<String, SessionError> {
        let reference = self.local_ref()?;
        self.reset_to(&reference)
    }

    /// The reference [`reset_to_remote_state`](Self::reset_to_remote_state) targets.
    pub fn remote_ref(&self) -> Result<String, SessionError> {
        let branch = StateReset::branch_for(self.open_repo()?, self.settings.branch.as_deref());
        Ok(StateReset::remote_ref(&self.settings.remote, &branch))
    }

    /// The reference [`reset_to_local_state`](Self::reset_to_local_state) targets.
    pub fn local_ref(&self) -> Result<String, SessionError> {
        let branch = StateReset::branch_for(self.open_repo()?, self.settings.branch.as_deref());
        Ok(StateReset::local_ref(&branch))
    }

    /// End the session without committing or resetting. The working tree is left as is.
    pub fn close(mut self) {
        let _enter = self.span.clone().entered();
        if !self.state.is_terminal() {
            info!(state = %self.state, "session closed before commit or reset");
        }
        self.release();
    }

    fn open_repo(&self) -> Result<&R, SessionError> {
        self.repo.as_ref().ok_or_else(|| SessionError::InvalidTransition {
            from: self.state.to_string(),
            to: "closed".into(),
        })
    }

    fn check_transition(&self, to: SessionState) -> Result<(), SessionError> {
        if self.state.can_transition(to) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        self.state = to;
        if from != to {
            info!(%from, %to, "session state changed");
        }
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&mut self, event: SessionEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    fn release(&mut self) {
        if self.repo.take().is_some() {
            debug!("repository handle released");
        }
    }
}
