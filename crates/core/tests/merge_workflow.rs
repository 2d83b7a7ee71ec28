//! End-to-end merge workflow tests against real git2 repositories.
//!
//! Each test builds a repository in a temp dir with a base commit, a
//! `feature` branch and a diverging local commit, then drives a
//! [`MergeSession`] through apply / commit / reset.

use std::path::Path;
use std::sync::{Arc, Mutex};

use git2::{IndexAddOption, Oid, Repository, RepositoryState, Signature};
use tempfile::TempDir;

use mergeflow_core::conflict::CommitFinalizer;
use mergeflow_core::errors::{GitError, SessionError};
use mergeflow_core::models::Identity;
use mergeflow_core::session::SessionEvent;
use mergeflow_core::{
    GitRepository, MergeSession, MergeStart, SessionSettings, SessionState, Stage, VersionControl,
};

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

fn base_model() -> String {
    (1..=20).map(|i| format!("line {}\n", i)).collect()
}

fn ours_model() -> String {
    base_model().replace("line 10\n", "ours 10\n")
}

/// Five new header lines plus a conflicting change to line 10, which lands
/// on line 15 of this version.
fn theirs_model() -> String {
    let header: String = (1..=5).map(|i| format!("header {}\n", i)).collect();
    header + &base_model().replace("line 10\n", "theirs 10\n")
}

fn write(dir: &Path, path: &str, content: &str) {
    let full = dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
}

fn read(dir: &Path, path: &str) -> String {
    std::fs::read_to_string(dir.join(path)).unwrap()
}

fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Fixture", "fixture@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
}

fn switch_to(repo: &Repository, reference: &str) {
    repo.set_head(reference).unwrap();
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
        .unwrap();
}

struct Fixture {
    dir: TempDir,
    /// Full name of the local branch, e.g. `refs/heads/master`.
    local_branch: String,
    ours_tip: Oid,
    theirs_tip: Oid,
}

impl Fixture {
    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn repo(&self) -> Repository {
        Repository::open(self.path()).unwrap()
    }

    fn open(&self) -> GitRepository {
        GitRepository::open(self.path()).unwrap()
    }

    fn start(&self, settings: SessionSettings) -> MergeSession<GitRepository> {
        match MergeSession::start(self.open(), "feature", settings).unwrap() {
            MergeStart::Conflicted(session) => session,
            MergeStart::Clean { .. } => panic!("expected the merge to conflict"),
        }
    }
}

/// Base commit with `model.xml` and `notes.txt`; `feature` and the local
/// branch both change `model.xml` line 10, and `feature` also edits
/// `notes.txt` cleanly.
fn conflicting_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }

    write(dir.path(), "model.xml", &base_model());
    write(dir.path(), "notes.txt", "notes\n");
    let base = commit_all(&repo, "base");
    let local_branch = repo.head().unwrap().name().unwrap().to_string();

    repo.branch("feature", &repo.find_commit(base).unwrap(), false)
        .unwrap();
    switch_to(&repo, "refs/heads/feature");
    write(dir.path(), "model.xml", &theirs_model());
    write(dir.path(), "notes.txt", "notes from feature\n");
    let theirs_tip = commit_all(&repo, "feature change");

    switch_to(&repo, &local_branch);
    write(dir.path(), "model.xml", &ours_model());
    let ours_tip = commit_all(&repo, "local change");

    Fixture { dir, local_branch, ours_tip, theirs_tip }
}

fn settings() -> SessionSettings {
    SessionSettings {
        author: Some(Identity::new("Resolver", "resolver@example.com")),
        ..SessionSettings::default()
    }
}

fn changed_paths(repo: &Repository, from: Oid, to: Oid) -> Vec<String> {
    let from = repo.find_commit(from).unwrap().tree().unwrap();
    let to = repo.find_commit(to).unwrap().tree().unwrap();
    let diff = repo.diff_tree_to_tree(Some(&from), Some(&to), None).unwrap();
    diff.deltas()
        .filter_map(|d| d.new_file().path().map(|p| p.to_string_lossy().into_owned()))
        .collect()
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

#[test]
fn test_conflicts_report_chunk_start_lines() {
    let fx = conflicting_fixture();
    let session = fx.start(settings());
    let conflicts = session.conflicts();

    assert_eq!(session.state(), SessionState::Pending);
    assert_eq!(conflicts.paths().collect::<Vec<_>>(), vec!["model.xml"]);
    assert_eq!(
        conflicts.merged_commits(),
        &[fx.ours_tip.to_string(), fx.theirs_tip.to_string()]
    );

    let regions = conflicts.regions("model.xml").unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].start_for(0), Some(10));
    assert_eq!(regions[0].start_for(1), Some(15));

    let summary = conflicts.summary();
    assert!(summary.contains("File: model.xml"));
    assert!(summary.contains(&format!("Chunk for {} starts on line #15", fx.theirs_tip)));
}

#[test]
fn test_clean_merge_needs_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }
    write(dir.path(), "a.txt", "a\n");
    write(dir.path(), "b.txt", "b\n");
    let base = commit_all(&repo, "base");
    let local = repo.head().unwrap().name().unwrap().to_string();

    repo.branch("feature", &repo.find_commit(base).unwrap(), false)
        .unwrap();
    switch_to(&repo, "refs/heads/feature");
    write(dir.path(), "a.txt", "a from feature\n");
    commit_all(&repo, "feature");
    switch_to(&repo, &local);
    write(dir.path(), "b.txt", "b from local\n");
    commit_all(&repo, "local");

    let client = GitRepository::open(dir.path()).unwrap();
    match MergeSession::start(client, "feature", settings()).unwrap() {
        MergeStart::Clean { head } => {
            let commit = repo.find_commit(Oid::from_str(&head).unwrap()).unwrap();
            assert_eq!(commit.parent_count(), 2);
        }
        MergeStart::Conflicted(_) => panic!("expected a clean merge"),
    }
    assert_eq!(read(dir.path(), "a.txt"), "a from feature\n");
    assert_eq!(repo.state(), RepositoryState::Clean);
}

#[test]
fn test_merge_unknown_source_fails() {
    let fx = conflicting_fixture();
    let result = MergeSession::start(fx.open(), "no-such-branch", settings());
    assert!(matches!(
        result,
        Err(SessionError::Git(GitError::RefNotFound(_)))
    ));
}

// ---------------------------------------------------------------------------
// Apply & commit
// ---------------------------------------------------------------------------

#[test]
fn test_take_ours_and_commit() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.take_ours(["model.xml"]);
    let applied = session.apply().unwrap();
    assert_eq!(applied.entries, vec![("model.xml".to_string(), Stage::Ours)]);
    assert_eq!(session.state(), SessionState::Resolving);
    assert_eq!(read(fx.path(), "model.xml"), ours_model());

    let record = session.commit("Resolved", false).unwrap();
    assert_eq!(session.state(), SessionState::Committed);
    assert!(session.repository().is_none());
    assert_eq!(
        record.parents,
        vec![fx.ours_tip.to_string(), fx.theirs_tip.to_string()]
    );
    assert_eq!(record.author, Identity::new("Resolver", "resolver@example.com"));

    let repo = fx.repo();
    let new_tip = Oid::from_str(&record.id).unwrap();
    assert_eq!(changed_paths(&repo, fx.theirs_tip, new_tip), vec!["model.xml"]);
    assert_eq!(repo.head().unwrap().target(), Some(new_tip));
    assert_eq!(repo.state(), RepositoryState::Clean);
    assert_eq!(read(fx.path(), "notes.txt"), "notes from feature\n");
}

#[test]
fn test_take_theirs_writes_their_version() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.take_theirs(["model.xml"]);
    session.apply().unwrap();
    assert_eq!(read(fx.path(), "model.xml"), theirs_model());

    let record = session.commit("Take theirs", false).unwrap();
    let repo = fx.repo();
    let new_tip = Oid::from_str(&record.id).unwrap();
    assert!(changed_paths(&repo, fx.theirs_tip, new_tip).is_empty());
}

#[test]
fn test_reapplying_same_side_is_idempotent() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.take_ours(["model.xml"]);
    session.apply().unwrap();
    let first = read(fx.path(), "model.xml");

    session.take_ours(["model.xml"]);
    session.apply().unwrap();
    assert_eq!(read(fx.path(), "model.xml"), first);
    assert_eq!(first, ours_model());
}

#[cfg(unix)]
#[test]
fn test_checked_out_files_keep_regular_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let fx = conflicting_fixture();
    let mut session = fx.start(settings());
    let mode = |path: &str| {
        std::fs::metadata(fx.path().join(path))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };

    session.take_ours(["model.xml"]);
    session.apply().unwrap();
    assert_eq!(mode("model.xml"), 0o644);

    session.take_theirs(["model.xml"]);
    session.apply().unwrap();
    assert_eq!(mode("model.xml"), 0o644);
}

#[test]
fn test_last_write_wins_within_one_apply() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.set_ours_and_theirs(["model.xml"], ["model.xml"]);
    let applied = session.apply().unwrap();
    assert_eq!(applied.entries, vec![("model.xml".to_string(), Stage::Theirs)]);
    assert_eq!(read(fx.path(), "model.xml"), theirs_model());
}

#[test]
fn test_last_write_wins_across_applies() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.take_ours(["model.xml"]);
    session.apply().unwrap();
    session.take_theirs(["model.xml"]);
    session.apply().unwrap();

    assert_eq!(read(fx.path(), "model.xml"), theirs_model());
    assert_eq!(session.resolved().get("model.xml"), Some(&Stage::Theirs));
}

#[test]
fn test_manual_edit_is_committed_as_is() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    let merged = base_model().replace("line 10\n", "both 10\n");
    write(fx.path(), "model.xml", &merged);
    let record = session.merge_and_commit("Manual merge", false).unwrap();

    let repo = fx.repo();
    let commit = repo.find_commit(Oid::from_str(&record.id).unwrap()).unwrap();
    let blob = commit
        .tree()
        .unwrap()
        .get_path(Path::new("model.xml"))
        .unwrap()
        .to_object(&repo)
        .unwrap()
        .peel_to_blob()
        .unwrap();
    assert_eq!(blob.content(), merged.as_bytes());
}

#[test]
fn test_commit_requires_an_apply() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());
    assert!(matches!(
        session.commit("too early", false),
        Err(SessionError::InvalidTransition { .. })
    ));
    assert_eq!(session.state(), SessionState::Pending);
}

#[test]
fn test_marker_validation_blocks_commit() {
    let fx = conflicting_fixture();
    let mut session = fx.start(SessionSettings { validate_markers: true, ..settings() });

    // The merge left conflict markers in model.xml.
    session.apply().unwrap();
    match session.commit("Resolved", false) {
        Err(SessionError::UnresolvedMarkers(paths)) => assert_eq!(paths, vec!["model.xml"]),
        other => panic!("expected UnresolvedMarkers, got {:?}", other.map(|r| r.id)),
    }
    assert_eq!(session.state(), SessionState::Resolving);

    write(fx.path(), "model.xml", &ours_model());
    session.commit("Resolved", false).unwrap();
    assert_eq!(session.state(), SessionState::Committed);
}

#[test]
fn test_checkout_failure_keeps_applied_paths() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.take_ours(["model.xml", "missing.txt"]);
    let err = session.apply().unwrap_err();
    match &err {
        SessionError::CheckoutFailure { path, applied, .. } => {
            assert_eq!(path, "missing.txt");
            assert_eq!(applied, &vec!["model.xml".to_string()]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_partial());
    assert_eq!(session.state(), SessionState::Resolving);
    assert_eq!(read(fx.path(), "model.xml"), ours_model());
    assert_eq!(
        session.classify_file("missing.txt"),
        mergeflow_core::Resolution::Ours
    );
}

// ---------------------------------------------------------------------------
// Amend
// ---------------------------------------------------------------------------

#[test]
fn test_amend_keeps_tip_parents() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write(dir.path(), "f.txt", "one\n");
    let first = commit_all(&repo, "first");
    write(dir.path(), "f.txt", "two\n");
    commit_all(&repo, "second");

    let client = GitRepository::open(dir.path()).unwrap();
    write(dir.path(), "f.txt", "two, amended\n");
    let author = Identity::new("Resolver", "resolver@example.com");
    let record = CommitFinalizer::commit_resolution(&client, &author, "second (amended)", true)
        .unwrap();

    assert!(record.amend);
    assert_eq!(record.parents, vec![first.to_string()]);
    assert_eq!(record.author, Identity::new("Fixture", "fixture@example.com"));
    let tip = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(tip.id().to_string(), record.id);
    assert_eq!(tip.message(), Some("second (amended)"));
    assert_eq!(tip.parent_ids().collect::<Vec<_>>(), vec![first]);
    assert_eq!(tip.author().name(), Some("Fixture"));
    assert_eq!(tip.committer().name(), Some("Resolver"));
}

#[test]
fn test_non_amend_adds_a_commit() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write(dir.path(), "f.txt", "one\n");
    commit_all(&repo, "first");
    let second = {
        write(dir.path(), "f.txt", "two\n");
        commit_all(&repo, "second")
    };

    let client = GitRepository::open(dir.path()).unwrap();
    write(dir.path(), "f.txt", "three\n");
    let author = Identity::new("Resolver", "resolver@example.com");
    let record = CommitFinalizer::commit_resolution(&client, &author, "third", false).unwrap();
    assert_eq!(record.parents, vec![second.to_string()]);
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[test]
fn test_reset_to_local_state_discards_everything() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());

    session.take_theirs(["model.xml"]);
    session.apply().unwrap();
    write(fx.path(), "notes.txt", "scribbles\n");

    let target = session.reset_to_local_state().unwrap();
    assert_eq!(target, fx.ours_tip.to_string());
    assert_eq!(session.state(), SessionState::Abandoned);
    assert!(session.repository().is_none());

    let repo = fx.repo();
    assert_eq!(repo.state(), RepositoryState::Clean);
    assert!(!repo.index().unwrap().has_conflicts());
    assert_eq!(read(fx.path(), "model.xml"), ours_model());
    assert_eq!(read(fx.path(), "notes.txt"), "notes\n");
    assert_eq!(
        repo.find_reference(&fx.local_branch).unwrap().target(),
        Some(fx.ours_tip)
    );
}

#[test]
fn test_reset_to_missing_remote_leaves_tree_untouched() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());
    let before = read(fx.path(), "model.xml");

    let err = session.reset_to_remote_state().unwrap_err();
    assert!(matches!(
        err,
        SessionError::ResetFailure { source: GitError::RefNotFound(_), .. }
    ));
    assert!(!err.is_partial());
    assert_eq!(session.state(), SessionState::Pending);
    assert!(session.repository().is_some());
    assert_eq!(read(fx.path(), "model.xml"), before);
    assert_eq!(fx.repo().state(), RepositoryState::Merge);
}

#[test]
fn test_reset_to_existing_remote_ref() {
    let fx = conflicting_fixture();
    let repo = fx.repo();
    let branch = fx.local_branch.trim_start_matches("refs/heads/");
    repo.reference(
        &format!("refs/remotes/origin/{}", branch),
        repo.find_commit(fx.ours_tip).unwrap().parent_id(0).unwrap(),
        true,
        "fixture remote",
    )
    .unwrap();

    let mut session = fx.start(settings());
    session.reset_to_remote_state().unwrap();
    assert_eq!(read(fx.path(), "model.xml"), base_model());
}

#[test]
fn test_no_operation_after_terminal_state() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());
    session.reset_to_local_state().unwrap();

    session.take_ours(["model.xml"]);
    assert!(matches!(session.apply(), Err(SessionError::InvalidTransition { .. })));
    assert!(matches!(
        session.reset_to_local_state(),
        Err(SessionError::InvalidTransition { .. })
    ));
}

// ---------------------------------------------------------------------------
// Resume & notifications
// ---------------------------------------------------------------------------

#[test]
fn test_resume_picks_up_merge_in_progress() {
    let fx = conflicting_fixture();
    fx.start(settings()).close();

    let session = MergeSession::resume(fx.open(), settings()).unwrap();
    assert_eq!(session.state(), SessionState::Pending);
    assert!(session.conflicts().contains("model.xml"));
    assert_eq!(
        session.conflicts().merged_commits(),
        &[fx.ours_tip.to_string(), fx.theirs_tip.to_string()]
    );
}

#[test]
fn test_resume_after_apply_is_ready_to_commit() {
    let fx = conflicting_fixture();
    let mut first = fx.start(settings());
    first.take_ours(["model.xml"]);
    first.apply().unwrap();
    first.close();

    let mut session = MergeSession::resume(fx.open(), settings()).unwrap();
    assert!(session.conflicts().is_empty());
    assert_eq!(session.state(), SessionState::Resolving);

    let record = session.commit("Resolved later", false).unwrap();
    assert_eq!(record.parents.len(), 2);
    assert_eq!(fx.repo().state(), RepositoryState::Clean);
}

#[test]
fn test_listeners_see_transitions_and_applies() {
    let fx = conflicting_fixture();
    let mut session = fx.start(settings());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    session.on_change(move |event| sink.lock().unwrap().push(event.clone()));

    session.take_ours(["model.xml"]);
    session.apply().unwrap();
    session.commit("Resolved", false).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            SessionEvent::StateChanged { from: SessionState::Pending, to: SessionState::Resolving },
            SessionEvent::Applied { paths: vec!["model.xml".to_string()] },
            SessionEvent::StateChanged {
                from: SessionState::Resolving,
                to: SessionState::Committed
            },
        ]
    );
}

#[test]
fn test_provider_reads_worktree_file() {
    let fx = conflicting_fixture();
    let client = fx.open();
    assert_eq!(
        client.read_worktree_file("notes.txt").unwrap(),
        Some(b"notes\n".to_vec())
    );
    assert_eq!(client.read_worktree_file("absent.txt").unwrap(), None);
}
