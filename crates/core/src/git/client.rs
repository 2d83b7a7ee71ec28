//! Local Git repository operations via `git2`.

use std::io::Write;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    Commit, ErrorCode, IndexAddOption, IndexConflict, IndexEntry, Oid, Repository,
    RepositoryState, ResetType, Signature,
};
use tracing::{debug, info, instrument, warn};

use crate::conflict::chunks::conflict_chunks;
use crate::errors::GitError;
use crate::models::{CommitRecord, Identity};
use crate::vcs::{MergeOutcome, RawConflicts, Stage, VersionControl};

/// Name of the directory that marks a working copy as a Git repository.
pub const METADATA_DIR: &str = ".git";

#[cfg_attr(not(unix), allow(dead_code))]
const MODE_EXECUTABLE: u32 = 0o100755;
#[cfg_attr(not(unix), allow(dead_code))]
const MODE_SYMLINK: u32 = 0o120000;

/// A `git2::Repository` opened once for the lifetime of a merge session.
pub struct GitRepository {
    repo: Repository,
    repo_path: PathBuf,
    identity: Option<Identity>,
}

/// The content a side holds for a path.
enum SideVersion {
    Blob { id: Oid, mode: u32 },
    Deleted,
}

impl GitRepository {
    /// Open an existing Git repository at `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self { repo, repo_path: path.to_path_buf(), identity: None })
    }

    /// Identity used for merge commits created by a clean [`VersionControl::merge_attempt`].
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    fn workdir(&self) -> Result<&Path, GitError> {
        self.repo
            .workdir()
            .ok_or_else(|| GitError::RepositoryNotFound(format!("{} (bare)", self.repo_path.display())))
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commits listed in `MERGE_HEAD`, empty when no merge is in progress.
    fn merge_heads(&self) -> Result<Vec<Oid>, GitError> {
        let path = self.repo.path().join("MERGE_HEAD");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| Oid::from_str(l).map_err(GitError::from))
            .collect()
    }

    fn signature_identity(&self) -> Result<Identity, GitError> {
        self.identity
            .clone()
            .or_else(|| self.default_identity())
            .ok_or(GitError::IdentityMissing)
    }

    fn find_conflict(&self, path: &str) -> Result<Option<IndexConflict>, GitError> {
        let index = self.repo.index()?;
        if !index.has_conflicts() {
            return Ok(None);
        }
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if conflict_path(&conflict).as_deref() == Some(path) {
                return Ok(Some(conflict));
            }
        }
        Ok(None)
    }

    /// Version of `path` on one side, from the index conflict entry or, once
    /// that is gone, from the merge parent's tree.
    fn side_version(&self, path: &str, stage: Stage) -> Result<SideVersion, GitError> {
        if let Some(conflict) = self.find_conflict(path)? {
            let entry = match stage {
                Stage::Ours => conflict.our,
                Stage::Theirs => conflict.their,
            };
            return Ok(match entry {
                Some(e) => SideVersion::Blob { id: e.id, mode: e.mode },
                None => SideVersion::Deleted,
            });
        }

        debug!(path, %stage, "no conflict entry, reading merge parent tree");
        let ours = self.head_commit()?;
        let theirs = match self.merge_heads()?.first() {
            Some(id) => Some(self.repo.find_commit(*id)?),
            None => None,
        };
        let (chosen, other) = match stage {
            Stage::Ours => (ours, theirs),
            Stage::Theirs => (theirs, ours),
        };
        let not_found = || GitError::StageNotFound { path: path.to_string(), stage: stage.to_string() };

        let chosen = chosen.ok_or_else(not_found)?;
        if let Some(version) = tree_blob(&chosen, path)? {
            return Ok(version);
        }
        // Absent on the chosen side but present on the other: the chosen side deleted it.
        match other {
            Some(other) if tree_blob(&other, path)?.is_some() => Ok(SideVersion::Deleted),
            _ => Err(not_found()),
        }
    }

    fn write_blob(&self, path: &str, id: Oid, mode: u32) -> Result<(), GitError> {
        let blob = self.repo.find_blob(id)?;
        let full = self.workdir()?.join(path);
        let parent = full.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        #[cfg(unix)]
        {
            if mode == MODE_SYMLINK {
                return write_symlink(&full, blob.content());
            }
        }

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(blob.content())?;
        tmp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Temp files are created 0600.
            let perm = if mode == MODE_EXECUTABLE { 0o755 } else { 0o644 };
            tmp.as_file().set_permissions(std::fs::Permissions::from_mode(perm))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        tmp.persist(&full).map_err(|e| GitError::IoError(e.error))?;
        Ok(())
    }

    fn entry_text(&self, entry: Option<&IndexEntry>) -> Result<Option<String>, GitError> {
        match entry {
            Some(e) if !e.id.is_zero() => {
                let blob = self.repo.find_blob(e.id)?;
                Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
            }
            _ => Ok(None),
        }
    }

    /// Raw conflict rows for one conflicted path, `[ours, theirs, end]` each.
    fn conflict_rows(&self, conflict: &IndexConflict) -> Result<Vec<Vec<i64>>, GitError> {
        let base = self.entry_text(conflict.ancestor.as_ref())?;
        let ours = self.entry_text(conflict.our.as_ref())?;
        let theirs = self.entry_text(conflict.their.as_ref())?;

        let rows = match (ours, theirs) {
            (Some(o), Some(t)) => {
                let spans = conflict_chunks(base.as_deref().unwrap_or(""), &o, &t);
                if spans.is_empty() {
                    // Conflicting at the file level only (mode, binary, whitespace).
                    vec![vec![1, 1, line_count(&t) + 1]]
                } else {
                    spans.into_iter().map(|s| s.to_row()).collect()
                }
            }
            (None, Some(t)) => vec![vec![-1, 1, line_count(&t) + 1]],
            (Some(o), None) => vec![vec![1, -1, line_count(&o) + 1]],
            (None, None) => vec![vec![-1, -1, -1]],
        };
        Ok(rows)
    }

    fn collect_conflicts(&self, merged_commits: Vec<String>) -> Result<RawConflicts, GitError> {
        let index = self.repo.index()?;
        let mut raw = RawConflicts { merged_commits, ..Default::default() };
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let Some(path) = conflict_path(&conflict) else {
                warn!("skipping conflict entry without a path");
                continue;
            };
            let rows = self.conflict_rows(&conflict)?;
            debug!(path = %path, blocks = rows.len(), "conflicted path");
            raw.paths.insert(path, rows);
        }
        Ok(raw)
    }

    fn merged_commit_ids(&self) -> Result<Vec<String>, GitError> {
        let mut ids = Vec::new();
        if let Some(head) = self.head_commit()? {
            ids.push(head.id().to_string());
        }
        ids.extend(self.merge_heads()?.iter().map(Oid::to_string));
        Ok(ids)
    }
}

impl VersionControl for GitRepository {
    #[instrument(skip(self))]
    fn merge_attempt(&self, source_ref: &str) -> Result<MergeOutcome, GitError> {
        let source = self
            .repo
            .revparse_single(source_ref)
            .map_err(|_| GitError::RefNotFound(source_ref.to_string()))?
            .peel_to_commit()?;
        let annotated = self.repo.find_annotated_commit(source.id())?;
        let (analysis, _preference) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            let head = self.head_commit()?.map(|c| c.id().to_string()).unwrap_or_default();
            info!("already up to date");
            return Ok(MergeOutcome::Success { head });
        }

        if analysis.is_fast_forward() {
            let head = self.repo.head()?;
            let name = head
                .name()
                .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?
                .to_string();
            let mut reference = self.repo.find_reference(&name)?;
            reference.set_target(source.id(), &format!("mergeflow: fast-forward to {}", source_ref))?;
            self.repo.set_head(&name)?;
            self.repo.checkout_head(Some(CheckoutBuilder::new().safe()))?;
            info!(head = %source.id(), "fast-forwarded");
            return Ok(MergeOutcome::Success { head: source.id().to_string() });
        }

        if !analysis.is_normal() {
            return Ok(MergeOutcome::Failed { reason: format!("merge analysis {:?}", analysis) });
        }

        self.repo.merge(&[&annotated], None, None)?;
        let mut index = self.repo.index()?;

        if index.has_conflicts() {
            let merged = vec![
                self.head_commit()?.map(|c| c.id().to_string()).unwrap_or_default(),
                source.id().to_string(),
            ];
            let raw = self.collect_conflicts(merged)?;
            info!(paths = raw.paths.len(), "merge stopped with conflicts");
            return Ok(MergeOutcome::Conflicts(raw));
        }

        let identity = self.signature_identity()?;
        let sig = Signature::now(&identity.name, &identity.email)?;
        let tree = self.repo.find_tree(index.write_tree()?)?;
        let head = self
            .head_commit()?
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?;
        let message = format!("Merge {}", source_ref);
        let oid = self.repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&head, &source])?;
        self.repo.cleanup_state()?;
        info!(sha = %oid, "clean merge committed");
        Ok(MergeOutcome::Success { head: oid.to_string() })
    }

    fn pending_conflicts(&self) -> Result<MergeOutcome, GitError> {
        match self.repo.state() {
            RepositoryState::Merge => {
                let raw = self.collect_conflicts(self.merged_commit_ids()?)?;
                Ok(MergeOutcome::Conflicts(raw))
            }
            RepositoryState::Clean if !self.repo.index()?.has_conflicts() => {
                let head = self.head_commit()?.map(|c| c.id().to_string()).unwrap_or_default();
                Ok(MergeOutcome::Success { head })
            }
            state => Ok(MergeOutcome::Failed {
                reason: format!("repository is in {:?} state, not merging", state),
            }),
        }
    }

    #[instrument(skip(self))]
    fn checkout_path_from_stage(&self, path: &str, stage: Stage) -> Result<(), GitError> {
        let version = self.side_version(path, stage)?;
        let mut index = self.repo.index()?;
        match version {
            SideVersion::Blob { id, mode } => {
                self.write_blob(path, id, mode)?;
                index.add_path(Path::new(path))?;
                debug!(path, %stage, blob = %id, "checked out");
            }
            SideVersion::Deleted => {
                let full = self.workdir()?.join(path);
                match std::fs::remove_file(&full) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                index.remove_path(Path::new(path))?;
                debug!(path, %stage, "side deleted the path, removed");
            }
        }
        index.write()?;
        Ok(())
    }

    fn stage_all(&self) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit(
        &self,
        author: &Identity,
        message: &str,
        amend: bool,
    ) -> Result<CommitRecord, GitError> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Signature::now(&author.name, &author.email)?;

        let (oid, parents, recorded_author) = if amend {
            let tip = self
                .head_commit()?
                .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?;
            let parents: Vec<Oid> = tip.parent_ids().collect();
            // The tip keeps its author; `author` only becomes the committer.
            let tip_author = tip.author();
            let kept = match (tip_author.name(), tip_author.email()) {
                (Some(name), Some(email)) => Identity::new(name, email),
                _ => author.clone(),
            };
            let oid = tip.amend(Some("HEAD"), None, Some(&sig), None, Some(message), Some(&tree))?;
            (oid, parents, kept)
        } else {
            let mut parent_commits: Vec<Commit<'_>> = self.head_commit()?.into_iter().collect();
            for id in self.merge_heads()? {
                parent_commits.push(self.repo.find_commit(id)?);
            }
            let parent_refs: Vec<&Commit<'_>> = parent_commits.iter().collect();
            let oid = self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
            (oid, parent_commits.iter().map(Commit::id).collect(), author.clone())
        };

        self.repo.cleanup_state()?;
        info!(sha = %oid, amend, "created commit");
        Ok(CommitRecord {
            id: oid.to_string(),
            parents: parents.iter().map(Oid::to_string).collect(),
            author: recorded_author,
            message: message.to_string(),
            amend,
            created_at: chrono::Utc::now(),
        })
    }

    #[instrument(skip(self))]
    fn hard_reset(&self, reference: &str) -> Result<(), GitError> {
        let target = self
            .repo
            .revparse_single(reference)
            .map_err(|_| GitError::RefNotFound(reference.to_string()))?
            .peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.reset(target.as_object(), ResetType::Hard, Some(&mut checkout))?;
        self.repo.cleanup_state()?;
        info!(target = %target.id(), "hard reset");
        Ok(())
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<String>, GitError> {
        let object = if name.starts_with("refs/") {
            match self.repo.find_reference(name) {
                Ok(r) => r.peel(git2::ObjectType::Commit)?,
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        } else {
            match self.repo.revparse_single(name) {
                Ok(obj) => obj,
                Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        };
        Ok(Some(object.peel_to_commit()?.id().to_string()))
    }

    fn read_worktree_file(&self, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        match std::fs::read(self.workdir()?.join(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn current_branch(&self) -> Result<Option<String>, GitError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(_) => return Ok(None),
        };
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    fn default_identity(&self) -> Option<Identity> {
        let sig = self.repo.signature().ok()?;
        Some(Identity::new(sig.name()?, sig.email()?))
    }
}

fn conflict_path(conflict: &IndexConflict) -> Option<String> {
    conflict
        .our
        .as_ref()
        .or(conflict.their.as_ref())
        .or(conflict.ancestor.as_ref())
        .map(|e| String::from_utf8_lossy(&e.path).into_owned())
}

fn tree_blob(commit: &Commit<'_>, path: &str) -> Result<Option<SideVersion>, GitError> {
    match commit.tree()?.get_path(Path::new(path)) {
        Ok(entry) => Ok(Some(SideVersion::Blob {
            id: entry.id(),
            mode: entry.filemode() as u32,
        })),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace whatever is at `full` with a symlink to `target`.
#[cfg(unix)]
fn write_symlink(full: &Path, target: &[u8]) -> Result<(), GitError> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    match std::fs::symlink_metadata(full) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(full)?,
        Ok(_) => std::fs::remove_file(full)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(OsStr::from_bytes(target), full)?;
    Ok(())
}

fn line_count(text: &str) -> i64 {
    text.split_inclusive('\n').count() as i64
}
