use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{DiffOptions, IndexAddOption, Oid, Repository, ResetType, Signature, StatusOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{SnapshotId, VersionedWorkspace, ensure_workspace};
use crate::config::DEVFLOW_DIR;
use crate::errors::CapabilityError;

const SNAPSHOT_MESSAGE: &str = "[devflow] snapshot";

/// Run state lives in the workspace but is never snapshotted or rolled back.
fn is_engine_state(path: &Path) -> bool {
    path.starts_with(DEVFLOW_DIR)
}

/// Files and line counts changed in the working tree relative to HEAD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSummary {
    pub files: Vec<String>,
    pub lines_added: u64,
    pub lines_removed: u64,
}

/// Git-backed checkpoints: a snapshot is a commit of the whole tree.
#[derive(Debug, Clone, Default)]
pub struct GitWorkspace;

impl GitWorkspace {
    pub fn new() -> Self {
        Self
    }
}

fn open_or_init(path: &Path) -> Result<Repository> {
    match Repository::open(path) {
        Ok(repo) => Ok(repo),
        Err(_) => {
            info!(path = %path.display(), "Initialising git repository for snapshots");
            Repository::init(path).context("Failed to initialise git repository")
        }
    }
}

fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}

/// Stage everything and commit it, unless HEAD is already a snapshot of
/// the same tree.
pub fn snapshot_blocking(path: &Path) -> Result<Oid> {
    let repo = open_or_init(path)?;
    let mut index = repo.index()?;
    let skip_state: &mut git2::IndexMatchedPath<'_> = &mut |p, _spec| i32::from(is_engine_state(p));
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, Some(&mut *skip_state))?;
    index.update_all(["*"].iter(), Some(&mut *skip_state))?;
    index.write()?;

    let tree_id = index.write_tree()?;

    let parent = head_commit(&repo);
    if let Some(ref head) = parent
        && head.tree_id() == tree_id
        && head.message().is_some_and(|m| m.starts_with(SNAPSHOT_MESSAGE))
    {
        debug!(commit = %head.id(), "Reusing existing snapshot commit");
        return Ok(head.id());
    }

    let tree = repo.find_tree(tree_id)?;
    let sig = Signature::now("devflow", "devflow@localhost")?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let commit_id = repo.commit(Some("HEAD"), &sig, &sig, SNAPSHOT_MESSAGE, &tree, &parents)?;

    Ok(commit_id)
}

/// Hard-reset the working tree to `snapshot`.
pub fn restore_blocking(path: &Path, snapshot: &str) -> Result<()> {
    let repo = Repository::open(path).context("Failed to open git repository")?;
    let oid = Oid::from_str(snapshot).with_context(|| format!("Invalid snapshot id: {snapshot}"))?;
    let commit = repo
        .find_commit(oid)
        .with_context(|| format!("Snapshot not found: {snapshot}"))?;

    repo.reset(commit.as_object(), ResetType::Hard, None)
        .context("Failed to reset to snapshot")?;

    // Hard reset leaves untracked files behind; snapshots track everything,
    // so anything untracked now was created after the snapshot.
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut opts))?;
    let workdir = repo.workdir().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
    for entry in statuses.iter() {
        if entry.status().is_wt_new()
            && let Some(rel) = entry.path()
            && !is_engine_state(Path::new(rel))
        {
            let target = workdir.join(rel);
            if let Err(e) = std::fs::remove_file(&target) {
                warn!(file = %target.display(), "Failed to remove untracked file: {}", e);
            }
        }
    }

    Ok(())
}

/// Changes in the working tree (including untracked files) against HEAD.
pub fn change_summary(path: &Path) -> Result<ChangeSummary> {
    let repo = Repository::open(path).context("Failed to open git repository")?;
    let head_tree = match head_commit(&repo) {
        Some(commit) => Some(commit.tree()?),
        None => None,
    };

    let mut opts = DiffOptions::new();
    opts.include_untracked(true).show_untracked_content(true).recurse_untracked_dirs(true);

    let diff = repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?;

    let mut summary = ChangeSummary::default();
    diff.foreach(
        &mut |delta, _progress| {
            let file = delta.new_file().path().or_else(|| delta.old_file().path());
            if let Some(file) = file
                && !is_engine_state(file)
            {
                summary.files.push(file.to_string_lossy().to_string());
            }
            true
        },
        None,
        None,
        Some(&mut |delta, _hunk, line| {
            if delta.new_file().path().is_some_and(is_engine_state) {
                return true;
            }
            match line.origin() {
                '+' => summary.lines_added += 1,
                '-' => summary.lines_removed += 1,
                _ => {}
            }
            true
        }),
    )?;

    Ok(summary)
}

fn blocking_error(e: tokio::task::JoinError) -> CapabilityError {
    CapabilityError::Process(format!("git task failed: {e}"))
}

#[async_trait]
impl VersionedWorkspace for GitWorkspace {
    async fn snapshot(&self, workspace: &Path) -> Result<SnapshotId, CapabilityError> {
        ensure_workspace(workspace)?;
        let path: PathBuf = workspace.to_path_buf();

        let oid = tokio::task::spawn_blocking(move || snapshot_blocking(&path))
            .await
            .map_err(blocking_error)?
            .map_err(|e| CapabilityError::Workspace(format!("{e:#}")))?;

        info!(snapshot = %oid, "Created snapshot");
        Ok(SnapshotId(oid.to_string()))
    }

    async fn restore(&self, workspace: &Path, snapshot: &SnapshotId) -> Result<bool, CapabilityError> {
        ensure_workspace(workspace)?;
        let path = workspace.to_path_buf();
        let id = snapshot.as_str().to_string();

        let outcome = tokio::task::spawn_blocking(move || restore_blocking(&path, &id))
            .await
            .map_err(blocking_error)?;

        match outcome {
            Ok(()) => {
                info!(snapshot = %snapshot, "Restored snapshot");
                Ok(true)
            }
            Err(e) => Err(CapabilityError::Workspace(format!("{e:#}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent]).unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[]).unwrap();
        }
    }

    #[test]
    fn test_snapshot_on_unborn_branch() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let oid = snapshot_blocking(dir.path()).unwrap();
        assert_eq!(oid.to_string().len(), 40);

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.id(), oid);
        assert_eq!(head.parent_count(), 0);
    }

    #[test]
    fn test_snapshot_initialises_plain_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        snapshot_blocking(dir.path()).unwrap();
        assert!(dir.path().join(".git").exists());
    }

    #[test]
    fn test_repeated_snapshot_reuses_commit() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "a.txt", "one", "init");

        let first = snapshot_blocking(dir.path()).unwrap();
        let second = snapshot_blocking(dir.path()).unwrap();
        assert_eq!(first, second);

        fs::write(dir.path().join("a.txt"), "two").unwrap();
        let third = snapshot_blocking(dir.path()).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_restore_reverts_modifications_and_new_files() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "lib.rs", "fn good() {}\n", "init");

        let snap = snapshot_blocking(dir.path()).unwrap();
        fs::write(dir.path().join("lib.rs"), "fn broken(\n").unwrap();
        fs::write(dir.path().join("junk.rs"), "junk").unwrap();

        restore_blocking(dir.path(), &snap.to_string()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("lib.rs")).unwrap(), "fn good() {}\n");
        assert!(!dir.path().join("junk.rs").exists());
    }

    #[test]
    fn test_engine_state_is_neither_snapshotted_nor_removed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "fn a() {}\n").unwrap();
        fs::create_dir_all(dir.path().join(".devflow/runs/r1")).unwrap();
        fs::write(dir.path().join(".devflow/runs/r1/state.json"), "{}").unwrap();

        let snap = snapshot_blocking(dir.path()).unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        let tree = repo.find_commit(snap).unwrap().tree().unwrap();
        assert!(tree.get_name("lib.rs").is_some());
        assert!(tree.get_name(".devflow").is_none());

        fs::write(dir.path().join(".devflow/metrics.jsonl"), "{}\n").unwrap();
        restore_blocking(dir.path(), &snap.to_string()).unwrap();
        assert!(dir.path().join(".devflow/runs/r1/state.json").exists());
        assert!(dir.path().join(".devflow/metrics.jsonl").exists());
        assert_eq!(change_summary(dir.path()).unwrap(), ChangeSummary::default());
    }

    #[test]
    fn test_restore_unknown_snapshot_errors() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "a.txt", "x", "init");

        let err = restore_blocking(dir.path(), "0123456789012345678901234567890123456789").unwrap_err();
        assert!(err.to_string().contains("Snapshot not found"));
    }

    #[test]
    fn test_change_summary_counts_lines() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "existing.txt", "line one\n", "init");

        fs::write(dir.path().join("existing.txt"), "line one\nline two\n").unwrap();
        let summary = change_summary(dir.path()).unwrap();
        assert_eq!(summary.files, vec!["existing.txt".to_string()]);
        assert_eq!(summary.lines_added, 1);
        assert_eq!(summary.lines_removed, 0);
    }

    #[test]
    fn test_change_summary_clean_tree() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "stable.txt", "unchanged\n", "init");

        let summary = change_summary(dir.path()).unwrap();
        assert_eq!(summary, ChangeSummary::default());
    }

    #[tokio::test]
    async fn test_trait_snapshot_and_restore() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "a.txt", "v1", "init");

        let ws = GitWorkspace::new();
        let id = ws.snapshot(dir.path()).await.unwrap();
        fs::write(dir.path().join("a.txt"), "v2").unwrap();

        assert!(ws.restore(dir.path(), &id).await.unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_trait_rejects_missing_workspace() {
        let ws = GitWorkspace::new();
        let err = ws.snapshot(Path::new("/no/such/workspace")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Workspace(_)));
    }
}
