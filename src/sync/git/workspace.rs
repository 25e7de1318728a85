//! Working-clone management for git markdown sync.
//!
//! Each config owns a disposable clone under the work dir; it is a cache
//! rebuildable from the repo URL and branch. Every operation opens the
//! repository, does its work and drops the handle, so no libgit2 state is
//! ever held across an await point.

use chrono::{DateTime, TimeZone, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::GitAuthType;
use crate::sync::error::SyncError;

const COMMIT_AUTHOR: &str = "Amity Sync";
const COMMIT_EMAIL: &str = "sync@amity.invalid";

/// One markdown file as seen in the working tree after a pull.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Repo-relative path.
    pub path: String,
    pub content: String,
    /// sha256 of the content; the resource's version marker.
    pub hash: String,
    /// Author time of the last commit touching the file.
    pub modified_at: Option<DateTime<Utc>>,
}

pub struct GitWorkspace {
    work_dir: PathBuf,
    repo_url: String,
    branch: String,
    auth_type: GitAuthType,
    credential: String,
    ssh_key_file: Mutex<Option<PathBuf>>,
}

impl GitWorkspace {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        repo_url: impl Into<String>,
        branch: impl Into<String>,
        auth_type: GitAuthType,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            repo_url: repo_url.into(),
            branch: branch.into(),
            auth_type,
            credential: credential.into(),
            ssh_key_file: Mutex::new(None),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Clone the repo if the working tree does not exist yet.
    pub fn open_or_clone(&self) -> Result<(), SyncError> {
        if self.work_dir.join(".git").exists() {
            Repository::open(&self.work_dir)?;
            return Ok(());
        }
        if let Some(parent) = self.work_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks()?);
        RepoBuilder::new()
            .branch(&self.branch)
            .fetch_options(fetch)
            .clone(&self.repo_url, &self.work_dir)?;
        Ok(())
    }

    /// Fetch the branch and fast-forward the local ref. A diverged local
    /// branch is left alone; the commit-and-push at the end of the run
    /// resolves it (or fails and surfaces as a run error).
    pub fn pull(&self) -> Result<(), SyncError> {
        let repo = Repository::open(&self.work_dir)?;
        let mut remote = repo.find_remote("origin")?;
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks()?);
        let refspec = format!("refs/heads/{}", self.branch);
        remote.fetch(&[refspec.as_str()], Some(&mut fetch), None)?;

        let remote_ref = format!("refs/remotes/origin/{}", self.branch);
        let Ok(remote_oid) = repo.refname_to_id(&remote_ref) else {
            return Ok(());
        };
        let local_ref = format!("refs/heads/{}", self.branch);
        match repo.refname_to_id(&local_ref) {
            Ok(local_oid) if local_oid == remote_oid => {}
            Ok(local_oid) => {
                if repo.graph_descendant_of(remote_oid, local_oid)? {
                    repo.reference(&local_ref, remote_oid, true, "sync: fast-forward")?;
                    repo.set_head(&local_ref)?;
                    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
                } else {
                    tracing::warn!(
                        branch = %self.branch,
                        "local branch diverged from remote; keeping local state"
                    );
                }
            }
            Err(_) => {
                repo.reference(&local_ref, remote_oid, true, "sync: create branch")?;
                repo.set_head(&local_ref)?;
                repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
            }
        }
        Ok(())
    }

    /// Read every markdown file under the subfolder, with content hash and
    /// last git modification time.
    pub fn snapshot(&self, subfolder: &str) -> Result<Vec<FileSnapshot>, SyncError> {
        let base = if subfolder.is_empty() {
            self.work_dir.clone()
        } else {
            self.work_dir.join(subfolder)
        };
        if !base.exists() {
            return Ok(Vec::new());
        }

        let repo = Repository::open(&self.work_dir)?;
        let mut paths = Vec::new();
        collect_markdown_files(&base, &mut paths)?;
        paths.sort();

        let mut snapshots = Vec::with_capacity(paths.len());
        for absolute in paths {
            let relative = absolute
                .strip_prefix(&self.work_dir)
                .unwrap_or(&absolute)
                .to_string_lossy()
                .into_owned();
            let content = std::fs::read_to_string(&absolute)?;
            snapshots.push(FileSnapshot {
                hash: content_hash(&content),
                modified_at: file_last_modified(&repo, &relative),
                path: relative,
                content,
            });
        }
        Ok(snapshots)
    }

    pub fn read_file(&self, path: &str) -> Result<String, SyncError> {
        Ok(std::fs::read_to_string(self.work_dir.join(path))?)
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<(), SyncError> {
        let full = self.work_dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, content)?;
        Ok(())
    }

    pub fn delete_file(&self, path: &str) -> Result<(), SyncError> {
        let full = self.work_dir.join(path);
        if full.exists() {
            std::fs::remove_file(full)?;
        }
        Ok(())
    }

    /// Stage everything, commit, push. Returns false when the tree is clean.
    pub fn commit_and_push(&self, message: &str) -> Result<bool, SyncError> {
        let repo = Repository::open(&self.work_dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(parent) = &head {
            if parent.tree_id() == tree_id {
                return Ok(false);
            }
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now(COMMIT_AUTHOR, COMMIT_EMAIL)?;
        match &head {
            Some(parent) => {
                repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &[parent])?
            }
            None => repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &[])?,
        };

        let mut remote = repo.find_remote("origin")?;
        let mut options = PushOptions::new();
        options.remote_callbacks(self.callbacks()?);
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        remote.push(&[refspec.as_str()], Some(&mut options))?;
        Ok(true)
    }

    /// Delete temporary credential material. Must run after every sync,
    /// successful or not.
    pub fn cleanup(&self) {
        let mut guard = self.ssh_key_file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = guard.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove temp key file");
            }
        }
    }

    fn callbacks(&self) -> Result<RemoteCallbacks<'_>, SyncError> {
        let mut callbacks = RemoteCallbacks::new();
        match self.auth_type {
            GitAuthType::SshKey => {
                let key_path = self.ensure_key_file()?;
                callbacks.credentials(move |_url, username_from_url, _allowed| {
                    Cred::ssh_key(username_from_url.unwrap_or("git"), None, &key_path, None)
                });
            }
            GitAuthType::Token => {
                let token = self.credential.clone();
                callbacks.credentials(move |_url, username_from_url, _allowed| {
                    Cred::userpass_plaintext(username_from_url.unwrap_or("git"), &token)
                });
            }
        }
        Ok(callbacks)
    }

    /// Write the SSH key to a 0600 temp file, once per workspace lifetime.
    fn ensure_key_file(&self) -> Result<PathBuf, SyncError> {
        let mut guard = self.ssh_key_file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = guard.as_ref() {
            return Ok(path.clone());
        }
        let path = std::env::temp_dir().join(format!("amity_ssh_{}.key", Uuid::new_v4()));
        std::fs::write(&path, &self.credential)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        *guard = Some(path.clone());
        Ok(path)
    }
}

fn collect_markdown_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_markdown_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Author time of the newest commit that changed the file.
fn file_last_modified(repo: &Repository, path: &str) -> Option<DateTime<Utc>> {
    let target = Path::new(path);
    let mut revwalk = repo.revwalk().ok()?;
    revwalk.push_head().ok()?;
    revwalk
        .set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)
        .ok()?;

    for oid in revwalk.flatten() {
        let commit = repo.find_commit(oid).ok()?;
        let blob = commit
            .tree()
            .ok()?
            .get_path(target)
            .ok()
            .map(|entry| entry.id());
        let parent_blob = commit.parent(0).ok().and_then(|parent| {
            parent
                .tree()
                .ok()
                .and_then(|tree| tree.get_path(target).ok())
                .map(|entry| entry.id())
        });
        if blob != parent_blob {
            let seconds = commit.author().when().seconds();
            return Utc.timestamp_opt(seconds, 0).single();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_workspace() -> (GitWorkspace, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let work_dir = temp_dir.path().join("clone");
        Repository::init(&work_dir).unwrap();
        let workspace = GitWorkspace::new(
            &work_dir,
            "unused",
            "main",
            GitAuthType::Token,
            "unused",
        );
        (workspace, temp_dir)
    }

    fn commit_all(workspace: &GitWorkspace, message: &str) {
        let repo = Repository::open(workspace.work_dir()).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@example.org").unwrap();
        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        match &head {
            Some(parent) => repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[parent])
                .unwrap(),
            None => repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
                .unwrap(),
        };
    }

    #[test]
    fn test_snapshot_lists_markdown_with_hashes() {
        let (workspace, _dir) = init_workspace();
        workspace
            .write_file("people/ada-lovelace.md", "---\ntitle: Ada Lovelace\n---\n")
            .unwrap();
        workspace.write_file("people/.hidden.md", "ignored").unwrap();
        workspace.write_file("README.txt", "not markdown").unwrap();
        commit_all(&workspace, "add ada");

        let snapshots = workspace.snapshot("people").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].path, "people/ada-lovelace.md");
        assert_eq!(
            snapshots[0].hash,
            content_hash("---\ntitle: Ada Lovelace\n---\n")
        );
        assert!(snapshots[0].modified_at.is_some());
    }

    #[test]
    fn test_snapshot_of_missing_subfolder_is_empty() {
        let (workspace, _dir) = init_workspace();
        assert!(workspace.snapshot("nope").unwrap().is_empty());
    }

    #[test]
    fn test_file_last_modified_tracks_changes() {
        let (workspace, _dir) = init_workspace();
        workspace.write_file("a.md", "---\ntitle: A B\n---\n").unwrap();
        commit_all(&workspace, "add a");
        let first = workspace.snapshot("").unwrap()[0].modified_at.unwrap();

        workspace.write_file("b.md", "---\ntitle: C D\n---\n").unwrap();
        commit_all(&workspace, "add b");

        // a.md's last-modified stays at its own commit.
        let snapshots = workspace.snapshot("").unwrap();
        let a = snapshots.iter().find(|s| s.path == "a.md").unwrap();
        assert_eq!(a.modified_at.unwrap(), first);
    }

    #[test]
    fn test_uncommitted_file_has_no_git_timestamp() {
        let (workspace, _dir) = init_workspace();
        workspace.write_file("a.md", "---\ntitle: A B\n---\n").unwrap();
        commit_all(&workspace, "add a");
        workspace.write_file("new.md", "---\ntitle: New One\n---\n").unwrap();

        let snapshots = workspace.snapshot("").unwrap();
        let fresh = snapshots.iter().find(|s| s.path == "new.md").unwrap();
        assert!(fresh.modified_at.is_none());
    }

    #[test]
    fn test_delete_file_is_idempotent() {
        let (workspace, _dir) = init_workspace();
        workspace.write_file("a.md", "x").unwrap();
        workspace.delete_file("a.md").unwrap();
        workspace.delete_file("a.md").unwrap();
        assert!(workspace.snapshot("").unwrap().is_empty());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn test_cleanup_removes_key_file() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = GitWorkspace::new(
            temp_dir.path().join("clone"),
            "unused",
            "main",
            GitAuthType::SshKey,
            "fake key material",
        );
        let path = workspace.ensure_key_file().unwrap();
        assert!(path.exists());
        workspace.cleanup();
        assert!(!path.exists());
    }
}
