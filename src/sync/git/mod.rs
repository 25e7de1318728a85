//! Git markdown synchronization.
//!
//! One contact per markdown file in a git repository. The working clone is
//! pulled before diffing and committed/pushed after applying; the file's
//! sha256 is the version marker and the git author time of its last commit
//! is the remote modification instant.

pub mod markdown;
pub mod workspace;

pub use markdown::{slugify, ContactMarkdownCodec};
pub use workspace::{content_hash, FileSnapshot, GitWorkspace};

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::db::{ContactRepository, MappingRepository};
use crate::models::{EntityKind, GitConfig};

use super::engine::{sync_entity_kind, RemoteChangeSource, SyncContext};
use super::error::SyncError;
use super::reconcile::{AttachFn, RemoteResource, RemoteWrite, SyncAction};
use super::RunOutcome;

/// A git folder of contact pages, as one remote change source.
///
/// Listing works off a snapshot taken right after the pull. A file resolves
/// to its mapping by path first (the durable key across renames), then by
/// stem; unmapped files keep their stem as a candidate uid.
pub struct GitFolder<'a> {
    workspace: &'a GitWorkspace,
    subfolder: String,
    snapshot: Vec<FileSnapshot>,
    uid_by_path: HashMap<String, String>,
}

impl<'a> GitFolder<'a> {
    pub fn new(
        workspace: &'a GitWorkspace,
        subfolder: impl Into<String>,
        snapshot: Vec<FileSnapshot>,
        uid_by_path: HashMap<String, String>,
    ) -> Self {
        Self {
            workspace,
            subfolder: subfolder.into(),
            snapshot,
            uid_by_path,
        }
    }

    fn resolve_uid(&self, path: &str) -> String {
        if let Some(uid) = self.uid_by_path.get(path) {
            return uid.clone();
        }
        file_stem(path)
    }

    fn derive_path(&self, uid: &str, payload: &str) -> String {
        let stem = markdown::extract_title(payload)
            .map(|title| slugify(&title))
            .filter(|slug| !slug.is_empty())
            .unwrap_or_else(|| uid.to_string());
        if self.subfolder.is_empty() {
            format!("{}.md", stem)
        } else {
            format!("{}/{}.md", self.subfolder.trim_end_matches('/'), stem)
        }
    }
}

impl RemoteChangeSource for GitFolder<'_> {
    async fn list(&self) -> Result<Vec<RemoteResource>, SyncError> {
        Ok(self
            .snapshot
            .iter()
            .map(|file| RemoteResource {
                uid: self.resolve_uid(&file.path),
                marker: Some(file.hash.clone()),
                payload: file.content.clone(),
                location: file.path.clone(),
                modified_at: file.modified_at,
            })
            .collect())
    }

    async fn put(
        &self,
        uid: &str,
        location: Option<&str>,
        payload: &str,
    ) -> Result<RemoteWrite, SyncError> {
        let path = match location {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => self.derive_path(uid, payload),
        };
        self.workspace.write_file(&path, payload)?;
        Ok(RemoteWrite {
            marker: Some(content_hash(payload)),
            location: path,
        })
    }

    async fn delete(&self, location: &str, _marker: Option<&str>) -> Result<(), SyncError> {
        self.workspace.delete_file(location)
    }

    fn new_uid(&self, _local_id: Uuid) -> String {
        generate_markdown_id()
    }
}

/// 14-char id for a file-backed contact: minute timestamp + 2 random digits.
pub fn generate_markdown_id() -> String {
    format!(
        "{}{:02}",
        Utc::now().format("%Y%m%d%H%M"),
        rand::random::<u8>() % 100
    )
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Full sync cycle for one git config: pull, reconcile contacts, push.
/// Temporary credential material is removed whatever the outcome.
pub async fn run_config(
    pool: &SqlitePool,
    config: &GitConfig,
    work_root: &Path,
) -> Result<RunOutcome, SyncError> {
    let workspace = GitWorkspace::new(
        work_root.join(config.id.to_string()),
        &config.repo_url,
        &config.branch,
        config.auth_type,
        &config.credential,
    );
    let result = run_config_inner(pool, config, &workspace).await;
    workspace.cleanup();
    result
}

async fn run_config_inner(
    pool: &SqlitePool,
    config: &GitConfig,
    workspace: &GitWorkspace,
) -> Result<RunOutcome, SyncError> {
    workspace.open_or_clone()?;
    workspace.pull()?;

    let mappings = MappingRepository::new(pool.clone());
    let store = ContactRepository::new(pool.clone());

    let mapping_rows = mappings.list_active(config.id, EntityKind::Contact).await?;
    let uid_by_path: HashMap<String, String> = mapping_rows
        .iter()
        .filter_map(|m| {
            m.remote_location
                .as_ref()
                .map(|path| (path.clone(), m.remote_uid.clone()))
        })
        .collect();

    // One-shot dedup heuristic: on the very first sync, a file whose name
    // slug equals an existing contact's slugified full name attaches to that
    // contact instead of creating a twin. Coincidental name collisions can
    // mis-pair here; the attach is logged for auditing.
    let matcher: Option<Box<AttachFn>> = if mapping_rows.is_empty() {
        let contacts = ContactRepository::list(&store, config.vault_id).await?;
        let by_slug: HashMap<String, Uuid> = contacts
            .iter()
            .filter(|c| c.deleted_at.is_none())
            .map(|c| (slugify(&c.full_name()), c.id))
            .collect();
        Some(Box::new(move |resource: &RemoteResource| {
            by_slug.get(&slugify(&resource.uid)).copied()
        }))
    } else {
        None
    };

    let snapshot = workspace.snapshot(&config.subfolder)?;
    let folder = GitFolder::new(workspace, config.subfolder.clone(), snapshot, uid_by_path);

    let ctx = SyncContext {
        vault_id: config.vault_id,
        account_id: config.id,
        kind: EntityKind::Contact,
        mappings: &mappings,
    };
    let counts = sync_entity_kind(
        &ctx,
        &store,
        &ContactMarkdownCodec,
        &folder,
        matcher.as_deref(),
    )
    .await?;

    let added = counts.get(SyncAction::NewRemote) + counts.get(SyncAction::NewLocal);
    let updated = counts.get(SyncAction::UpdatedRemote)
        + counts.get(SyncAction::UpdatedLocal)
        + counts.get(SyncAction::Conflict);
    let deleted = counts.get(SyncAction::DeletedLocal) + counts.get(SyncAction::DeletedRemote);
    let message = format!(
        "Sync: add {}, update {}, delete {} contacts",
        added, updated, deleted
    );
    workspace.commit_and_push(&message)?;

    Ok(RunOutcome {
        counts,
        attempted: 1,
        failed: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_markdown_id_shape() {
        let id = generate_markdown_id();
        assert_eq!(id.len(), 14);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("people/ada-lovelace.md"), "ada-lovelace");
        assert_eq!(file_stem("ada.md"), "ada");
    }
}
