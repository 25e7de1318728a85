//! CalDAV/CardDAV synchronization.
//!
//! Contacts live in an addressbook collection, activities/tasks/reminders in
//! a calendar collection. Each entity kind gets its own filtered view of the
//! collection wired into the generic engine.

pub mod client;
pub mod ical;
pub mod vcard;

pub use client::{DavClient, DavCollections};

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{
    ActivityRepository, ContactRepository, MappingRepository, ReminderRepository, TaskRepository,
};
use crate::models::{DavAccount, EntityKind};

use super::engine::{sync_entity_kind, RemoteChangeSource, SyncContext};
use super::error::SyncError;
use super::reconcile::{ActionCounts, RemoteResource, RemoteWrite};
use super::RunOutcome;

use ical::{has_vevent, todo_kind, ActivityICalCodec, ReminderICalCodec, TaskICalCodec, TodoKind};
use vcard::ContactVCardCodec;

/// One entity kind's view of a DAV collection.
pub struct DavCollection<'a> {
    client: &'a DavClient,
    path: String,
    kind: EntityKind,
}

impl<'a> DavCollection<'a> {
    pub fn new(client: &'a DavClient, path: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            client,
            path: path.into(),
            kind,
        }
    }

    fn accepts(&self, payload: &str) -> bool {
        match self.kind {
            EntityKind::Contact => true,
            EntityKind::Activity => has_vevent(payload),
            EntityKind::Task => todo_kind(payload) == Some(TodoKind::Task),
            EntityKind::Reminder => todo_kind(payload) == Some(TodoKind::Reminder),
        }
    }

    fn extension(&self) -> &'static str {
        match self.kind {
            EntityKind::Contact => "vcf",
            _ => "ics",
        }
    }

    fn content_type(&self) -> &'static str {
        match self.kind {
            EntityKind::Contact => "text/vcard; charset=utf-8",
            _ => "text/calendar; charset=utf-8",
        }
    }
}

impl RemoteChangeSource for DavCollection<'_> {
    async fn list(&self) -> Result<Vec<RemoteResource>, SyncError> {
        let entries = match self.kind {
            EntityKind::Contact => self.client.list_addressbook(&self.path).await?,
            _ => self.client.list_calendar(&self.path).await?,
        };

        let mut resources = Vec::new();
        for entry in entries {
            let Some(data) = entry.data else {
                continue;
            };
            if !self.accepts(&data) {
                continue;
            }
            let Some(uid) = vcard::extract_uid(&data) else {
                tracing::debug!(href = %entry.href, "resource without UID skipped");
                continue;
            };
            resources.push(RemoteResource {
                uid,
                marker: entry.etag,
                payload: data,
                location: entry.href,
                modified_at: None,
            });
        }
        Ok(resources)
    }

    async fn put(
        &self,
        uid: &str,
        location: Option<&str>,
        payload: &str,
    ) -> Result<RemoteWrite, SyncError> {
        let href = match location {
            Some(href) if !href.is_empty() => href.to_string(),
            _ => format!(
                "{}/{}.{}",
                self.path.trim_end_matches('/'),
                uid,
                self.extension()
            ),
        };
        let etag = self
            .client
            .put(&href, self.content_type(), payload.to_string(), None)
            .await?;
        Ok(RemoteWrite {
            marker: etag,
            location: href,
        })
    }

    async fn delete(&self, location: &str, marker: Option<&str>) -> Result<(), SyncError> {
        self.client.delete(location, marker).await
    }

    fn new_uid(&self, local_id: Uuid) -> String {
        local_id.to_string()
    }
}

/// Run all entity kinds for one DAV account. Kind-level failures are
/// isolated; the outcome records how many kinds were attempted and failed.
pub async fn run_account(pool: &SqlitePool, account: &DavAccount) -> Result<RunOutcome, SyncError> {
    let client = DavClient::new(&account.server_url, &account.username, &account.credential)?;
    let mappings = MappingRepository::new(pool.clone());

    let mut outcome = RunOutcome::default();
    for kind in EntityKind::ALL {
        outcome.attempted += 1;
        match sync_kind(pool, &client, &mappings, account, kind).await {
            Ok(counts) => outcome.counts.merge(&counts),
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(
                    kind = %kind,
                    account_id = %account.id,
                    error = %e,
                    "entity kind sync failed"
                );
            }
        }
    }
    Ok(outcome)
}

async fn sync_kind(
    pool: &SqlitePool,
    client: &DavClient,
    mappings: &MappingRepository,
    account: &DavAccount,
    kind: EntityKind,
) -> Result<ActionCounts, SyncError> {
    let path = match kind {
        EntityKind::Contact => {
            if !account.carddav_enabled {
                return Ok(ActionCounts::new());
            }
            match &account.carddav_path {
                Some(path) => path.clone(),
                None => return Ok(ActionCounts::new()),
            }
        }
        _ => {
            if !account.caldav_enabled {
                return Ok(ActionCounts::new());
            }
            match &account.caldav_path {
                Some(path) => path.clone(),
                None => return Ok(ActionCounts::new()),
            }
        }
    };

    let collection = DavCollection::new(client, path, kind);
    let ctx = SyncContext {
        vault_id: account.vault_id,
        account_id: account.id,
        kind,
        mappings,
    };

    match kind {
        EntityKind::Contact => {
            let store = ContactRepository::new(pool.clone());
            sync_entity_kind(&ctx, &store, &ContactVCardCodec, &collection, None).await
        }
        EntityKind::Activity => {
            let store = ActivityRepository::new(pool.clone());
            sync_entity_kind(&ctx, &store, &ActivityICalCodec, &collection, None).await
        }
        EntityKind::Task => {
            let store = TaskRepository::new(pool.clone());
            sync_entity_kind(&ctx, &store, &TaskICalCodec, &collection, None).await
        }
        EntityKind::Reminder => {
            let store = ReminderRepository::new(pool.clone());
            sync_entity_kind(&ctx, &store, &ReminderICalCodec, &collection, None).await
        }
    }
}
