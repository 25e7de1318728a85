//! Generic executor for one (account, entity kind) reconciliation pass.
//!
//! The engine is generic over three seams: the local store, the payload
//! codec, and the remote change source. Adding an entity kind means wiring
//! a new store/codec pair, checked at compile time; there is no string
//! dispatch on entity type names.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::MappingRepository;
use crate::models::{EntityKind, LocalRecord, MappingRecord};

use super::error::SyncError;
use super::reconcile::{
    classify, resolve_conflict, ActionCounts, AttachFn, ConflictWinner, LocalState,
    RemoteResource, RemoteWrite, SyncAction, SyncItem,
};

/// Read/write access to one kind of local entity.
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    type Entity: LocalRecord;
    type Decoded;

    /// Every entity in the vault, soft-deleted ones included.
    async fn list(&self, vault_id: Uuid) -> Result<Vec<Self::Entity>, SyncError>;
    async fn create_from(
        &self,
        vault_id: Uuid,
        data: &Self::Decoded,
    ) -> Result<Self::Entity, SyncError>;
    /// Overwrite fields and fully replace sub-collections.
    async fn apply_to(&self, id: Uuid, data: &Self::Decoded) -> Result<Self::Entity, SyncError>;
    async fn soft_delete(&self, id: Uuid) -> Result<(), SyncError>;
}

/// Translates between a local entity and its remote text representation.
pub trait Codec {
    type Entity;
    type Decoded;

    fn encode(&self, entity: &Self::Entity) -> Result<String, SyncError>;
    fn decode(&self, payload: &str) -> Result<Self::Decoded, SyncError>;
}

/// One remote collection: a DAV addressbook/calendar or a git folder.
#[allow(async_fn_in_trait)]
pub trait RemoteChangeSource {
    async fn list(&self) -> Result<Vec<RemoteResource>, SyncError>;
    /// Create or overwrite a resource. `location` is the known location for
    /// updates; `None` lets the source derive one for a new resource.
    async fn put(
        &self,
        uid: &str,
        location: Option<&str>,
        payload: &str,
    ) -> Result<RemoteWrite, SyncError>;
    async fn delete(&self, location: &str, marker: Option<&str>) -> Result<(), SyncError>;
    /// The uid a freshly pushed local entity gets on this remote.
    fn new_uid(&self, local_id: Uuid) -> String;
}

/// Identifies the pass being executed and carries the mapping table.
pub struct SyncContext<'a> {
    pub vault_id: Uuid,
    pub account_id: Uuid,
    pub kind: EntityKind,
    pub mappings: &'a MappingRepository,
}

/// Classify and apply every item for one entity kind.
///
/// Items are executed strictly in sequence. A failing item is logged and
/// excluded from the tally; it never aborts the rest of the batch. A failing
/// remote listing aborts the whole pass (the caller treats that as an
/// entity-kind-level failure).
pub async fn sync_entity_kind<S, C, R>(
    ctx: &SyncContext<'_>,
    store: &S,
    codec: &C,
    remote: &R,
    attach: Option<&AttachFn>,
) -> Result<ActionCounts, SyncError>
where
    S: LocalStore,
    C: Codec<Entity = S::Entity, Decoded = S::Decoded>,
    R: RemoteChangeSource,
{
    let remotes = remote.list().await?;
    let mappings = ctx.mappings.list_active(ctx.account_id, ctx.kind).await?;
    let entities = store.list(ctx.vault_id).await?;

    let snapshots: Vec<LocalState> = entities.iter().map(LocalState::of).collect();
    let by_id: HashMap<Uuid, &S::Entity> = entities.iter().map(|e| (e.id(), e)).collect();

    let items = classify(&mappings, &snapshots, &remotes, attach);

    let mut counts = ActionCounts::new();
    for item in &items {
        match execute_item(ctx, store, codec, remote, &by_id, item).await {
            Ok(()) => counts.record(item.action),
            Err(e) => {
                tracing::warn!(
                    kind = %ctx.kind,
                    action = %item.action,
                    account_id = %ctx.account_id,
                    error = %e,
                    "sync item failed"
                );
            }
        }
    }

    Ok(counts)
}

async fn execute_item<S, C, R>(
    ctx: &SyncContext<'_>,
    store: &S,
    codec: &C,
    remote: &R,
    by_id: &HashMap<Uuid, &S::Entity>,
    item: &SyncItem<'_>,
) -> Result<(), SyncError>
where
    S: LocalStore,
    C: Codec<Entity = S::Entity, Decoded = S::Decoded>,
    R: RemoteChangeSource,
{
    match item.action {
        SyncAction::NewRemote => {
            let Some(resource) = item.remote else {
                return Ok(());
            };
            let data = codec.decode(&resource.payload)?;
            let entity = match item.local_id {
                // First-sync attach: update the matched entity instead of
                // creating a duplicate.
                Some(id) => {
                    tracing::info!(
                        kind = %ctx.kind,
                        local_id = %id,
                        uid = %resource.uid,
                        "attaching remote resource to existing entity"
                    );
                    store.apply_to(id, &data).await?
                }
                None => store.create_from(ctx.vault_id, &data).await?,
            };
            let mapping = MappingRecord::new(
                ctx.vault_id,
                ctx.account_id,
                ctx.kind,
                entity.id(),
                &resource.uid,
            )
            .with_marker(resource.marker.clone())
            .with_location(Some(resource.location.clone()))
            .with_local_updated_at(entity.updated_at())
            .with_remote_updated_at(Some(resource.modified_at.unwrap_or_else(Utc::now)));
            ctx.mappings.create(&mapping).await?;
        }

        SyncAction::NewLocal => {
            let Some(entity) = item.local_id.and_then(|id| by_id.get(&id).copied()) else {
                return Ok(());
            };
            let payload = codec.encode(entity)?;
            let uid = remote.new_uid(entity.id());
            let write = remote.put(&uid, None, &payload).await?;
            let mapping =
                MappingRecord::new(ctx.vault_id, ctx.account_id, ctx.kind, entity.id(), &uid)
                    .with_marker(write.marker.clone())
                    .with_location(Some(write.location.clone()))
                    .with_local_updated_at(entity.updated_at());
            ctx.mappings.create(&mapping).await?;
        }

        SyncAction::UpdatedRemote => {
            let (Some(mapping), Some(resource), Some(local_id)) =
                (item.mapping, item.remote, item.local_id)
            else {
                return Ok(());
            };
            pull(ctx, store, codec, mapping, resource, local_id).await?;
        }

        SyncAction::UpdatedLocal => {
            let (Some(mapping), Some(entity)) =
                (item.mapping, item.local_id.and_then(|id| by_id.get(&id).copied()))
            else {
                return Ok(());
            };
            push(ctx, codec, remote, mapping, entity).await?;
        }

        SyncAction::Conflict => {
            let (Some(mapping), Some(resource), Some(entity)) = (
                item.mapping,
                item.remote,
                item.local_id.and_then(|id| by_id.get(&id).copied()),
            ) else {
                return Ok(());
            };
            match resolve_conflict(entity.updated_at(), mapping.remote_updated_at) {
                ConflictWinner::Local => push(ctx, codec, remote, mapping, entity).await?,
                ConflictWinner::Remote => {
                    pull(ctx, store, codec, mapping, resource, entity.id()).await?
                }
            }
        }

        SyncAction::DeletedLocal => {
            let Some(mapping) = item.mapping else {
                return Ok(());
            };
            // Delete the remote copy only while it is still listed; a
            // resource that already vanished needs no round trip.
            if let Some(resource) = item.remote {
                remote
                    .delete(&resource.location, resource.marker.as_deref())
                    .await?;
            }
            ctx.mappings.soft_delete(mapping.id).await?;
        }

        SyncAction::DeletedRemote => {
            let Some(mapping) = item.mapping else {
                return Ok(());
            };
            if let Some(local_id) = item.local_id {
                store.soft_delete(local_id).await?;
            }
            ctx.mappings.soft_delete(mapping.id).await?;
        }

        SyncAction::Unchanged => {}
    }

    Ok(())
}

/// Remote state wins: overwrite the local entity and refresh the mapping.
async fn pull<S, C>(
    ctx: &SyncContext<'_>,
    store: &S,
    codec: &C,
    mapping: &MappingRecord,
    resource: &RemoteResource,
    local_id: Uuid,
) -> Result<(), SyncError>
where
    S: LocalStore,
    C: Codec<Entity = S::Entity, Decoded = S::Decoded>,
{
    let data = codec.decode(&resource.payload)?;
    let updated = store.apply_to(local_id, &data).await?;
    ctx.mappings
        .refresh_after_pull(
            mapping.id,
            resource.marker.as_deref(),
            Some(resource.location.as_str()),
            updated.updated_at(),
            resource.modified_at.unwrap_or_else(Utc::now),
        )
        .await?;
    Ok(())
}

/// Local state wins: overwrite the remote resource and refresh the mapping.
/// The remote change instant is not advanced; the push defines the remote
/// state the mapping now agrees with.
async fn push<C, R>(
    ctx: &SyncContext<'_>,
    codec: &C,
    remote: &R,
    mapping: &MappingRecord,
    entity: &C::Entity,
) -> Result<(), SyncError>
where
    C: Codec,
    C::Entity: LocalRecord,
    R: RemoteChangeSource,
{
    let payload = codec.encode(entity)?;
    let write: RemoteWrite = remote
        .put(
            &mapping.remote_uid,
            mapping.remote_location.as_deref(),
            &payload,
        )
        .await?;
    ctx.mappings
        .refresh_after_push(
            mapping.id,
            write.marker.as_deref(),
            Some(write.location.as_str()),
            entity.updated_at(),
        )
        .await?;
    Ok(())
}
