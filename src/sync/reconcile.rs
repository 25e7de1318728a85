//! Change classification for one (account, entity kind) pair.
//!
//! Classification is a pure function over three inputs: the active mapping
//! rows, a snapshot of the local entities (soft-deleted ones included, so
//! local deletions are visible), and the current remote listing. It never
//! consults a changelog; re-running against unchanged state yields only
//! `Unchanged` items, which is what makes interrupted runs safe to retry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

use crate::models::{LocalRecord, MappingRecord};

/// What a single classified item requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    NewRemote,
    NewLocal,
    UpdatedRemote,
    UpdatedLocal,
    Conflict,
    DeletedLocal,
    DeletedRemote,
    Unchanged,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::NewRemote => "new_remote",
            SyncAction::NewLocal => "new_local",
            SyncAction::UpdatedRemote => "updated_remote",
            SyncAction::UpdatedLocal => "updated_local",
            SyncAction::Conflict => "conflict",
            SyncAction::DeletedLocal => "deleted_local",
            SyncAction::DeletedRemote => "deleted_remote",
            SyncAction::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resource as currently listed on the remote side. Never persisted.
#[derive(Debug, Clone)]
pub struct RemoteResource {
    pub uid: String,
    /// ETag (DAV) or content hash (git).
    pub marker: Option<String>,
    pub payload: String,
    /// Href (DAV) or repo-relative file path (git).
    pub location: String,
    /// Git-log author time of the last change; `None` for DAV.
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteResource {
    pub fn new(uid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            marker: None,
            payload: payload.into(),
            location: String::new(),
            modified_at: None,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }
}

/// Result of writing a resource to the remote side.
#[derive(Debug, Clone)]
pub struct RemoteWrite {
    pub marker: Option<String>,
    pub location: String,
}

/// The three facts classification needs about a local entity.
#[derive(Debug, Clone, Copy)]
pub struct LocalState {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl LocalState {
    pub fn of<T: LocalRecord>(record: &T) -> Self {
        Self {
            id: record.id(),
            updated_at: record.updated_at(),
            deleted: record.is_deleted(),
        }
    }
}

/// First-sync hook pairing an unmapped remote resource with an existing
/// unmapped local entity (git slug matching).
pub type AttachFn = dyn Fn(&RemoteResource) -> Option<Uuid> + Send + Sync;

/// One classified item, borrowing into the classification inputs.
#[derive(Debug)]
pub struct SyncItem<'a> {
    pub action: SyncAction,
    pub mapping: Option<&'a MappingRecord>,
    pub local_id: Option<Uuid>,
    pub remote: Option<&'a RemoteResource>,
}

/// Classify every mapping row, then unmapped remotes and locals.
///
/// `attach` is the one-shot first-sync hook for git: given an unmapped
/// remote resource, it may name an existing local entity to attach to, in
/// which case the `NewRemote` item carries that `local_id` and execution
/// updates instead of creating.
pub fn classify<'a>(
    mappings: &'a [MappingRecord],
    locals: &[LocalState],
    remotes: &'a [RemoteResource],
    attach: Option<&AttachFn>,
) -> Vec<SyncItem<'a>> {
    let local_by_id: HashMap<Uuid, &LocalState> = locals.iter().map(|l| (l.id, l)).collect();
    let remote_by_uid: HashMap<&str, &'a RemoteResource> =
        remotes.iter().map(|r| (r.uid.as_str(), r)).collect();
    let mapped_locals: HashSet<Uuid> = mappings.iter().map(|m| m.local_id).collect();
    let mapped_uids: HashSet<&str> = mappings.iter().map(|m| m.remote_uid.as_str()).collect();

    let mut items = Vec::new();

    for mapping in mappings {
        let local = local_by_id.get(&mapping.local_id).copied();
        let remote = remote_by_uid.get(mapping.remote_uid.as_str()).copied();

        match (local, remote) {
            (Some(local), _) if local.deleted => items.push(SyncItem {
                action: SyncAction::DeletedLocal,
                mapping: Some(mapping),
                local_id: Some(local.id),
                remote,
            }),
            (_, None) => items.push(SyncItem {
                action: SyncAction::DeletedRemote,
                mapping: Some(mapping),
                local_id: local.map(|l| l.id),
                remote: None,
            }),
            (Some(local), Some(remote)) => {
                let remote_changed = mapping.remote_marker.is_some()
                    && remote.marker.as_deref() != mapping.remote_marker.as_deref();
                let local_changed = local.updated_at > mapping.local_updated_at;
                let action = match (local_changed, remote_changed) {
                    (true, true) => SyncAction::Conflict,
                    (false, true) => SyncAction::UpdatedRemote,
                    (true, false) => SyncAction::UpdatedLocal,
                    (false, false) => SyncAction::Unchanged,
                };
                items.push(SyncItem {
                    action,
                    mapping: Some(mapping),
                    local_id: Some(local.id),
                    remote: Some(remote),
                });
            }
            // Mapping whose local row is gone entirely; nothing to do until
            // the remote side disappears too.
            (None, Some(_)) => {}
        }
    }

    let mut attached_locals: HashSet<Uuid> = HashSet::new();
    for remote in remotes {
        if !mapped_uids.contains(remote.uid.as_str()) {
            let attached = attach
                .and_then(|f| f(remote))
                .filter(|id| !attached_locals.contains(id));
            if let Some(id) = attached {
                attached_locals.insert(id);
            }
            items.push(SyncItem {
                action: SyncAction::NewRemote,
                mapping: None,
                local_id: attached,
                remote: Some(remote),
            });
        }
    }

    for local in locals {
        if !local.deleted
            && !mapped_locals.contains(&local.id)
            && !attached_locals.contains(&local.id)
        {
            items.push(SyncItem {
                action: SyncAction::NewLocal,
                mapping: None,
                local_id: Some(local.id),
                remote: None,
            });
        }
    }

    items
}

/// Which side a conflict resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Deterministic last-write-wins. Compares the local entity's `updated_at`
/// against the last known remote change instant recorded on the mapping.
/// Ties favor local; so does a mapping that never saw a remote change.
pub fn resolve_conflict(
    local_updated_at: DateTime<Utc>,
    remote_updated_at: Option<DateTime<Utc>>,
) -> ConflictWinner {
    let remote = remote_updated_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
    if local_updated_at >= remote {
        ConflictWinner::Local
    } else {
        ConflictWinner::Remote
    }
}

/// Per-action tallies for one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionCounts(HashMap<&'static str, u32>);

impl ActionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: SyncAction) {
        *self.0.entry(action.as_str()).or_insert(0) += 1;
    }

    pub fn get(&self, action: SyncAction) -> u32 {
        self.0.get(action.as_str()).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &ActionCounts) {
        for (key, value) in &other.0 {
            *self.0.entry(*key).or_insert(0) += *value;
        }
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    /// Count of items that changed something (everything but `unchanged`).
    pub fn applied(&self) -> u32 {
        self.total() - self.get(SyncAction::Unchanged)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort();
        let parts: Vec<String> = entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, minute, 0).unwrap()
    }

    fn mapping(local_id: Uuid, uid: &str, marker: Option<&str>, local_at: DateTime<Utc>) -> MappingRecord {
        MappingRecord::new(Uuid::new_v4(), Uuid::new_v4(), EntityKind::Contact, local_id, uid)
            .with_marker(marker.map(String::from))
            .with_local_updated_at(local_at)
    }

    fn local(id: Uuid, updated_at: DateTime<Utc>) -> LocalState {
        LocalState {
            id,
            updated_at,
            deleted: false,
        }
    }

    #[test]
    fn test_classify_unchanged() {
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![local(id, ts(5))];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag1")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action, SyncAction::Unchanged);
    }

    #[test]
    fn test_classify_updated_local() {
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![local(id, ts(10))];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag1")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items[0].action, SyncAction::UpdatedLocal);
    }

    #[test]
    fn test_classify_updated_remote() {
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![local(id, ts(5))];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag2")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items[0].action, SyncAction::UpdatedRemote);
    }

    #[test]
    fn test_classify_conflict() {
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![local(id, ts(10))];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag2")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items[0].action, SyncAction::Conflict);
    }

    #[test]
    fn test_classify_no_marker_means_no_remote_change() {
        // A mapping that never recorded a marker cannot see remote change.
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", None, ts(5))];
        let locals = vec![local(id, ts(5))];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag2")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items[0].action, SyncAction::Unchanged);
    }

    #[test]
    fn test_classify_deleted_local() {
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![LocalState {
            id,
            updated_at: ts(6),
            deleted: true,
        }];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag1")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items[0].action, SyncAction::DeletedLocal);
        assert!(items[0].remote.is_some());
    }

    #[test]
    fn test_classify_deleted_remote() {
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![local(id, ts(5))];

        let items = classify(&mappings, &locals, &[], None);
        assert_eq!(items[0].action, SyncAction::DeletedRemote);
    }

    #[test]
    fn test_classify_deleted_local_wins_over_deleted_remote() {
        // Local soft-delete takes precedence even when the remote is gone too.
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag1"), ts(5))];
        let locals = vec![LocalState {
            id,
            updated_at: ts(6),
            deleted: true,
        }];

        let items = classify(&mappings, &locals, &[], None);
        assert_eq!(items[0].action, SyncAction::DeletedLocal);
        assert!(items[0].remote.is_none());
    }

    #[test]
    fn test_classify_new_remote_and_new_local() {
        let unmapped_local = Uuid::new_v4();
        let locals = vec![local(unmapped_local, ts(5))];
        let remotes = vec![RemoteResource::new("u-new", "").with_marker("etag")];

        let items = classify(&[], &locals, &remotes, None);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].action, SyncAction::NewRemote);
        assert!(items[0].local_id.is_none());
        assert_eq!(items[1].action, SyncAction::NewLocal);
        assert_eq!(items[1].local_id, Some(unmapped_local));
    }

    #[test]
    fn test_classify_soft_deleted_unmapped_local_is_skipped() {
        let locals = vec![LocalState {
            id: Uuid::new_v4(),
            updated_at: ts(5),
            deleted: true,
        }];

        let items = classify(&[], &locals, &[], None);
        assert!(items.is_empty());
    }

    #[test]
    fn test_classify_attach_hook() {
        let existing = Uuid::new_v4();
        let locals = vec![local(existing, ts(5))];
        let remotes = vec![RemoteResource::new("ada-lovelace", "")];

        let hook: &AttachFn = &move |r: &RemoteResource| {
            if r.uid == "ada-lovelace" {
                Some(existing)
            } else {
                None
            }
        };
        let items = classify(&[], &locals, &remotes, Some(hook));

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action, SyncAction::NewRemote);
        assert_eq!(items[0].local_id, Some(existing));
    }

    #[test]
    fn test_classify_attach_hook_claims_each_local_once() {
        let existing = Uuid::new_v4();
        let locals = vec![local(existing, ts(5))];
        let remotes = vec![
            RemoteResource::new("ada-lovelace", ""),
            RemoteResource::new("ada-lovelace-1", ""),
        ];

        // A hook that would pair every file with the same contact.
        let hook: &AttachFn = &move |_: &RemoteResource| Some(existing);
        let items = classify(&[], &locals, &remotes, Some(hook));

        let attached: Vec<_> = items.iter().filter(|i| i.local_id == Some(existing)).collect();
        assert_eq!(attached.len(), 1);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_classify_idempotent_second_pass() {
        // After a successful pass the mapping agrees with both sides; a
        // second classification must be all Unchanged.
        let id = Uuid::new_v4();
        let mappings = vec![mapping(id, "u1", Some("etag2"), ts(10))];
        let locals = vec![local(id, ts(10))];
        let remotes = vec![RemoteResource::new("u1", "").with_marker("etag2")];

        let items = classify(&mappings, &locals, &remotes, None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action, SyncAction::Unchanged);
    }

    #[test]
    fn test_resolve_conflict_local_wins_when_newer() {
        assert_eq!(
            resolve_conflict(ts(5), Some(ts(0))),
            ConflictWinner::Local
        );
    }

    #[test]
    fn test_resolve_conflict_remote_wins_when_newer() {
        assert_eq!(
            resolve_conflict(ts(0), Some(ts(5))),
            ConflictWinner::Remote
        );
    }

    #[test]
    fn test_resolve_conflict_tie_favors_local() {
        assert_eq!(
            resolve_conflict(ts(5), Some(ts(5))),
            ConflictWinner::Local
        );
    }

    #[test]
    fn test_resolve_conflict_missing_remote_instant_favors_local() {
        assert_eq!(resolve_conflict(ts(0), None), ConflictWinner::Local);
    }

    #[test]
    fn test_action_counts() {
        let mut counts = ActionCounts::new();
        counts.record(SyncAction::NewRemote);
        counts.record(SyncAction::NewRemote);
        counts.record(SyncAction::Unchanged);

        assert_eq!(counts.get(SyncAction::NewRemote), 2);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.applied(), 2);

        let mut merged = ActionCounts::new();
        merged.record(SyncAction::NewLocal);
        merged.merge(&counts);
        assert_eq!(merged.get(SyncAction::NewLocal), 1);
        assert_eq!(merged.get(SyncAction::NewRemote), 2);
        assert_eq!(format!("{}", merged), "new_local=1 new_remote=2 unchanged=1");
    }
}
