use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityKind;

/// The persistent correspondence between one local entity and one remote
/// resource, scoped to one sync account. The only durable sync state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub account_id: Uuid,
    pub entity_kind: EntityKind,
    pub local_id: Uuid,
    pub remote_uid: String,
    pub remote_marker: Option<String>,
    pub remote_location: Option<String>,
    /// The local entity's `updated_at` as of the last successful sync.
    pub local_updated_at: DateTime<Utc>,
    /// Best known instant of the last remote-side change.
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MappingRecord {
    pub fn new(
        vault_id: Uuid,
        account_id: Uuid,
        entity_kind: EntityKind,
        local_id: Uuid,
        remote_uid: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vault_id,
            account_id,
            entity_kind,
            local_id,
            remote_uid: remote_uid.into(),
            remote_marker: None,
            remote_location: None,
            local_updated_at: now,
            remote_updated_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_marker(mut self, marker: Option<String>) -> Self {
        self.remote_marker = marker;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.remote_location = location;
        self
    }

    pub fn with_local_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.local_updated_at = at;
        self
    }

    pub fn with_remote_updated_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.remote_updated_at = at;
        self
    }
}
