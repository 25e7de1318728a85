use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{EntityKind, MappingRecord};

use super::{parse_ts, parse_ts_opt};

/// Persistent mapping table shared by the DAV and git subsystems.
///
/// The two uniqueness invariants — one active mapping per local entity and
/// per remote uid within an account — are enforced by partial unique
/// indexes, so duplicate creation attempts surface as database errors
/// rather than silently corrupting the table.
pub struct MappingRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MappingRow {
    id: String,
    vault_id: String,
    account_id: String,
    entity_kind: String,
    local_id: String,
    remote_uid: String,
    remote_marker: Option<String>,
    remote_location: Option<String>,
    local_updated_at: String,
    remote_updated_at: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl MappingRow {
    fn hydrate(self) -> MappingRecord {
        MappingRecord {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&self.vault_id).unwrap_or_default(),
            account_id: Uuid::parse_str(&self.account_id).unwrap_or_default(),
            entity_kind: self.entity_kind.parse().unwrap_or(EntityKind::Contact),
            local_id: Uuid::parse_str(&self.local_id).unwrap_or_default(),
            remote_uid: self.remote_uid,
            remote_marker: self.remote_marker,
            remote_location: self.remote_location,
            local_updated_at: parse_ts(&self.local_updated_at),
            remote_updated_at: parse_ts_opt(self.remote_updated_at.as_deref()),
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            deleted_at: parse_ts_opt(self.deleted_at.as_deref()),
        }
    }
}

impl MappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new mapping. Fails on a uniqueness violation.
    pub async fn create(&self, mapping: &MappingRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sync_mappings
                (id, vault_id, account_id, entity_kind, local_id, remote_uid,
                 remote_marker, remote_location, local_updated_at, remote_updated_at,
                 created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mapping.id.to_string())
        .bind(mapping.vault_id.to_string())
        .bind(mapping.account_id.to_string())
        .bind(mapping.entity_kind.as_str())
        .bind(mapping.local_id.to_string())
        .bind(&mapping.remote_uid)
        .bind(&mapping.remote_marker)
        .bind(&mapping.remote_location)
        .bind(mapping.local_updated_at.to_rfc3339())
        .bind(mapping.remote_updated_at.map(|t| t.to_rfc3339()))
        .bind(mapping.created_at.to_rfc3339())
        .bind(mapping.updated_at.to_rfc3339())
        .bind(mapping.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_active(
        &self,
        account_id: Uuid,
        kind: EntityKind,
    ) -> Result<Vec<MappingRecord>, sqlx::Error> {
        let rows: Vec<MappingRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_mappings
            WHERE account_id = ? AND entity_kind = ? AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MappingRow::hydrate).collect())
    }

    pub async fn get_by_local(
        &self,
        account_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> Result<Option<MappingRecord>, sqlx::Error> {
        let row: Option<MappingRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_mappings
            WHERE account_id = ? AND entity_kind = ? AND local_id = ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(local_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MappingRow::hydrate))
    }

    pub async fn get_by_remote_uid(
        &self,
        account_id: Uuid,
        kind: EntityKind,
        remote_uid: &str,
    ) -> Result<Option<MappingRecord>, sqlx::Error> {
        let row: Option<MappingRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_mappings
            WHERE account_id = ? AND entity_kind = ? AND remote_uid = ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(remote_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MappingRow::hydrate))
    }

    /// Lookup by remote location. For git the file path, not the markdown
    /// id, is the durable key across renames.
    pub async fn get_by_location(
        &self,
        account_id: Uuid,
        kind: EntityKind,
        location: &str,
    ) -> Result<Option<MappingRecord>, sqlx::Error> {
        let row: Option<MappingRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_mappings
            WHERE account_id = ? AND entity_kind = ? AND remote_location = ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(location)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MappingRow::hydrate))
    }

    /// Refresh after pulling remote state into the local entity: new marker,
    /// location, and both change instants.
    pub async fn refresh_after_pull(
        &self,
        id: Uuid,
        marker: Option<&str>,
        location: Option<&str>,
        local_updated_at: DateTime<Utc>,
        remote_updated_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE sync_mappings
            SET remote_marker = ?, remote_location = ?, local_updated_at = ?,
                remote_updated_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(marker)
        .bind(location)
        .bind(local_updated_at.to_rfc3339())
        .bind(remote_updated_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh after pushing local state to the remote. The push itself
    /// defines the remote state the mapping now agrees with, so
    /// `remote_updated_at` is left alone.
    pub async fn refresh_after_push(
        &self,
        id: Uuid,
        marker: Option<&str>,
        location: Option<&str>,
        local_updated_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE sync_mappings
            SET remote_marker = ?, remote_location = ?, local_updated_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(marker)
        .bind(location)
        .bind(local_updated_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE sync_mappings SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active mapping counts per entity kind, for status reporting.
    pub async fn counts_by_kind(
        &self,
        account_id: Uuid,
    ) -> Result<HashMap<String, i64>, sqlx::Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT entity_kind, COUNT(*) FROM sync_mappings
            WHERE account_id = ? AND deleted_at IS NULL
            GROUP BY entity_kind
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
