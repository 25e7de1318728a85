use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{GitAuthType, GitConfig, SyncStatus};

use super::dav_account_repo::truncate_error;
use super::{parse_ts, parse_ts_opt};

pub struct GitConfigRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct GitConfigRow {
    id: String,
    vault_id: String,
    repo_url: String,
    branch: String,
    subfolder: String,
    auth_type: String,
    credential: String,
    enabled: i64,
    sync_interval_minutes: i64,
    last_synced_at: Option<String>,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl GitConfigRow {
    fn hydrate(self) -> GitConfig {
        GitConfig {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&self.vault_id).unwrap_or_default(),
            repo_url: self.repo_url,
            branch: self.branch,
            subfolder: self.subfolder,
            auth_type: GitAuthType::from_str(&self.auth_type).unwrap_or(GitAuthType::Token),
            credential: self.credential,
            enabled: self.enabled != 0,
            sync_interval_minutes: self.sync_interval_minutes,
            last_synced_at: parse_ts_opt(self.last_synced_at.as_deref()),
            last_sync_status: self.last_sync_status.as_deref().and_then(|s| s.parse().ok()),
            last_sync_error: self.last_sync_error,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            deleted_at: parse_ts_opt(self.deleted_at.as_deref()),
        }
    }
}

impl GitConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the vault's config. Fails if the vault already has one.
    pub async fn create(&self, config: &GitConfig) -> Result<GitConfig, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO git_configs
                (id, vault_id, repo_url, branch, subfolder, auth_type, credential,
                 enabled, sync_interval_minutes, last_synced_at, last_sync_status,
                 last_sync_error, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(config.id.to_string())
        .bind(config.vault_id.to_string())
        .bind(&config.repo_url)
        .bind(&config.branch)
        .bind(&config.subfolder)
        .bind(config.auth_type.as_str())
        .bind(&config.credential)
        .bind(config.enabled as i64)
        .bind(config.sync_interval_minutes)
        .bind(config.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(config.last_sync_status.map(|s| s.as_str()))
        .bind(&config.last_sync_error)
        .bind(config.created_at.to_rfc3339())
        .bind(config.updated_at.to_rfc3339())
        .bind(config.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.get_by_id(config.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<GitConfig>, sqlx::Error> {
        let row: Option<GitConfigRow> =
            sqlx::query_as("SELECT * FROM git_configs WHERE id = ? AND deleted_at IS NULL")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(GitConfigRow::hydrate))
    }

    pub async fn get_for_vault(&self, vault_id: Uuid) -> Result<Option<GitConfig>, sqlx::Error> {
        let row: Option<GitConfigRow> =
            sqlx::query_as("SELECT * FROM git_configs WHERE vault_id = ? AND deleted_at IS NULL")
                .bind(vault_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(GitConfigRow::hydrate))
    }

    /// All enabled configs across every vault; the scheduler sweep uses this.
    pub async fn list_enabled(&self) -> Result<Vec<GitConfig>, sqlx::Error> {
        let rows: Vec<GitConfigRow> = sqlx::query_as(
            "SELECT * FROM git_configs WHERE deleted_at IS NULL AND enabled = 1 ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GitConfigRow::hydrate).collect())
    }

    pub async fn mark_running(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE git_configs SET last_sync_status = ?, updated_at = ? WHERE id = ?")
            .bind(SyncStatus::Running.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish(
        &self,
        id: Uuid,
        status: SyncStatus,
        error: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE git_configs
            SET last_sync_status = ?, last_sync_error = ?, last_synced_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error.map(truncate_error))
        .bind(synced_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE git_configs SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
