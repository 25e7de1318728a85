use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{DavAccount, SyncStatus};

use super::{parse_ts, parse_ts_opt};

pub struct DavAccountRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DavAccountRow {
    id: String,
    vault_id: String,
    name: String,
    server_url: String,
    username: String,
    credential: String,
    carddav_enabled: i64,
    caldav_enabled: i64,
    carddav_path: Option<String>,
    caldav_path: Option<String>,
    sync_interval_minutes: i64,
    last_synced_at: Option<String>,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
    sync_token_card: Option<String>,
    sync_token_cal: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl DavAccountRow {
    fn hydrate(self) -> DavAccount {
        DavAccount {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&self.vault_id).unwrap_or_default(),
            name: self.name,
            server_url: self.server_url,
            username: self.username,
            credential: self.credential,
            carddav_enabled: self.carddav_enabled != 0,
            caldav_enabled: self.caldav_enabled != 0,
            carddav_path: self.carddav_path,
            caldav_path: self.caldav_path,
            sync_interval_minutes: self.sync_interval_minutes,
            last_synced_at: parse_ts_opt(self.last_synced_at.as_deref()),
            last_sync_status: self.last_sync_status.as_deref().and_then(|s| s.parse().ok()),
            last_sync_error: self.last_sync_error,
            sync_token_card: self.sync_token_card,
            sync_token_cal: self.sync_token_cal,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            deleted_at: parse_ts_opt(self.deleted_at.as_deref()),
        }
    }
}

impl DavAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, account: &DavAccount) -> Result<DavAccount, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO dav_accounts
                (id, vault_id, name, server_url, username, credential,
                 carddav_enabled, caldav_enabled, carddav_path, caldav_path,
                 sync_interval_minutes, last_synced_at, last_sync_status, last_sync_error,
                 sync_token_card, sync_token_cal, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.vault_id.to_string())
        .bind(&account.name)
        .bind(&account.server_url)
        .bind(&account.username)
        .bind(&account.credential)
        .bind(account.carddav_enabled as i64)
        .bind(account.caldav_enabled as i64)
        .bind(&account.carddav_path)
        .bind(&account.caldav_path)
        .bind(account.sync_interval_minutes)
        .bind(account.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(account.last_sync_status.map(|s| s.as_str()))
        .bind(&account.last_sync_error)
        .bind(&account.sync_token_card)
        .bind(&account.sync_token_cal)
        .bind(account.created_at.to_rfc3339())
        .bind(account.updated_at.to_rfc3339())
        .bind(account.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.get_by_id(account.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<DavAccount>, sqlx::Error> {
        let row: Option<DavAccountRow> =
            sqlx::query_as("SELECT * FROM dav_accounts WHERE id = ? AND deleted_at IS NULL")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(DavAccountRow::hydrate))
    }

    /// All active accounts across every vault; the scheduler sweep uses this.
    pub async fn list_active(&self) -> Result<Vec<DavAccount>, sqlx::Error> {
        let rows: Vec<DavAccountRow> =
            sqlx::query_as("SELECT * FROM dav_accounts WHERE deleted_at IS NULL ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(DavAccountRow::hydrate).collect())
    }

    pub async fn list_by_vault(&self, vault_id: Uuid) -> Result<Vec<DavAccount>, sqlx::Error> {
        let rows: Vec<DavAccountRow> = sqlx::query_as(
            "SELECT * FROM dav_accounts WHERE vault_id = ? AND deleted_at IS NULL ORDER BY created_at",
        )
        .bind(vault_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DavAccountRow::hydrate).collect())
    }

    /// Persist discovered collection paths after a connection test.
    pub async fn update_collections(
        &self,
        id: Uuid,
        carddav_path: Option<&str>,
        caldav_path: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE dav_accounts SET carddav_path = ?, caldav_path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(carddav_path)
        .bind(caldav_path)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_running(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE dav_accounts SET last_sync_status = ?, updated_at = ? WHERE id = ?")
            .bind(SyncStatus::Running.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of a run.
    pub async fn finish(
        &self,
        id: Uuid,
        status: SyncStatus,
        error: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE dav_accounts
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
        sqlx::query("UPDATE dav_accounts SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub(crate) fn truncate_error(message: &str) -> String {
    const MAX: usize = 500;
    if message.len() <= MAX {
        message.to_string()
    } else {
        let mut end = MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup_repo() -> (DavAccountRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        (DavAccountRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, _dir) = setup_repo().await;
        let account = DavAccount::new(
            Uuid::new_v4(),
            "home",
            "https://dav.example.org",
            "ada",
            "s3cret",
        );

        let created = repo.create(&account).await.unwrap();
        assert_eq!(created.name, "home");
        assert!(created.last_sync_status.is_none());
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let (repo, _dir) = setup_repo().await;
        let account = DavAccount::new(
            Uuid::new_v4(),
            "home",
            "https://dav.example.org",
            "ada",
            "s3cret",
        );
        repo.create(&account).await.unwrap();

        repo.mark_running(account.id).await.unwrap();
        let fetched = repo.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_sync_status, Some(SyncStatus::Running));

        let now = Utc::now();
        repo.finish(account.id, SyncStatus::Partial, Some("boom"), now)
            .await
            .unwrap();
        let fetched = repo.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_sync_status, Some(SyncStatus::Partial));
        assert_eq!(fetched.last_sync_error.as_deref(), Some("boom"));
        assert_eq!(fetched.last_synced_at, Some(now));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_account() {
        let (repo, _dir) = setup_repo().await;
        let account = DavAccount::new(
            Uuid::new_v4(),
            "home",
            "https://dav.example.org",
            "ada",
            "s3cret",
        );
        repo.create(&account).await.unwrap();
        repo.soft_delete(account.id).await.unwrap();

        assert!(repo.get_by_id(account.id).await.unwrap().is_none());
        assert!(repo.list_active().await.unwrap().is_empty());
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short"), "short");
        let long = "x".repeat(600);
        assert_eq!(truncate_error(&long).len(), 500);
    }
}
