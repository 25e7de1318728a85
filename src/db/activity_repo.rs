use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Activity, ActivityData};

use super::{parse_ts, parse_ts_opt};

pub struct ActivityRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: String,
    vault_id: String,
    title: String,
    description: Option<String>,
    happened_at: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl ActivityRow {
    fn hydrate(self) -> Activity {
        Activity {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&self.vault_id).unwrap_or_default(),
            title: self.title,
            description: self.description,
            happened_at: self
                .happened_at
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            deleted_at: parse_ts_opt(self.deleted_at.as_deref()),
        }
    }
}

impl ActivityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, activity: &Activity) -> Result<Activity, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, vault_id, title, description, happened_at, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(activity.id.to_string())
        .bind(activity.vault_id.to_string())
        .bind(&activity.title)
        .bind(&activity.description)
        .bind(activity.happened_at.map(|d| d.to_string()))
        .bind(activity.created_at.to_rfc3339())
        .bind(activity.updated_at.to_rfc3339())
        .bind(activity.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.get_by_id(activity.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Activity>, sqlx::Error> {
        let row: Option<ActivityRow> = sqlx::query_as("SELECT * FROM activities WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ActivityRow::hydrate))
    }

    /// All activities in the vault, soft-deleted ones included.
    pub async fn list(&self, vault_id: Uuid) -> Result<Vec<Activity>, sqlx::Error> {
        let rows: Vec<ActivityRow> =
            sqlx::query_as("SELECT * FROM activities WHERE vault_id = ? ORDER BY created_at")
                .bind(vault_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ActivityRow::hydrate).collect())
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE activities SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_from_data(
        &self,
        vault_id: Uuid,
        data: &ActivityData,
    ) -> Result<Activity, sqlx::Error> {
        let mut activity = Activity::new(vault_id, data.title.clone());
        activity.description = data.description.clone();
        activity.happened_at = data.happened_at;
        self.create(&activity).await
    }

    pub async fn apply_data(&self, id: Uuid, data: &ActivityData) -> Result<Activity, sqlx::Error> {
        sqlx::query(
            "UPDATE activities SET title = ?, description = ?, happened_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.happened_at.map(|d| d.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_by_id(id).await?.ok_or(sqlx::Error::RowNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup_repo() -> (ActivityRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        (ActivityRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_create_list_and_soft_delete() {
        let (repo, _dir) = setup_repo().await;
        let vault = Uuid::new_v4();

        let activity = Activity::new(vault, "Coffee with Alan")
            .with_happened_at(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        repo.create(&activity).await.unwrap();

        let all = repo.list(vault).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Coffee with Alan");

        repo.soft_delete(activity.id).await.unwrap();
        let all = repo.list(vault).await.unwrap();
        assert!(all[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_apply_data_overwrites_fields() {
        let (repo, _dir) = setup_repo().await;
        let vault = Uuid::new_v4();

        let activity = Activity::new(vault, "Old title");
        repo.create(&activity).await.unwrap();

        let data = ActivityData {
            title: "New title".into(),
            description: Some("longer".into()),
            happened_at: NaiveDate::from_ymd_opt(2025, 1, 2),
        };
        let updated = repo.apply_data(activity.id, &data).await.unwrap();
        assert_eq!(updated.title, "New title");
        assert_eq!(updated.description.as_deref(), Some("longer"));
        assert!(updated.updated_at >= activity.updated_at);
    }
}
