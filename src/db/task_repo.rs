use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Task, TaskData};

use super::{parse_ts, parse_ts_opt};

pub struct TaskRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    vault_id: String,
    title: String,
    description: Option<String>,
    due_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl TaskRow {
    fn hydrate(self) -> Task {
        Task {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&self.vault_id).unwrap_or_default(),
            title: self.title,
            description: self.description,
            due_at: parse_ts_opt(self.due_at.as_deref()),
            completed_at: parse_ts_opt(self.completed_at.as_deref()),
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            deleted_at: parse_ts_opt(self.deleted_at.as_deref()),
        }
    }
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: &Task) -> Result<Task, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, vault_id, title, description, due_at, completed_at, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.vault_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.due_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.get_by_id(task.id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, sqlx::Error> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TaskRow::hydrate))
    }

    /// All tasks in the vault, soft-deleted ones included.
    pub async fn list(&self, vault_id: Uuid) -> Result<Vec<Task>, sqlx::Error> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE vault_id = ? ORDER BY created_at")
                .bind(vault_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(TaskRow::hydrate).collect())
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_from_data(&self, vault_id: Uuid, data: &TaskData) -> Result<Task, sqlx::Error> {
        let mut task = Task::new(vault_id, data.title.clone());
        task.description = data.description.clone();
        task.due_at = data.due_at;
        task.completed_at = data.completed_at;
        self.create(&task).await
    }

    pub async fn apply_data(&self, id: Uuid, data: &TaskData) -> Result<Task, sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, due_at = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.due_at.map(|t| t.to_rfc3339()))
        .bind(data.completed_at.map(|t| t.to_rfc3339()))
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

    async fn setup_repo() -> (TaskRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        (TaskRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_complete() {
        let (repo, _dir) = setup_repo().await;
        let vault = Uuid::new_v4();

        let task = Task::new(vault, "Call the bank").with_due_at(Utc::now());
        repo.create(&task).await.unwrap();

        let data = TaskData {
            title: "Call the bank".into(),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        let updated = repo.apply_data(task.id, &data).await.unwrap();
        assert!(updated.is_completed());
    }

    #[tokio::test]
    async fn test_list_includes_soft_deleted() {
        let (repo, _dir) = setup_repo().await;
        let vault = Uuid::new_v4();

        let task = Task::new(vault, "Old errand");
        repo.create(&task).await.unwrap();
        repo.soft_delete(task.id).await.unwrap();

        let all = repo.list(vault).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].deleted_at.is_some());
    }
}
