use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Reminder, ReminderData};

use super::{parse_ts, parse_ts_opt};

pub struct ReminderRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: String,
    vault_id: String,
    title: String,
    remind_at: Option<String>,
    recurrence: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl ReminderRow {
    fn hydrate(self) -> Reminder {
        Reminder {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&self.vault_id).unwrap_or_default(),
            title: self.title,
            remind_at: parse_ts_opt(self.remind_at.as_deref()),
            recurrence: self.recurrence,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            deleted_at: parse_ts_opt(self.deleted_at.as_deref()),
        }
    }
}

impl ReminderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, reminder: &Reminder) -> Result<Reminder, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO reminders (id, vault_id, title, remind_at, recurrence, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reminder.id.to_string())
        .bind(reminder.vault_id.to_string())
        .bind(&reminder.title)
        .bind(reminder.remind_at.map(|t| t.to_rfc3339()))
        .bind(&reminder.recurrence)
        .bind(reminder.created_at.to_rfc3339())
        .bind(reminder.updated_at.to_rfc3339())
        .bind(reminder.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.get_by_id(reminder.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Reminder>, sqlx::Error> {
        let row: Option<ReminderRow> = sqlx::query_as("SELECT * FROM reminders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ReminderRow::hydrate))
    }

    /// All reminders in the vault, soft-deleted ones included.
    pub async fn list(&self, vault_id: Uuid) -> Result<Vec<Reminder>, sqlx::Error> {
        let rows: Vec<ReminderRow> =
            sqlx::query_as("SELECT * FROM reminders WHERE vault_id = ? ORDER BY created_at")
                .bind(vault_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ReminderRow::hydrate).collect())
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE reminders SET deleted_at = ?, updated_at = ? WHERE id = ?")
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
        data: &ReminderData,
    ) -> Result<Reminder, sqlx::Error> {
        let mut reminder = Reminder::new(vault_id, data.title.clone());
        reminder.remind_at = data.remind_at;
        reminder.recurrence = data.recurrence.clone();
        self.create(&reminder).await
    }

    pub async fn apply_data(&self, id: Uuid, data: &ReminderData) -> Result<Reminder, sqlx::Error> {
        sqlx::query(
            "UPDATE reminders SET title = ?, remind_at = ?, recurrence = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&data.title)
        .bind(data.remind_at.map(|t| t.to_rfc3339()))
        .bind(&data.recurrence)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_by_id(id).await?.ok_or(sqlx::Error::RowNotFound)
    }
}
