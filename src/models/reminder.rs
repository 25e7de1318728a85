use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LocalRecord;

/// A (possibly recurring) reminder. Recurrence is an RRULE string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub title: String,
    pub remind_at: Option<DateTime<Utc>>,
    pub recurrence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn new(vault_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vault_id,
            title: title.into(),
            remind_at: None,
            recurrence: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_remind_at(mut self, remind_at: DateTime<Utc>) -> Self {
        self.remind_at = Some(remind_at);
        self
    }

    pub fn with_recurrence(mut self, rrule: impl Into<String>) -> Self {
        self.recurrence = Some(rrule.into());
        self
    }
}

impl LocalRecord for Reminder {
    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Decoded reminder payload (VTODO + RRULE fields).
#[derive(Debug, Clone, Default)]
pub struct ReminderData {
    pub title: String,
    pub remind_at: Option<DateTime<Utc>>,
    pub recurrence: Option<String>,
}
