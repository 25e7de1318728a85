use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LocalRecord;

/// Something that happened with one or more contacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub happened_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn new(vault_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vault_id,
            title: title.into(),
            description: None,
            happened_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_happened_at(mut self, date: NaiveDate) -> Self {
        self.happened_at = Some(date);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl LocalRecord for Activity {
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

/// Decoded activity payload (VEVENT fields).
#[derive(Debug, Clone, Default)]
pub struct ActivityData {
    pub title: String,
    pub description: Option<String>,
    pub happened_at: Option<NaiveDate>,
}
