mod account;
mod activity;
mod contact;
mod entity_kind;
mod mapping;
mod reminder;
mod task;

pub use account::{DavAccount, GitAuthType, GitConfig, SyncStatus};
pub use mapping::MappingRecord;
pub use activity::{Activity, ActivityData};
pub use contact::{
    Address, ActivityEntry, Contact, ContactData, ContactMethod, Relationship, RelationshipEntry,
};
pub use entity_kind::EntityKind;
pub use reminder::{Reminder, ReminderData};
pub use task::{Task, TaskData};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Capability exposed by every syncable local entity.
///
/// Implemented per type instead of a shared base struct so stores only need
/// to surface these three facts.
pub trait LocalRecord {
    fn id(&self) -> Uuid;
    fn updated_at(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
}
