//! `LocalStore` implementations over the sqlx repositories.

use uuid::Uuid;

use crate::db::{ActivityRepository, ContactRepository, ReminderRepository, TaskRepository};
use crate::models::{
    Activity, ActivityData, Contact, ContactData, Reminder, ReminderData, Task, TaskData,
};

use super::engine::LocalStore;
use super::error::SyncError;

impl LocalStore for ContactRepository {
    type Entity = Contact;
    type Decoded = ContactData;

    async fn list(&self, vault_id: Uuid) -> Result<Vec<Contact>, SyncError> {
        Ok(ContactRepository::list(self, vault_id).await?)
    }

    async fn create_from(&self, vault_id: Uuid, data: &ContactData) -> Result<Contact, SyncError> {
        Ok(self.create_from_data(vault_id, data).await?)
    }

    async fn apply_to(&self, id: Uuid, data: &ContactData) -> Result<Contact, SyncError> {
        Ok(self.apply_data(id, data).await?)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), SyncError> {
        Ok(ContactRepository::soft_delete(self, id).await?)
    }
}

impl LocalStore for ActivityRepository {
    type Entity = Activity;
    type Decoded = ActivityData;

    async fn list(&self, vault_id: Uuid) -> Result<Vec<Activity>, SyncError> {
        Ok(ActivityRepository::list(self, vault_id).await?)
    }

    async fn create_from(&self, vault_id: Uuid, data: &ActivityData) -> Result<Activity, SyncError> {
        Ok(self.create_from_data(vault_id, data).await?)
    }

    async fn apply_to(&self, id: Uuid, data: &ActivityData) -> Result<Activity, SyncError> {
        Ok(self.apply_data(id, data).await?)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), SyncError> {
        Ok(ActivityRepository::soft_delete(self, id).await?)
    }
}

impl LocalStore for TaskRepository {
    type Entity = Task;
    type Decoded = TaskData;

    async fn list(&self, vault_id: Uuid) -> Result<Vec<Task>, SyncError> {
        Ok(TaskRepository::list(self, vault_id).await?)
    }

    async fn create_from(&self, vault_id: Uuid, data: &TaskData) -> Result<Task, SyncError> {
        Ok(self.create_from_data(vault_id, data).await?)
    }

    async fn apply_to(&self, id: Uuid, data: &TaskData) -> Result<Task, SyncError> {
        Ok(self.apply_data(id, data).await?)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), SyncError> {
        Ok(TaskRepository::soft_delete(self, id).await?)
    }
}

impl LocalStore for ReminderRepository {
    type Entity = Reminder;
    type Decoded = ReminderData;

    async fn list(&self, vault_id: Uuid) -> Result<Vec<Reminder>, SyncError> {
        Ok(ReminderRepository::list(self, vault_id).await?)
    }

    async fn create_from(&self, vault_id: Uuid, data: &ReminderData) -> Result<Reminder, SyncError> {
        Ok(self.create_from_data(vault_id, data).await?)
    }

    async fn apply_to(&self, id: Uuid, data: &ReminderData) -> Result<Reminder, SyncError> {
        Ok(self.apply_data(id, data).await?)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), SyncError> {
        Ok(ReminderRepository::soft_delete(self, id).await?)
    }
}
