use chrono::{NaiveDate, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::models::{Address, Contact, ContactData, ContactMethod, Relationship};

use super::{parse_ts, parse_ts_opt};

pub struct ContactRepository {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct ContactRow {
    id: String,
    vault_id: String,
    first_name: String,
    last_name: String,
    nickname: Option<String>,
    birthday: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

#[derive(sqlx::FromRow)]
struct MethodRow {
    kind: String,
    value: String,
    label: Option<String>,
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
}

#[derive(sqlx::FromRow)]
struct RelationshipRow {
    first_name: String,
    last_name: String,
    relationship_type: String,
}

impl ContactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, contact: &Contact) -> Result<Contact, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let id = contact.id.to_string();
        sqlx::query(
            r#"
            INSERT INTO contacts (id, vault_id, first_name, last_name, nickname, birthday, notes, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(contact.vault_id.to_string())
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.nickname)
        .bind(contact.birthday.map(|d| d.to_string()))
        .bind(&contact.notes)
        .bind(contact.created_at.to_rfc3339())
        .bind(contact.updated_at.to_rfc3339())
        .bind(contact.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        write_methods(&mut tx, &id, &contact.contact_methods).await?;
        write_addresses(&mut tx, &id, &contact.addresses).await?;
        write_tags(&mut tx, contact.vault_id, &id, &contact.tags).await?;

        tx.commit().await?;

        self.get_by_id(contact.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Contact>, sqlx::Error> {
        let row: Option<ContactRow> = sqlx::query_as("SELECT * FROM contacts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    /// All contacts in the vault, soft-deleted ones included. Sync needs the
    /// deleted rows to detect local deletions.
    pub async fn list(&self, vault_id: Uuid) -> Result<Vec<Contact>, sqlx::Error> {
        let rows: Vec<ContactRow> =
            sqlx::query_as("SELECT * FROM contacts WHERE vault_id = ? ORDER BY last_name, first_name")
                .bind(vault_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        let mut contacts = Vec::with_capacity(rows.len());
        for row in rows {
            contacts.push(self.hydrate(row).await?);
        }
        Ok(contacts)
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE contacts SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create a contact from decoded remote data.
    pub async fn create_from_data(
        &self,
        vault_id: Uuid,
        data: &ContactData,
    ) -> Result<Contact, sqlx::Error> {
        let mut contact = Contact::new(vault_id, data.first_name.clone(), data.last_name.clone());
        contact.nickname = data.nickname.clone();
        contact.birthday = data.birthday;
        contact.notes = data.notes.clone();
        contact.contact_methods = data.contact_methods.clone();
        contact.addresses = data.addresses.clone();
        contact.tags = data.tags.clone();

        let created = self.create(&contact).await?;
        self.apply_linked(&created, data).await?;
        self.get_by_id(created.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Overwrite a contact's fields from decoded remote data and fully
    /// replace its sub-collections. Anything the remote format cannot
    /// represent is lost here; that is the intended semantics.
    pub async fn apply_data(&self, id: Uuid, data: &ContactData) -> Result<Contact, sqlx::Error> {
        let existing = self.get_by_id(id).await?.ok_or(sqlx::Error::RowNotFound)?;
        let mut tx = self.pool.begin().await?;

        let id_str = id.to_string();
        sqlx::query(
            r#"
            UPDATE contacts
            SET first_name = ?, last_name = ?, nickname = ?, birthday = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&data.first_name)
        .bind(&data.last_name)
        .bind(&data.nickname)
        .bind(data.birthday.map(|d| d.to_string()))
        .bind(&data.notes)
        .bind(Utc::now().to_rfc3339())
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

        // Full replace of sub-collections
        sqlx::query("DELETE FROM contact_methods WHERE contact_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        write_methods(&mut tx, &id_str, &data.contact_methods).await?;

        sqlx::query("DELETE FROM addresses WHERE contact_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        write_addresses(&mut tx, &id_str, &data.addresses).await?;

        sqlx::query("DELETE FROM contact_tags WHERE contact_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        write_tags(&mut tx, existing.vault_id, &id_str, &data.tags).await?;

        tx.commit().await?;

        self.apply_linked(&existing, data).await?;
        self.get_by_id(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Replace the contact's activities and relationships when the decoded
    /// payload carries them (markdown does, vCard does not).
    async fn apply_linked(&self, contact: &Contact, data: &ContactData) -> Result<(), sqlx::Error> {
        if let Some(activities) = &data.activities {
            self.replace_activities(contact, activities).await?;
        }
        if let Some(relationships) = &data.relationships {
            self.replace_relationships(contact, relationships).await?;
        }
        Ok(())
    }

    async fn replace_activities(
        &self,
        contact: &Contact,
        entries: &[crate::models::ActivityEntry],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let contact_id = contact.id.to_string();

        // Drop this contact's participations, and any activity left with no
        // other participant.
        let orphaned: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT activity_id FROM activity_participants ap
            WHERE contact_id = ?
              AND NOT EXISTS (
                SELECT 1 FROM activity_participants other
                WHERE other.activity_id = ap.activity_id AND other.contact_id != ?
              )
            "#,
        )
        .bind(&contact_id)
        .bind(&contact_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM activity_participants WHERE contact_id = ?")
            .bind(&contact_id)
            .execute(&mut *tx)
            .await?;
        for (activity_id,) in &orphaned {
            sqlx::query("DELETE FROM activities WHERE id = ?")
                .bind(activity_id)
                .execute(&mut *tx)
                .await?;
        }

        let now = Utc::now().to_rfc3339();
        for entry in entries {
            let activity_id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO activities (id, vault_id, title, description, happened_at, created_at, updated_at, deleted_at)
                VALUES (?, ?, ?, NULL, ?, ?, ?, NULL)
                "#,
            )
            .bind(&activity_id)
            .bind(contact.vault_id.to_string())
            .bind(&entry.title)
            .bind(entry.happened_at.map(|d| d.to_string()))
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO activity_participants (activity_id, contact_id, role) VALUES (?, ?, 'participant')",
            )
            .bind(&activity_id)
            .bind(&contact_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn replace_relationships(
        &self,
        contact: &Contact,
        entries: &[crate::models::RelationshipEntry],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let contact_id = contact.id.to_string();

        sqlx::query("DELETE FROM contact_relationships WHERE contact_id = ?")
            .bind(&contact_id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            let (first, last) = split_name(&entry.name);
            let other: Option<(String,)> = sqlx::query_as(
                r#"
                SELECT id FROM contacts
                WHERE vault_id = ? AND first_name = ? AND last_name = ? AND deleted_at IS NULL
                "#,
            )
            .bind(contact.vault_id.to_string())
            .bind(first)
            .bind(last)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((other_id,)) = other else {
                tracing::warn!(name = %entry.name, "relationship skipped, contact not found");
                continue;
            };

            sqlx::query(
                "INSERT INTO contact_relationships (contact_id, other_contact_id, relationship_type) VALUES (?, ?, ?)",
            )
            .bind(&contact_id)
            .bind(&other_id)
            .bind(&entry.relationship_type)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn hydrate(&self, row: ContactRow) -> Result<Contact, sqlx::Error> {
        let methods: Vec<MethodRow> =
            sqlx::query_as("SELECT kind, value, label FROM contact_methods WHERE contact_id = ?")
                .bind(&row.id)
                .fetch_all(&self.pool)
                .await?;

        let addresses: Vec<AddressRow> = sqlx::query_as(
            "SELECT street, city, state, postal_code, country FROM addresses WHERE contact_id = ?",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let tags: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT t.name FROM tags t
            JOIN contact_tags ct ON ct.tag_id = t.id
            WHERE ct.contact_id = ?
            ORDER BY t.name
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let activities: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT a.title, a.happened_at
            FROM activities a
            JOIN activity_participants ap ON ap.activity_id = a.id
            WHERE ap.contact_id = ? AND a.deleted_at IS NULL
            ORDER BY a.happened_at
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let relationships: Vec<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT c.first_name, c.last_name, r.relationship_type
            FROM contact_relationships r
            JOIN contacts c ON c.id = r.other_contact_id
            WHERE r.contact_id = ?
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Contact {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            vault_id: Uuid::parse_str(&row.vault_id).unwrap_or_default(),
            first_name: row.first_name,
            last_name: row.last_name,
            nickname: row.nickname,
            birthday: row
                .birthday
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            notes: row.notes,
            contact_methods: methods
                .into_iter()
                .map(|m| ContactMethod {
                    kind: m.kind,
                    value: m.value,
                    label: m.label,
                })
                .collect(),
            addresses: addresses
                .into_iter()
                .map(|a| Address {
                    street: a.street,
                    city: a.city,
                    state: a.state,
                    postal_code: a.postal_code,
                    country: a.country,
                })
                .collect(),
            tags: tags.into_iter().map(|t| t.0).collect(),
            activities: activities
                .into_iter()
                .map(|(title, happened_at)| crate::models::ActivityEntry {
                    title,
                    happened_at: happened_at
                        .as_deref()
                        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
                })
                .collect(),
            relationships: relationships
                .into_iter()
                .map(|r| Relationship {
                    other_name: if r.last_name.is_empty() {
                        r.first_name
                    } else {
                        format!("{} {}", r.first_name, r.last_name)
                    },
                    relationship_type: r.relationship_type,
                })
                .collect(),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
            deleted_at: parse_ts_opt(row.deleted_at.as_deref()),
        })
    }
}

async fn write_methods(
    tx: &mut Transaction<'_, Sqlite>,
    contact_id: &str,
    methods: &[ContactMethod],
) -> Result<(), sqlx::Error> {
    for method in methods {
        sqlx::query("INSERT INTO contact_methods (contact_id, kind, value, label) VALUES (?, ?, ?, ?)")
            .bind(contact_id)
            .bind(&method.kind)
            .bind(&method.value)
            .bind(&method.label)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn write_addresses(
    tx: &mut Transaction<'_, Sqlite>,
    contact_id: &str,
    addresses: &[Address],
) -> Result<(), sqlx::Error> {
    for address in addresses {
        sqlx::query(
            "INSERT INTO addresses (contact_id, street, city, state, postal_code, country) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(contact_id)
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.postal_code)
        .bind(&address.country)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn write_tags(
    tx: &mut Transaction<'_, Sqlite>,
    vault_id: Uuid,
    contact_id: &str,
    tags: &[String],
) -> Result<(), sqlx::Error> {
    for name in tags {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM tags WHERE vault_id = ? AND name = ?")
                .bind(vault_id.to_string())
                .bind(name)
                .fetch_optional(&mut **tx)
                .await?;

        let tag_id = match existing {
            Some((id,)) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query("INSERT INTO tags (id, vault_id, name) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(vault_id.to_string())
                    .bind(name)
                    .execute(&mut **tx)
                    .await?;
                id
            }
        };

        sqlx::query("INSERT OR IGNORE INTO contact_tags (contact_id, tag_id) VALUES (?, ?)")
            .bind(contact_id)
            .bind(&tag_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(' ') {
        Some((first, last)) => (first.to_string(), last.to_string()),
        None => (name.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{ActivityEntry, RelationshipEntry};
    use tempfile::TempDir;

    struct TestContext {
        repo: ContactRepository,
        pool: SqlitePool,
        _temp_dir: TempDir,
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(Some(db_path)).await.unwrap();
        TestContext {
            repo: ContactRepository::new(pool.clone()),
            pool,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_contact() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let contact = Contact::new(vault, "Ada", "Lovelace")
            .with_methods(vec![
                ContactMethod::new("email", "ada@example.org"),
                ContactMethod::new("phone", "+44 1234").with_label("home"),
            ])
            .with_tags(vec!["friend".into(), "mathematician".into()]);

        let created = ctx.repo.create(&contact).await.unwrap();
        assert_eq!(created.first_name, "Ada");
        assert_eq!(created.contact_methods.len(), 2);
        assert_eq!(created.tags, vec!["friend", "mathematician"]);

        let fetched = ctx.repo.get_by_id(contact.id).await.unwrap().unwrap();
        assert_eq!(fetched.full_name(), "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_list_includes_soft_deleted() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let alive = Contact::new(vault, "Alan", "Turing");
        let dead = Contact::new(vault, "Charles", "Babbage");
        ctx.repo.create(&alive).await.unwrap();
        ctx.repo.create(&dead).await.unwrap();
        ctx.repo.soft_delete(dead.id).await.unwrap();

        let all = ctx.repo.list(vault).await.unwrap();
        assert_eq!(all.len(), 2);
        let deleted: Vec<_> = all.iter().filter(|c| c.deleted_at.is_some()).collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].first_name, "Charles");
    }

    #[tokio::test]
    async fn test_apply_data_fully_replaces_sub_collections() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let contact = Contact::new(vault, "Ada", "Lovelace")
            .with_methods(vec![
                ContactMethod::new("email", "old@example.org"),
                ContactMethod::new("phone", "+44 1234"),
            ])
            .with_tags(vec!["old-tag".into()]);
        ctx.repo.create(&contact).await.unwrap();

        let data = ContactData {
            first_name: "Ada".into(),
            last_name: "King".into(),
            contact_methods: vec![ContactMethod::new("email", "new@example.org")],
            tags: vec!["countess".into()],
            ..Default::default()
        };

        let updated = ctx.repo.apply_data(contact.id, &data).await.unwrap();
        assert_eq!(updated.last_name, "King");
        // Replace, not merge: the phone number is gone.
        assert_eq!(updated.contact_methods.len(), 1);
        assert_eq!(updated.contact_methods[0].value, "new@example.org");
        assert_eq!(updated.tags, vec!["countess"]);
        assert!(updated.updated_at > contact.updated_at);
    }

    #[tokio::test]
    async fn test_apply_data_without_linked_sections_keeps_activities() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let contact = Contact::new(vault, "Ada", "Lovelace");
        ctx.repo.create(&contact).await.unwrap();

        let with_activities = ContactData {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            activities: Some(vec![ActivityEntry {
                title: "Tea at Babbage's".into(),
                happened_at: NaiveDate::from_ymd_opt(1843, 7, 1),
            }]),
            ..Default::default()
        };
        ctx.repo.apply_data(contact.id, &with_activities).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM activities")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);

        // A vCard-shaped payload (no linked sections) must leave them alone.
        let without = ContactData {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            ..Default::default()
        };
        ctx.repo.apply_data(contact.id, &without).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM activities")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_replace_activities_drops_orphans() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let contact = Contact::new(vault, "Ada", "Lovelace");
        ctx.repo.create(&contact).await.unwrap();

        let first = ContactData {
            first_name: "Ada".into(),
            activities: Some(vec![ActivityEntry {
                title: "Old visit".into(),
                happened_at: None,
            }]),
            ..Default::default()
        };
        ctx.repo.apply_data(contact.id, &first).await.unwrap();

        let second = ContactData {
            first_name: "Ada".into(),
            activities: Some(vec![ActivityEntry {
                title: "New visit".into(),
                happened_at: None,
            }]),
            ..Default::default()
        };
        ctx.repo.apply_data(contact.id, &second).await.unwrap();

        let titles: Vec<(String,)> = sqlx::query_as("SELECT title FROM activities")
            .fetch_all(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].0, "New visit");
    }

    #[tokio::test]
    async fn test_relationships_resolve_by_name() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let ada = Contact::new(vault, "Ada", "Lovelace");
        let charles = Contact::new(vault, "Charles", "Babbage");
        ctx.repo.create(&ada).await.unwrap();
        ctx.repo.create(&charles).await.unwrap();

        let data = ContactData {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            relationships: Some(vec![
                RelationshipEntry {
                    name: "Charles Babbage".into(),
                    relationship_type: "colleague".into(),
                },
                RelationshipEntry {
                    name: "Nobody Known".into(),
                    relationship_type: "friend".into(),
                },
            ]),
            ..Default::default()
        };

        let updated = ctx.repo.apply_data(ada.id, &data).await.unwrap();
        // The unresolvable one is skipped, not an error.
        assert_eq!(updated.relationships.len(), 1);
        assert_eq!(updated.relationships[0].other_name, "Charles Babbage");
        assert_eq!(updated.relationships[0].relationship_type, "colleague");
    }

    #[tokio::test]
    async fn test_create_from_data() {
        let ctx = setup_repo().await;
        let vault = Uuid::new_v4();

        let data = ContactData {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            nickname: Some("Amazing Grace".into()),
            contact_methods: vec![ContactMethod::new("email", "grace@navy.mil")],
            tags: vec!["navy".into()],
            ..Default::default()
        };

        let created = ctx.repo.create_from_data(vault, &data).await.unwrap();
        assert_eq!(created.full_name(), "Grace Hopper");
        assert_eq!(created.nickname.as_deref(), Some("Amazing Grace"));
        assert_eq!(created.contact_methods.len(), 1);
    }
}
