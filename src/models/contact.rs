use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::LocalRecord;

/// A person in the vault, with replaceable sub-collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub notes: Option<String>,
    pub contact_methods: Vec<ContactMethod>,
    pub addresses: Vec<Address>,
    pub tags: Vec<String>,
    pub relationships: Vec<Relationship>,
    /// Timeline of activities this contact participated in (derived, read
    /// via the participants join; never written directly on the contact).
    pub activities: Vec<ActivityEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An email address, phone number, URL etc. attached to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactMethod {
    pub kind: String,
    pub value: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// A named relationship to another contact, resolved by full name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub other_name: String,
    pub relationship_type: String,
}

impl Contact {
    pub fn new(vault_id: Uuid, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vault_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            nickname: None,
            birthday: None,
            notes: None,
            contact_methods: Vec::new(),
            addresses: Vec::new(),
            tags: Vec::new(),
            relationships: Vec::new(),
            activities: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_methods(mut self, methods: Vec<ContactMethod>) -> Self {
        self.contact_methods = methods;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

impl LocalRecord for Contact {
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

impl ContactMethod {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.full_name())?;
        if let Some(nickname) = &self.nickname {
            writeln!(f, "  aka {}", nickname)?;
        }
        for method in &self.contact_methods {
            writeln!(f, "  {}: {}", method.kind, method.value)?;
        }
        if !self.tags.is_empty() {
            writeln!(f, "  tags: {}", self.tags.join(", "))?;
        }
        Ok(())
    }
}

/// Decoded contact payload, as produced by the vCard and markdown codecs.
///
/// `activities` and `relationships` are `None` when the source format does
/// not carry them (vCard); `Some` means full replace on apply.
#[derive(Debug, Clone, Default)]
pub struct ContactData {
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub notes: Option<String>,
    pub contact_methods: Vec<ContactMethod>,
    pub addresses: Vec<Address>,
    pub tags: Vec<String>,
    pub activities: Option<Vec<ActivityEntry>>,
    pub relationships: Option<Vec<RelationshipEntry>>,
}

/// An activity line on a contact's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub title: String,
    pub happened_at: Option<NaiveDate>,
}

/// A relationship line parsed from a markdown contact page.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipEntry {
    pub name: String,
    pub relationship_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_full_name() {
        let vault = Uuid::new_v4();
        let contact = Contact::new(vault, "Ada", "Lovelace");
        assert_eq!(contact.full_name(), "Ada Lovelace");

        let mononym = Contact::new(vault, "Prince", "");
        assert_eq!(mononym.full_name(), "Prince");
    }

    #[test]
    fn test_contact_local_record() {
        let mut contact = Contact::new(Uuid::new_v4(), "Ada", "Lovelace");
        assert!(!contact.is_deleted());

        contact.deleted_at = Some(Utc::now());
        assert!(contact.is_deleted());
    }

    #[test]
    fn test_contact_display() {
        let contact = Contact::new(Uuid::new_v4(), "Ada", "Lovelace")
            .with_methods(vec![ContactMethod::new("email", "ada@example.org")])
            .with_tags(vec!["friend".into()]);

        let output = format!("{}", contact);
        assert!(output.contains("Ada Lovelace"));
        assert!(output.contains("email: ada@example.org"));
        assert!(output.contains("tags: friend"));
    }
}
