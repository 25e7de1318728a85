//! Contact ↔ markdown translation.
//!
//! A contact page is YAML frontmatter (title, birthdate, tags, email, phone)
//! followed by `##` sections: Notes is free text, Timeline holds
//! `- YYYY-MM-DD: title` activity lines, Relationships holds
//! `- Full Name (type)` lines. Timeline and Relationships are replaced
//! wholesale on every pull; vCard sync never touches them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ActivityEntry, Contact, ContactData, ContactMethod, RelationshipEntry};
use crate::sync::engine::Codec;
use crate::sync::error::SyncError;

#[derive(Debug, Serialize, Deserialize, Default)]
struct FrontMatter {
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    birthdate: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phone: Option<OneOrMany>,
}

/// A frontmatter value that is a scalar for one entry, a list for several.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn from_values(mut values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => Some(OneOrMany::One(values.remove(0))),
            _ => Some(OneOrMany::Many(values)),
        }
    }

    fn into_values(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

pub struct ContactMarkdownCodec;

impl Codec for ContactMarkdownCodec {
    type Entity = Contact;
    type Decoded = ContactData;

    fn encode(&self, contact: &Contact) -> Result<String, SyncError> {
        let methods = |kind: &str| -> Vec<String> {
            contact
                .contact_methods
                .iter()
                .filter(|m| m.kind == kind)
                .map(|m| m.value.clone())
                .collect()
        };

        let fm = FrontMatter {
            title: contact.full_name(),
            kind: Some("contact".to_string()),
            nickname: contact.nickname.clone(),
            birthdate: contact.birthday.map(|d| d.to_string()),
            tags: contact.tags.clone(),
            email: OneOrMany::from_values(methods("email")),
            phone: OneOrMany::from_values(methods("phone")),
        };
        let yaml = serde_yaml::to_string(&fm)
            .map_err(|e| SyncError::Codec(format!("frontmatter encode failed: {}", e)))?;

        let mut sections: Vec<String> = Vec::new();
        if let Some(notes) = &contact.notes {
            if !notes.is_empty() {
                sections.push(format!("## Notes\n\n{}", notes));
            }
        }
        if !contact.activities.is_empty() {
            let lines: Vec<String> = contact
                .activities
                .iter()
                .map(|a| match a.happened_at {
                    Some(date) => format!("- {}: {}", date, a.title),
                    None => format!("- : {}", a.title),
                })
                .collect();
            sections.push(format!("## Timeline\n\n{}", lines.join("\n")));
        }
        if !contact.relationships.is_empty() {
            let lines: Vec<String> = contact
                .relationships
                .iter()
                .map(|r| format!("- {} ({})", r.other_name, r.relationship_type))
                .collect();
            sections.push(format!("## Relationships\n\n{}", lines.join("\n")));
        }

        let body = sections.join("\n\n");
        if body.is_empty() {
            Ok(format!("---\n{}---\n", yaml))
        } else {
            Ok(format!("---\n{}---\n\n{}\n", yaml, body))
        }
    }

    fn decode(&self, payload: &str) -> Result<ContactData, SyncError> {
        let (yaml, body) = split_frontmatter(payload)
            .ok_or_else(|| SyncError::Codec("missing frontmatter".into()))?;
        let fm: FrontMatter = serde_yaml::from_str(yaml)
            .map_err(|e| SyncError::Codec(format!("frontmatter parse failed: {}", e)))?;
        if fm.title.trim().is_empty() {
            return Err(SyncError::Codec("frontmatter has no title".into()));
        }

        let mut data = ContactData::default();
        match fm.title.trim().split_once(' ') {
            Some((first, last)) => {
                data.first_name = first.to_string();
                data.last_name = last.to_string();
            }
            None => data.first_name = fm.title.trim().to_string(),
        }
        data.nickname = fm.nickname;
        data.birthday = fm
            .birthdate
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        data.tags = fm.tags;
        for value in fm.email.map(OneOrMany::into_values).unwrap_or_default() {
            data.contact_methods.push(ContactMethod::new("email", value));
        }
        for value in fm.phone.map(OneOrMany::into_values).unwrap_or_default() {
            data.contact_methods.push(ContactMethod::new("phone", value));
        }

        let mut activities = Vec::new();
        let mut relationships = Vec::new();
        for (name, content) in parse_sections(body) {
            match name.to_lowercase().as_str() {
                "notes" => {
                    if !content.is_empty() {
                        data.notes = Some(content);
                    }
                }
                "timeline" | "activities" => activities.extend(parse_activity_lines(&content)),
                "relationships" => relationships.extend(parse_relationship_lines(&content)),
                _ => {}
            }
        }
        // Git sync owns these sections: always full replace, even when empty.
        data.activities = Some(activities);
        data.relationships = Some(relationships);

        Ok(data)
    }
}

/// Pull the title out of a contact page, for deriving its file name.
pub fn extract_title(payload: &str) -> Option<String> {
    let (yaml, _) = split_frontmatter(payload)?;
    let fm: FrontMatter = serde_yaml::from_str(yaml).ok()?;
    let title = fm.title.trim().to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn split_frontmatter(payload: &str) -> Option<(&str, &str)> {
    let rest = payload.strip_prefix("---\n").or_else(|| {
        payload.strip_prefix("---\r\n")
    })?;
    for delim in ["\n---\n", "\n---\r\n", "\r\n---\r\n", "\r\n---\n"] {
        if let Some(idx) = rest.find(delim) {
            return Some((&rest[..idx + 1], &rest[idx + delim.len()..]));
        }
    }
    // Frontmatter-only file.
    for delim in ["\n---", "\r\n---"] {
        if let Some(idx) = rest.rfind(delim) {
            if rest[idx + delim.len()..].trim().is_empty() {
                return Some((&rest[..idx + 1], ""));
            }
        }
    }
    None
}

/// Split a markdown body into `(section_name, content)` by `##` headers.
fn parse_sections(body: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    for line in body.lines() {
        if let Some(name) = line.strip_prefix("## ") {
            sections.push((name.trim().to_string(), Vec::new()));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line);
        }
    }
    sections
        .into_iter()
        .map(|(name, lines)| (name, lines.join("\n").trim().to_string()))
        .collect()
}

/// Parse `- YYYY-MM-DD: title` bullet lines.
fn parse_activity_lines(content: &str) -> Vec<ActivityEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let Some(rest) = line.trim().strip_prefix("- ") else {
            continue;
        };
        let Some((date_part, title)) = rest.split_once(':') else {
            continue;
        };
        let title = title.trim();
        if title.is_empty() {
            continue;
        }
        entries.push(ActivityEntry {
            title: title.to_string(),
            happened_at: NaiveDate::parse_from_str(date_part.trim(), "%Y-%m-%d").ok(),
        });
    }
    entries
}

/// Parse `- Full Name (type)` bullet lines.
fn parse_relationship_lines(content: &str) -> Vec<RelationshipEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let Some(rest) = line.trim().strip_prefix("- ") else {
            continue;
        };
        let Some((name, kind)) = rest.rsplit_once(" (") else {
            continue;
        };
        let Some(kind) = kind.strip_suffix(')') else {
            continue;
        };
        if name.trim().is_empty() || kind.trim().is_empty() {
            continue;
        }
        entries.push(RelationshipEntry {
            name: name.trim().to_string(),
            relationship_type: kind.trim().to_string(),
        });
    }
    entries
}

/// Lowercase, ASCII-fold and dash-join a name for use as a file stem.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Relationship;
    use uuid::Uuid;

    #[test]
    fn test_encode_full_contact() {
        let mut contact = Contact::new(Uuid::new_v4(), "Ada", "Lovelace")
            .with_methods(vec![
                ContactMethod::new("email", "ada@example.org"),
                ContactMethod::new("phone", "+44 1234"),
            ])
            .with_tags(vec!["friend".into()])
            .with_notes("First programmer.");
        contact.birthday = NaiveDate::from_ymd_opt(1815, 12, 10);
        contact.activities = vec![ActivityEntry {
            title: "Tea at Babbage's".into(),
            happened_at: NaiveDate::from_ymd_opt(1843, 7, 1),
        }];
        contact.relationships = vec![Relationship {
            other_name: "Charles Babbage".into(),
            relationship_type: "colleague".into(),
        }];

        let md = ContactMarkdownCodec.encode(&contact).unwrap();
        assert!(md.starts_with("---\n"));
        assert!(md.contains("title: Ada Lovelace"));
        assert!(md.contains("type: contact"));
        assert!(md.contains("birthdate: 1815-12-10"));
        assert!(md.contains("email: ada@example.org"));
        assert!(md.contains("## Notes"));
        assert!(md.contains("- 1843-07-01: Tea at Babbage's"));
        assert!(md.contains("- Charles Babbage (colleague)"));
    }

    #[test]
    fn test_round_trip() {
        let mut contact = Contact::new(Uuid::new_v4(), "Ada", "Lovelace")
            .with_methods(vec![ContactMethod::new("email", "ada@example.org")])
            .with_tags(vec!["friend".into(), "mathematician".into()])
            .with_notes("First programmer.");
        contact.activities = vec![ActivityEntry {
            title: "Tea".into(),
            happened_at: NaiveDate::from_ymd_opt(1843, 7, 1),
        }];

        let md = ContactMarkdownCodec.encode(&contact).unwrap();
        let decoded = ContactMarkdownCodec.decode(&md).unwrap();

        assert_eq!(decoded.first_name, "Ada");
        assert_eq!(decoded.last_name, "Lovelace");
        assert_eq!(decoded.tags, vec!["friend", "mathematician"]);
        assert_eq!(decoded.notes.as_deref(), Some("First programmer."));
        assert_eq!(decoded.contact_methods.len(), 1);
        assert_eq!(
            decoded.activities.as_deref(),
            Some(
                &[ActivityEntry {
                    title: "Tea".into(),
                    happened_at: NaiveDate::from_ymd_opt(1843, 7, 1),
                }][..]
            )
        );
        assert_eq!(decoded.relationships.as_deref(), Some(&[][..]));
    }

    #[test]
    fn test_decode_multiple_emails() {
        let md = "---\ntitle: Grace Hopper\nemail:\n  - grace@navy.mil\n  - grace@example.org\n---\n";
        let decoded = ContactMarkdownCodec.decode(md).unwrap();
        assert_eq!(decoded.contact_methods.len(), 2);
        assert!(decoded
            .contact_methods
            .iter()
            .all(|m| m.kind == "email"));
    }

    #[test]
    fn test_decode_relationships_section() {
        let md = "---\ntitle: Ada Lovelace\n---\n\n## Relationships\n\n- Charles Babbage (colleague)\n- Lord Byron (father)\n";
        let decoded = ContactMarkdownCodec.decode(md).unwrap();
        let rels = decoded.relationships.unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[1].name, "Lord Byron");
        assert_eq!(rels[1].relationship_type, "father");
    }

    #[test]
    fn test_decode_rejects_missing_frontmatter() {
        assert!(ContactMarkdownCodec.decode("# Just a heading\n").is_err());
        assert!(ContactMarkdownCodec.decode("---\nkey: 1\n---\n").is_err());
    }

    #[test]
    fn test_decode_mononym_title() {
        let md = "---\ntitle: Prince\n---\n";
        let decoded = ContactMarkdownCodec.decode(md).unwrap();
        assert_eq!(decoded.first_name, "Prince");
        assert_eq!(decoded.last_name, "");
    }

    #[test]
    fn test_extract_title() {
        let md = "---\ntitle: Ada Lovelace\n---\n";
        assert_eq!(extract_title(md).as_deref(), Some("Ada Lovelace"));
        assert_eq!(extract_title("no frontmatter"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Ada Lovelace"), "ada-lovelace");
        assert_eq!(slugify("  Grace   Hopper  "), "grace-hopper");
        assert_eq!(slugify("Jean-Luc Picard"), "jean-luc-picard");
        assert_eq!(slugify("Łukasz Nowak"), "łukasz-nowak");
    }

    #[test]
    fn test_parse_activity_lines_skips_malformed() {
        let entries = parse_activity_lines("- 1843-07-01: Tea\nnot a bullet\n- :\n- no-date: Walk");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Tea");
        assert_eq!(entries[1].title, "Walk");
        assert!(entries[1].happened_at.is_none());
    }
}
