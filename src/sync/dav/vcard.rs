//! Contact ↔ vCard 3.0 translation.
//!
//! Hand-rolled on purpose: the subset of vCard this system round-trips is
//! small (identity, methods, addresses, categories), and the parser only
//! needs to survive arbitrary server output, not validate it.

use chrono::NaiveDate;

use crate::models::{Address, Contact, ContactData, ContactMethod};
use crate::sync::engine::Codec;
use crate::sync::error::SyncError;

pub struct ContactVCardCodec;

impl Codec for ContactVCardCodec {
    type Entity = Contact;
    type Decoded = ContactData;

    fn encode(&self, contact: &Contact) -> Result<String, SyncError> {
        let mut lines = vec![
            "BEGIN:VCARD".to_string(),
            "VERSION:3.0".to_string(),
            format!("UID:{}", contact.id),
            format!("FN:{}", escape(&contact.full_name())),
            format!(
                "N:{};{};;;",
                escape(&contact.last_name),
                escape(&contact.first_name)
            ),
        ];

        if let Some(nickname) = &contact.nickname {
            lines.push(format!("NICKNAME:{}", escape(nickname)));
        }
        if let Some(birthday) = &contact.birthday {
            lines.push(format!("BDAY:{}", birthday.format("%Y-%m-%d")));
        }
        for method in &contact.contact_methods {
            let name = match method.kind.as_str() {
                "email" => "EMAIL",
                "phone" => "TEL",
                "url" => "URL",
                other => {
                    tracing::debug!(kind = other, "unsupported contact method kind skipped");
                    continue;
                }
            };
            match &method.label {
                Some(label) => lines.push(format!(
                    "{};TYPE={}:{}",
                    name,
                    label.to_uppercase(),
                    escape(&method.value)
                )),
                None => lines.push(format!("{}:{}", name, escape(&method.value))),
            }
        }
        for address in &contact.addresses {
            lines.push(format!(
                "ADR:;;{};{};{};{};{}",
                escape(address.street.as_deref().unwrap_or("")),
                escape(address.city.as_deref().unwrap_or("")),
                escape(address.state.as_deref().unwrap_or("")),
                escape(address.postal_code.as_deref().unwrap_or("")),
                escape(address.country.as_deref().unwrap_or("")),
            ));
        }
        if !contact.tags.is_empty() {
            let tags: Vec<String> = contact.tags.iter().map(|t| escape(t)).collect();
            lines.push(format!("CATEGORIES:{}", tags.join(",")));
        }
        if let Some(notes) = &contact.notes {
            lines.push(format!("NOTE:{}", escape(notes)));
        }
        lines.push("END:VCARD".to_string());

        Ok(lines.join("\r\n") + "\r\n")
    }

    fn decode(&self, payload: &str) -> Result<ContactData, SyncError> {
        let mut data = ContactData::default();
        let mut saw_begin = false;

        for line in unfold(payload) {
            let Some((name, params, value)) = split_line(&line) else {
                continue;
            };
            match name.as_str() {
                "BEGIN" if value.eq_ignore_ascii_case("VCARD") => saw_begin = true,
                "FN" => {
                    // N is authoritative when present; FN is the fallback.
                    if data.first_name.is_empty() && data.last_name.is_empty() {
                        let full = unescape(&value);
                        match full.split_once(' ') {
                            Some((first, last)) => {
                                data.first_name = first.to_string();
                                data.last_name = last.to_string();
                            }
                            None => data.first_name = full,
                        }
                    }
                }
                "N" => {
                    let mut parts = value.split(';');
                    let last = parts.next().unwrap_or("");
                    let first = parts.next().unwrap_or("");
                    if !first.is_empty() || !last.is_empty() {
                        data.first_name = unescape(first);
                        data.last_name = unescape(last);
                    }
                }
                "NICKNAME" => data.nickname = Some(unescape(&value)),
                "BDAY" => {
                    data.birthday = NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok();
                }
                "NOTE" => data.notes = Some(unescape(&value)),
                "EMAIL" | "TEL" | "URL" => {
                    let kind = match name.as_str() {
                        "EMAIL" => "email",
                        "TEL" => "phone",
                        _ => "url",
                    };
                    let mut method = ContactMethod::new(kind, unescape(&value));
                    if let Some(label) = type_param(&params) {
                        method = method.with_label(label.to_lowercase());
                    }
                    data.contact_methods.push(method);
                }
                "ADR" => {
                    let parts: Vec<&str> = value.split(';').collect();
                    let field = |i: usize| -> Option<String> {
                        parts
                            .get(i)
                            .filter(|s| !s.is_empty())
                            .map(|s| unescape(s))
                    };
                    data.addresses.push(Address {
                        street: field(2),
                        city: field(3),
                        state: field(4),
                        postal_code: field(5),
                        country: field(6),
                    });
                }
                "CATEGORIES" => {
                    data.tags = value
                        .split(',')
                        .map(|t| unescape(t.trim()))
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                _ => {}
            }
        }

        if !saw_begin {
            return Err(SyncError::Codec("not a vCard payload".into()));
        }
        if data.first_name.is_empty() && data.last_name.is_empty() {
            return Err(SyncError::Codec("vCard has no FN or N".into()));
        }
        Ok(data)
    }
}

/// Pull the UID property out of a vCard or iCalendar payload.
pub fn extract_uid(payload: &str) -> Option<String> {
    for line in unfold(payload) {
        if let Some((name, _, value)) = split_line(&line) {
            if name == "UID" && !value.is_empty() {
                return Some(unescape(&value));
            }
        }
    }
    None
}

/// Join folded continuation lines (RFC 2425 folding).
pub(crate) fn unfold(payload: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in payload.lines() {
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            let idx = lines.len() - 1;
            lines[idx].push_str(&raw[1..]);
        } else {
            lines.push(raw.to_string());
        }
    }
    lines
}

/// Split `NAME;PARAM=V;PARAM=V:value` into (name, params, value).
pub(crate) fn split_line(line: &str) -> Option<(String, Vec<String>, String)> {
    let (head, value) = line.split_once(':')?;
    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts.map(|p| p.trim().to_string()).collect();
    Some((name, params, value.to_string()))
}

fn type_param(params: &[String]) -> Option<String> {
    params.iter().find_map(|p| {
        p.strip_prefix("TYPE=")
            .or_else(|| p.strip_prefix("type="))
            .map(String::from)
    })
}

pub(crate) fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

pub(crate) fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') | Some('N') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
