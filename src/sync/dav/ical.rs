//! Activity/Task/Reminder ↔ iCalendar translation.
//!
//! Activities are VEVENTs; tasks and reminders are both VTODOs. A private
//! `X-AMITY-KIND` property records which one a VTODO is; payloads written
//! by other clients fall back to the RRULE heuristic (recurring → reminder).

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{Activity, ActivityData, Reminder, ReminderData, Task, TaskData};
use crate::sync::engine::Codec;
use crate::sync::error::SyncError;

use super::vcard::{escape, split_line, unescape, unfold};

const PRODID: &str = "-//AMITY//EN";

/// Which entity a VTODO payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoKind {
    Task,
    Reminder,
}

/// Classify a calendar payload's VTODO component.
pub fn todo_kind(payload: &str) -> Option<TodoKind> {
    let mut in_todo = false;
    let mut has_rrule = false;
    for line in unfold(payload) {
        let Some((name, _, value)) = split_line(&line) else {
            continue;
        };
        match name.as_str() {
            "BEGIN" if value.eq_ignore_ascii_case("VTODO") => in_todo = true,
            "END" if value.eq_ignore_ascii_case("VTODO") => {
                if in_todo {
                    return Some(if has_rrule {
                        TodoKind::Reminder
                    } else {
                        TodoKind::Task
                    });
                }
            }
            "X-AMITY-KIND" if in_todo => match value.trim() {
                "task" => return Some(TodoKind::Task),
                "reminder" => return Some(TodoKind::Reminder),
                _ => {}
            },
            "RRULE" if in_todo => has_rrule = true,
            _ => {}
        }
    }
    None
}

/// True when the payload contains a VEVENT component.
pub fn has_vevent(payload: &str) -> bool {
    unfold(payload).iter().any(|line| {
        matches!(split_line(line), Some((name, _, value))
            if name == "BEGIN" && value.eq_ignore_ascii_case("VEVENT"))
    })
}

fn wrap_calendar(component: &str, body: Vec<String>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        format!("PRODID:{}", PRODID),
        "VERSION:2.0".to_string(),
        format!("BEGIN:{}", component),
    ];
    lines.extend(body);
    lines.push(format!("END:{}", component));
    lines.push("END:VCALENDAR".to_string());
    lines.join("\r\n") + "\r\n"
}

fn format_utc(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// Collect `(name, value)` property pairs inside one component.
fn component_props(payload: &str, component: &str) -> Vec<(String, String)> {
    let mut props = Vec::new();
    let mut inside = false;
    for line in unfold(payload) {
        let Some((name, _, value)) = split_line(&line) else {
            continue;
        };
        match name.as_str() {
            "BEGIN" if value.eq_ignore_ascii_case(component) => inside = true,
            "END" if value.eq_ignore_ascii_case(component) => break,
            _ if inside => props.push((name, value)),
            _ => {}
        }
    }
    props
}

pub struct ActivityICalCodec;

impl Codec for ActivityICalCodec {
    type Entity = Activity;
    type Decoded = ActivityData;

    fn encode(&self, activity: &Activity) -> Result<String, SyncError> {
        let mut body = vec![
            format!("UID:{}", activity.id),
            format!("DTSTAMP:{}", format_utc(&activity.updated_at)),
            format!("SUMMARY:{}", escape(&activity.title)),
        ];
        if let Some(happened_at) = &activity.happened_at {
            body.push(format!(
                "DTSTART;VALUE=DATE:{}",
                happened_at.format("%Y%m%d")
            ));
        }
        if let Some(description) = &activity.description {
            body.push(format!("DESCRIPTION:{}", escape(description)));
        }
        Ok(wrap_calendar("VEVENT", body))
    }

    fn decode(&self, payload: &str) -> Result<ActivityData, SyncError> {
        let props = component_props(payload, "VEVENT");
        if props.is_empty() {
            return Err(SyncError::Codec("no VEVENT component".into()));
        }
        let mut data = ActivityData::default();
        for (name, value) in props {
            match name.as_str() {
                "SUMMARY" => data.title = unescape(&value),
                "DESCRIPTION" => data.description = Some(unescape(&value)),
                "DTSTART" => data.happened_at = parse_date(&value),
                _ => {}
            }
        }
        if data.title.is_empty() {
            return Err(SyncError::Codec("VEVENT has no SUMMARY".into()));
        }
        Ok(data)
    }
}

pub struct TaskICalCodec;

impl Codec for TaskICalCodec {
    type Entity = Task;
    type Decoded = TaskData;

    fn encode(&self, task: &Task) -> Result<String, SyncError> {
        let mut body = vec![
            format!("UID:{}", task.id),
            format!("DTSTAMP:{}", format_utc(&task.updated_at)),
            format!("SUMMARY:{}", escape(&task.title)),
            "X-AMITY-KIND:task".to_string(),
        ];
        if let Some(description) = &task.description {
            body.push(format!("DESCRIPTION:{}", escape(description)));
        }
        if let Some(due_at) = &task.due_at {
            body.push(format!("DUE:{}", format_utc(due_at)));
        }
        match &task.completed_at {
            Some(completed_at) => {
                body.push(format!("COMPLETED:{}", format_utc(completed_at)));
                body.push("STATUS:COMPLETED".to_string());
            }
            None => body.push("STATUS:NEEDS-ACTION".to_string()),
        }
        Ok(wrap_calendar("VTODO", body))
    }

    fn decode(&self, payload: &str) -> Result<TaskData, SyncError> {
        let props = component_props(payload, "VTODO");
        if props.is_empty() {
            return Err(SyncError::Codec("no VTODO component".into()));
        }
        let mut data = TaskData::default();
        for (name, value) in props {
            match name.as_str() {
                "SUMMARY" => data.title = unescape(&value),
                "DESCRIPTION" => data.description = Some(unescape(&value)),
                "DUE" => data.due_at = parse_datetime(&value),
                "COMPLETED" => data.completed_at = parse_datetime(&value),
                _ => {}
            }
        }
        if data.title.is_empty() {
            return Err(SyncError::Codec("VTODO has no SUMMARY".into()));
        }
        Ok(data)
    }
}

pub struct ReminderICalCodec;

impl Codec for ReminderICalCodec {
    type Entity = Reminder;
    type Decoded = ReminderData;

    fn encode(&self, reminder: &Reminder) -> Result<String, SyncError> {
        let mut body = vec![
            format!("UID:{}", reminder.id),
            format!("DTSTAMP:{}", format_utc(&reminder.updated_at)),
            format!("SUMMARY:{}", escape(&reminder.title)),
            "X-AMITY-KIND:reminder".to_string(),
        ];
        if let Some(remind_at) = &reminder.remind_at {
            body.push(format!("DUE:{}", format_utc(remind_at)));
        }
        if let Some(recurrence) = &reminder.recurrence {
            body.push(format!("RRULE:{}", recurrence));
        }
        Ok(wrap_calendar("VTODO", body))
    }

    fn decode(&self, payload: &str) -> Result<ReminderData, SyncError> {
        let props = component_props(payload, "VTODO");
        if props.is_empty() {
            return Err(SyncError::Codec("no VTODO component".into()));
        }
        let mut data = ReminderData::default();
        for (name, value) in props {
            match name.as_str() {
                "SUMMARY" => data.title = unescape(&value),
                "DUE" => data.remind_at = parse_datetime(&value),
                "RRULE" => data.recurrence = Some(value),
                _ => {}
            }
        }
        if data.title.is_empty() {
            return Err(SyncError::Codec("VTODO has no SUMMARY".into()));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn test_activity_round_trip() {
        let activity = Activity::new(Uuid::new_v4(), "Tea at Babbage's")
            .with_happened_at(NaiveDate::from_ymd_opt(1843, 7, 1).unwrap())
            .with_description("Discussed the Analytical Engine");

        let ical = ActivityICalCodec.encode(&activity).unwrap();
        assert!(ical.contains("BEGIN:VEVENT"));
        assert!(ical.contains("DTSTART;VALUE=DATE:18430701"));

        let decoded = ActivityICalCodec.decode(&ical).unwrap();
        assert_eq!(decoded.title, "Tea at Babbage's");
        assert_eq!(decoded.happened_at, activity.happened_at);
        assert_eq!(
            decoded.description.as_deref(),
            Some("Discussed the Analytical Engine")
        );
    }

    #[test]
    fn test_task_round_trip() {
        let due = Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap();
        let task = Task::new(Uuid::new_v4(), "Call the bank").with_due_at(due);

        let ical = TaskICalCodec.encode(&task).unwrap();
        assert!(ical.contains("STATUS:NEEDS-ACTION"));
        assert!(ical.contains("DUE:20250801T120000Z"));

        let decoded = TaskICalCodec.decode(&ical).unwrap();
        assert_eq!(decoded.title, "Call the bank");
        assert_eq!(decoded.due_at, Some(due));
        assert!(decoded.completed_at.is_none());
    }

    #[test]
    fn test_completed_task_encodes_status() {
        let mut task = Task::new(Uuid::new_v4(), "Done thing");
        task.completed_at = Some(Utc.with_ymd_and_hms(2025, 8, 2, 9, 30, 0).unwrap());

        let ical = TaskICalCodec.encode(&task).unwrap();
        assert!(ical.contains("STATUS:COMPLETED"));
        assert!(ical.contains("COMPLETED:20250802T093000Z"));

        let decoded = TaskICalCodec.decode(&ical).unwrap();
        assert_eq!(decoded.completed_at, task.completed_at);
    }

    #[test]
    fn test_reminder_round_trip() {
        let reminder = Reminder::new(Uuid::new_v4(), "Birthday: Ada")
            .with_remind_at(Utc.with_ymd_and_hms(2025, 12, 10, 9, 0, 0).unwrap())
            .with_recurrence("FREQ=YEARLY");

        let ical = ReminderICalCodec.encode(&reminder).unwrap();
        assert!(ical.contains("RRULE:FREQ=YEARLY"));

        let decoded = ReminderICalCodec.decode(&ical).unwrap();
        assert_eq!(decoded.title, "Birthday: Ada");
        assert_eq!(decoded.recurrence.as_deref(), Some("FREQ=YEARLY"));
    }

    #[test]
    fn test_todo_kind_from_marker() {
        let task = TaskICalCodec.encode(&Task::new(Uuid::new_v4(), "t")).unwrap();
        assert_eq!(todo_kind(&task), Some(TodoKind::Task));

        let reminder = ReminderICalCodec
            .encode(&Reminder::new(Uuid::new_v4(), "r"))
            .unwrap();
        assert_eq!(todo_kind(&reminder), Some(TodoKind::Reminder));
    }

    #[test]
    fn test_todo_kind_rrule_heuristic() {
        // Foreign VTODO without the marker: recurrence means reminder.
        let recurring = "BEGIN:VCALENDAR\nBEGIN:VTODO\nSUMMARY:x\nRRULE:FREQ=DAILY\nEND:VTODO\nEND:VCALENDAR";
        assert_eq!(todo_kind(recurring), Some(TodoKind::Reminder));

        let plain = "BEGIN:VCALENDAR\nBEGIN:VTODO\nSUMMARY:x\nEND:VTODO\nEND:VCALENDAR";
        assert_eq!(todo_kind(plain), Some(TodoKind::Task));

        let event = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:x\nEND:VEVENT\nEND:VCALENDAR";
        assert_eq!(todo_kind(event), None);
        assert!(has_vevent(event));
    }

    #[test]
    fn test_decode_wrong_component_fails() {
        let event = ActivityICalCodec
            .encode(&Activity::new(Uuid::new_v4(), "x"))
            .unwrap();
        assert!(TaskICalCodec.decode(&event).is_err());
        assert!(ActivityICalCodec.decode(&event).is_ok());
    }
}
