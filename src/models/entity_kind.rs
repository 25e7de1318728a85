use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The entity kinds covered by synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Activity,
    Task,
    Reminder,
}

impl EntityKind {
    /// All kinds, in the order a sync run processes them.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Contact,
        EntityKind::Activity,
        EntityKind::Task,
        EntityKind::Reminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Activity => "activity",
            EntityKind::Task => "task",
            EntityKind::Reminder => "reminder",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contact" => Ok(EntityKind::Contact),
            "activity" => Ok(EntityKind::Activity),
            "task" => Ok(EntityKind::Task),
            "reminder" => Ok(EntityKind::Reminder),
            _ => Err(format!(
                "Invalid entity kind '{}'. Valid options: contact, activity, task, reminder",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(format!("{}", EntityKind::Contact), "contact");
        assert_eq!(format!("{}", EntityKind::Activity), "activity");
        assert_eq!(format!("{}", EntityKind::Task), "task");
        assert_eq!(format!("{}", EntityKind::Reminder), "reminder");
    }

    #[test]
    fn test_entity_kind_from_str() {
        assert_eq!(EntityKind::from_str("contact").unwrap(), EntityKind::Contact);
        assert_eq!(EntityKind::from_str("TASK").unwrap(), EntityKind::Task);
        assert!(EntityKind::from_str("note").is_err());
    }

    #[test]
    fn test_entity_kind_all_order() {
        assert_eq!(EntityKind::ALL[0], EntityKind::Contact);
        assert_eq!(EntityKind::ALL.len(), 4);
    }
}
