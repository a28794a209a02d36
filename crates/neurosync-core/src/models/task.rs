use serde::{Deserialize, Serialize};
#[cfg(feature = "ts")]
use ts_rs::TS;

use super::de;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "Low"),
            TaskPriority::Medium => write!(f, "Medium"),
            TaskPriority::High => write!(f, "High"),
        }
    }
}

/// How a completed task reappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Task {
    // Mongo-backed deployments return "_id", SQL-backed ones a numeric "id"
    #[serde(alias = "_id", deserialize_with = "de::string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// ISO 8601, as sent by the server.
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Task {
    pub fn is_recurring(&self) -> bool {
        self.recurrence != Recurrence::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct TaskCreate {
    pub user_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: TaskPriority,
    pub recurrence: Recurrence,
    pub tags: Vec<String>,
}

impl TaskCreate {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            due_date: None,
            priority: TaskPriority::default(),
            recurrence: Recurrence::default(),
            tags: Vec::new(),
        }
    }
}

/// Partial update; only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_accepts_mongo_and_sql_ids() {
        let mongo: Task =
            serde_json::from_str(r#"{"_id": "665f", "user_id": "u1", "title": "Pay rent"}"#).unwrap();
        assert_eq!(mongo.id, "665f");
        assert_eq!(mongo.priority, TaskPriority::Medium);
        assert!(!mongo.completed);

        let sql: Task = serde_json::from_str(
            r#"{"id": 12, "user_id": 3, "title": "Water plants", "recurrence": "weekly"}"#,
        )
        .unwrap();
        assert_eq!(sql.id, "12");
        assert_eq!(sql.user_id.as_deref(), Some("3"));
        assert!(sql.is_recurring());
    }

    #[test]
    fn test_task_update_sends_only_set_fields() {
        let update = TaskUpdate {
            completed: Some(true),
            ..TaskUpdate::default()
        };
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"completed":true}"#);
    }

    #[test]
    fn test_task_create_wire_shape() {
        let mut create = TaskCreate::new("u1", "Call doctor");
        create.priority = TaskPriority::High;
        let json = serde_json::to_value(&create).unwrap();
        assert_eq!(json["priority"], "high");
        assert_eq!(json["recurrence"], "none");
        assert!(json.get("description").is_none());
    }
}
