use serde::{Deserialize, Serialize};
#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct CalendarEventRequest {
    pub user_id: String,
    /// Defaults to the user's primary calendar on the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// ISO 8601
    pub start_time: String,
    /// ISO 8601
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<String>>,
}

/// Whether the user has connected a Google calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct CalendarAuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CalendarAuthStatus {
    pub fn is_usable(&self) -> bool {
        self.authenticated && self.valid
    }
}
