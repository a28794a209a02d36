use serde::Deserialize;
use serde_json::Value;

use crate::api::{ApiError, RequestDispatcher};
use crate::models::{CalendarAuthStatus, CalendarEventRequest};

use super::api_path;

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CalendarsResponse {
    #[serde(default)]
    calendars: Vec<Value>,
}

/// Google Calendar proxy. Events and calendars are passed through in
/// Google's own JSON shape.
#[derive(Clone)]
pub struct CalendarService {
    dispatcher: RequestDispatcher,
}

impl CalendarService {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn events(&self, user_id: &str) -> Result<Vec<Value>, ApiError> {
        let response: EventsResponse = self
            .dispatcher
            .get(&api_path(&["calendar", "events", user_id], &[]))
            .await?;
        Ok(response.events)
    }

    pub async fn events_in(
        &self,
        user_id: &str,
        calendar_id: &str,
        max_results: u32,
    ) -> Result<Vec<Value>, ApiError> {
        let path = api_path(
            &["calendar", "events", user_id],
            &[
                ("calendar_id", calendar_id.to_string()),
                ("max_results", max_results.to_string()),
            ],
        );
        let response: EventsResponse = self.dispatcher.get(&path).await?;
        Ok(response.events)
    }

    pub async fn calendars(&self, user_id: &str) -> Result<Vec<Value>, ApiError> {
        let response: CalendarsResponse = self
            .dispatcher
            .get(&api_path(&["calendar", "calendars", user_id], &[]))
            .await?;
        Ok(response.calendars)
    }

    pub async fn create_event(&self, event: &CalendarEventRequest) -> Result<Value, ApiError> {
        self.dispatcher.post("/calendar/events", event).await
    }

    pub async fn check_auth(&self, user_id: &str) -> Result<CalendarAuthStatus, ApiError> {
        self.dispatcher
            .get(&api_path(&["calendar", "check-auth", user_id], &[]))
            .await
    }
}
