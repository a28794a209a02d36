//! Maps raw transport outcomes onto the closed [`ApiError`] taxonomy.
//!
//! Rules, first match wins:
//! 1. no response: `Timeout` if the deadline passed, `Offline` if the
//!    connectivity gate reports offline, otherwise `Unknown`
//! 2. `2xx`: `Success` if the body parses (an empty body is `null`),
//!    otherwise `ParseError`
//! 3. `401` -> `Unauthorized`, `404` -> `NotFound`, `409` -> `Conflict`
//! 4. `400`/`422` -> `Validation` with field errors when present
//! 5. `5xx` -> `ServerError`, anything else -> `Unknown`

use serde_json::{Map, Value};
use tracing::debug;

use super::error::{ApiError, FieldErrors};
use super::transport::{RawResponse, TransportError, TransportErrorKind};
use crate::connectivity::ConnectivityGate;

/// Outcome of a single logical request: the decoded JSON value or a
/// classified failure.
pub type ClassifiedResult = Result<Value, ApiError>;

#[derive(Clone)]
pub struct ResponseClassifier {
    connectivity: ConnectivityGate,
}

impl ResponseClassifier {
    pub fn new(connectivity: ConnectivityGate) -> Self {
        Self { connectivity }
    }

    pub fn classify(&self, outcome: Result<RawResponse, TransportError>) -> ClassifiedResult {
        match outcome {
            Ok(response) => Self::classify_response(response.status, &response.body),
            Err(err) => Err(self.classify_transport_error(&err)),
        }
    }

    fn classify_transport_error(&self, err: &TransportError) -> ApiError {
        debug!(kind = ?err.kind, error = %err.message, "No response received");
        match err.kind {
            TransportErrorKind::TimedOut => {
                ApiError::Timeout("The server took too long to respond".to_string())
            }
            _ if !self.connectivity.is_online() => ApiError::Offline,
            _ => ApiError::Unknown("The request could not be completed".to_string()),
        }
    }

    pub fn classify_response(status: u16, body: &[u8]) -> ClassifiedResult {
        if (200..300).contains(&status) {
            return Self::parse_success(status, body);
        }

        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let fields = parsed.as_ref().and_then(Value::as_object);
        let message = fields
            .and_then(Self::extract_message)
            .unwrap_or_else(|| Self::generic_message(status));

        if parsed.is_none() && !body.is_empty() {
            debug!(
                status,
                body = %ApiError::truncate_body(&String::from_utf8_lossy(body)),
                "Error response body is not JSON"
            );
        }

        match status {
            401 => Err(ApiError::Unauthorized(message)),
            404 => Err(ApiError::NotFound(message)),
            409 => Err(ApiError::Conflict(message)),
            400 | 422 => Err(ApiError::Validation {
                message,
                field_errors: fields.map(Self::extract_field_errors).unwrap_or_default(),
            }),
            500..=599 => Err(ApiError::ServerError { status, message }),
            _ => Err(ApiError::Unknown(message)),
        }
    }

    fn parse_success(status: u16, body: &[u8]) -> ClassifiedResult {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(body).map_err(|e| {
            debug!(status, error = %e, "Success response body is not valid JSON");
            ApiError::ParseError(format!(
                "The server returned an unreadable response (status {})",
                status
            ))
        })
    }

    fn generic_message(status: u16) -> String {
        format!("Request failed with status {}", status)
    }

    /// `detail` wins over `message`; a FastAPI-style `detail` list is summarised.
    fn extract_message(body: &Map<String, Value>) -> Option<String> {
        match body.get("detail") {
            Some(Value::String(detail)) => return Some(detail.clone()),
            Some(Value::Array(items)) if !items.is_empty() => {
                return Some("One or more fields are invalid".to_string())
            }
            _ => {}
        }
        body.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Reads `{"errors": {field: [msg]}}` and FastAPI's
    /// `{"detail": [{"loc": [.., field], "msg": ..}]}`.
    fn extract_field_errors(body: &Map<String, Value>) -> FieldErrors {
        let mut field_errors = FieldErrors::new();

        if let Some(Value::Object(errors)) = body.get("errors") {
            for (field, messages) in errors {
                let entry = field_errors.entry(field.clone()).or_default();
                match messages {
                    Value::Array(list) => {
                        entry.extend(list.iter().filter_map(Value::as_str).map(str::to_string))
                    }
                    Value::String(single) => entry.push(single.clone()),
                    _ => {}
                }
            }
        }

        if let Some(Value::Array(items)) = body.get("detail") {
            for item in items {
                let Some(msg) = item.get("msg").and_then(Value::as_str) else {
                    continue;
                };
                let field = item
                    .get("loc")
                    .and_then(Value::as_array)
                    .and_then(|loc| loc.last())
                    .map(|last| match last {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "body".to_string());
                field_errors.entry(field).or_default().push(msg.to_string());
            }
        }

        field_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorKind;
    use serde_json::json;

    fn classifier(online: bool) -> ResponseClassifier {
        let gate = ConnectivityGate::new(online);
        ResponseClassifier::new(gate)
    }

    fn classify(status: u16, body: &str) -> ClassifiedResult {
        ResponseClassifier::classify_response(status, body.as_bytes())
    }

    #[test]
    fn test_success_with_json_body() {
        let value = classify(200, r#"[{"id":"t1"}]"#).unwrap();
        assert_eq!(value, json!([{"id": "t1"}]));
    }

    #[test]
    fn test_success_with_empty_body_is_null() {
        assert_eq!(classify(204, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_success_with_garbage_is_parse_error() {
        let err = classify(200, "{\"id\": ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(err.message().contains("200"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify(401, "").unwrap_err().kind(), ErrorKind::Unauthorized);
        assert_eq!(classify(404, "").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(classify(409, "").unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(classify(400, "").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(classify(422, "").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(classify(500, "").unwrap_err().kind(), ErrorKind::ServerError);
        assert_eq!(classify(503, "").unwrap_err().kind(), ErrorKind::ServerError);
        assert_eq!(classify(403, "").unwrap_err().kind(), ErrorKind::Unknown);
        assert_eq!(classify(302, "").unwrap_err().kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_message_prefers_detail() {
        let err = classify(404, r#"{"detail": "Task not found", "message": "other"}"#).unwrap_err();
        assert_eq!(err.message(), "Task not found");

        let err = classify(409, r#"{"message": "Already exists"}"#).unwrap_err();
        assert_eq!(err.message(), "Already exists");
    }

    #[test]
    fn test_generic_message_when_body_unreadable() {
        let err = classify(500, "<html>Internal Server Error</html>").unwrap_err();
        assert_eq!(err.message(), "Request failed with status 500");
        assert!(!err.to_string().contains("html"));
    }

    #[test]
    fn test_validation_field_errors() {
        let body = r#"{"detail": "Invalid task", "errors": {"title": ["required"], "due_date": "bad date"}}"#;
        let err = classify(400, body).unwrap_err();
        let fields = err.field_errors().unwrap();
        assert_eq!(err.message(), "Invalid task");
        assert_eq!(fields["title"], vec!["required".to_string()]);
        assert_eq!(fields["due_date"], vec!["bad date".to_string()]);
    }

    #[test]
    fn test_validation_fastapi_detail_list() {
        let body = r#"{"detail": [{"loc": ["body", "email"], "msg": "value is not a valid email address", "type": "value_error.email"}]}"#;
        let err = classify(422, body).unwrap_err();
        let fields = err.field_errors().unwrap();
        assert_eq!(fields["email"], vec!["value is not a valid email address".to_string()]);
        assert_eq!(err.message(), "One or more fields are invalid");
    }

    #[test]
    fn test_transport_timeout() {
        let err = classifier(true)
            .classify(Err(TransportError::new(TransportErrorKind::TimedOut, "deadline")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_transport_failure_while_offline() {
        let err = classifier(false)
            .classify(Err(TransportError::new(TransportErrorKind::Connect, "dns")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Offline);
    }

    #[test]
    fn test_transport_failure_while_online_is_unknown() {
        let err = classifier(true)
            .classify(Err(TransportError::new(
                TransportErrorKind::Connect,
                "connection refused (os error 111)",
            )))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(!err.message().contains("os error"));
    }
}
