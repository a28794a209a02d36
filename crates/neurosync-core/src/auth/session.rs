use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::de;

/// The authenticated session. At most one is current; its absence means
/// signed out. Replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| Utc::now() >= expiry)
    }

    /// True when the expiry is known and falls within `buffer` from now.
    /// A buffer reaching past the representable range covers any expiry.
    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        self.expires_at.is_some_and(|expiry| {
            Utc::now()
                .checked_add_signed(buffer)
                .map_or(true, |deadline| deadline >= expiry)
        })
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|expiry| expiry - Utc::now())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.time_until_expiry().map(|d| d.num_minutes().max(0))
    }
}

/// Body returned by every `/auth/*` endpoint that establishes a session.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absent from OAuth2-style token replies; the caller then asks
    /// `/auth/me` who the token belongs to.
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl AuthResponse {
    /// Build a session for `user_id`; a refresh response without a new
    /// refresh token keeps the previous one. A lifetime that cannot be
    /// represented leaves the expiry unknown.
    pub fn into_session(self, user_id: String, previous_refresh: Option<String>) -> Session {
        let issued_at = Utc::now();
        let expires_at = self
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime));
        if self.expires_in.is_some() && expires_at.is_none() {
            debug!(expires_in = ?self.expires_in, "Ignoring out-of-range token lifetime");
        }
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            user_id,
            issued_at,
            expires_at,
        }
    }
}

/// State of the authentication lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    Authenticating,
    SignedIn,
    Refreshing,
}

/// Lifecycle notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    Refreshed { user_id: String },
    SignedOut,
    /// The session could not be recovered; the user must log in again.
    SessionEnded { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            access_token: "access-secret".to_string(),
            refresh_token: Some("refresh-secret".to_string()),
            user_id: "u1".to_string(),
            issued_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", session(None));
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
        assert!(rendered.contains("u1"));
    }

    #[test]
    fn test_unknown_expiry_never_expires() {
        let s = session(None);
        assert!(!s.is_expired());
        assert!(!s.needs_refresh(Duration::minutes(5)));
        assert_eq!(s.minutes_until_expiry(), None);
    }

    #[test]
    fn test_needs_refresh_within_buffer() {
        let s = session(Some(Utc::now() + Duration::minutes(3)));
        assert!(!s.is_expired());
        assert!(s.needs_refresh(Duration::minutes(5)));
        assert!(!s.needs_refresh(Duration::minutes(1)));
    }

    #[test]
    fn test_auth_response_numeric_user_id_and_expiry() {
        let json = r#"{"access_token": "a1", "user_id": 42, "expires_in": 1800, "token_type": "bearer"}"#;
        let response: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user_id.as_deref(), Some("42"));
        let s = response.into_session("42".to_string(), Some("r0".to_string()));
        assert_eq!(s.user_id, "42");
        assert_eq!(s.refresh_token.as_deref(), Some("r0"));
        let minutes = s.minutes_until_expiry().unwrap();
        assert!((29..=30).contains(&minutes));
    }

    #[test]
    fn test_out_of_range_lifetime_leaves_expiry_unknown() {
        let json = r#"{"access_token": "a1", "user_id": "u1", "expires_in": 10000000000000}"#;
        let response: AuthResponse = serde_json::from_str(json).unwrap();
        let s = response.into_session("u1".to_string(), None);
        assert_eq!(s.expires_at, None);
        assert!(!s.needs_refresh(Duration::minutes(5)));
    }

    #[test]
    fn test_huge_refresh_buffer_covers_any_expiry() {
        let s = session(Some(Utc::now() + Duration::days(365)));
        let huge = Duration::try_seconds(i64::MAX / 1000).unwrap();
        assert!(s.needs_refresh(huge));
    }

    #[test]
    fn test_token_reply_without_user_id() {
        let json = r#"{"access_token": "a1", "token_type": "bearer"}"#;
        let response: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user_id, None);
    }

    #[test]
    fn test_session_serde_round_trip_keeps_optional_fields() {
        let s = session(None);
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
