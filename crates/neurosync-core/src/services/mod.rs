//! Typed feature wrappers over the `RequestDispatcher`.
//!
//! Each service only knows its own paths and payload shapes; retries,
//! authentication and caching all happen in the dispatcher.

pub mod calendar;
pub mod chat;
pub mod finance;
pub mod tasks;

pub use calendar::CalendarService;
pub use chat::ChatService;
pub use finance::FinanceService;
pub use tasks::TaskService;

use reqwest::Url;

/// Build `base/segment1/segment2?key=value`, percent-encoding every
/// dynamic part.
pub(crate) fn api_path(segments: &[&str], query: &[(&str, String)]) -> String {
    let Ok(mut url) = Url::parse("http://neurosync.local/") else {
        return String::from("/");
    };
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments);
    }
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_path_encodes_segments() {
        assert_eq!(api_path(&["tasks", "u1"], &[]), "/tasks/u1");
        assert_eq!(api_path(&["tasks", "a/b c"], &[]), "/tasks/a%2Fb%20c");
        assert_eq!(
            api_path(&["chat", "history", "u1"], &[("limit", "20".to_string())]),
            "/chat/history/u1?limit=20"
        );
    }

    #[test]
    fn test_api_path_trailing_slash() {
        assert_eq!(api_path(&["tasks", ""], &[]), "/tasks/");
    }
}
