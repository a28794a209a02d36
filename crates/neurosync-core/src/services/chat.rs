use crate::api::{ApiError, ExecuteOptions, RequestDispatcher};
use crate::models::{ChatHistoryEntry, ChatMessage, ChatResponse};

use super::api_path;

/// Server default for the history endpoint.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct ChatService {
    dispatcher: RequestDispatcher,
}

impl ChatService {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Send a message to the assistant. Not retried automatically: a
    /// duplicate would be answered twice.
    pub async fn send(&self, message: &ChatMessage) -> Result<ChatResponse, ApiError> {
        self.dispatcher.post("/chat", message).await
    }

    pub async fn history(&self, user_id: &str, limit: u32) -> Result<Vec<ChatHistoryEntry>, ApiError> {
        let path = api_path(&["chat", "history", user_id], &[("limit", limit.to_string())]);
        // A conversation changes on every send; always read it live
        self.dispatcher.get_with(&path, ExecuteOptions::fresh()).await
    }

    pub async fn clear_history(&self, user_id: &str) -> Result<(), ApiError> {
        self.dispatcher
            .delete(&api_path(&["chat", "history", user_id], &[]))
            .await
    }
}
