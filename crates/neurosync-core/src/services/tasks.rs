use serde::Deserialize;
use tracing::debug;

use crate::api::{ApiError, ExecuteOptions, RequestDispatcher};
use crate::models::{Task, TaskCreate, TaskUpdate};

use super::api_path;

#[derive(Deserialize)]
struct ProcessedReply {
    message: String,
}

#[derive(Clone)]
pub struct TaskService {
    dispatcher: RequestDispatcher,
}

impl TaskService {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Task>, ApiError> {
        self.dispatcher.get(&api_path(&["tasks", user_id], &[])).await
    }

    /// Only completed (or only open) tasks, filtered server side.
    pub async fn list_by_status(&self, user_id: &str, completed: bool) -> Result<Vec<Task>, ApiError> {
        let path = api_path(&["tasks", user_id], &[("completed", completed.to_string())]);
        self.dispatcher.get(&path).await
    }

    pub async fn get(&self, task_id: &str) -> Result<Task, ApiError> {
        self.dispatcher.get(&api_path(&["tasks", task_id], &[])).await
    }

    pub async fn create(&self, task: &TaskCreate) -> Result<Task, ApiError> {
        debug!(title = %task.title, "Creating task");
        self.dispatcher.post(&api_path(&["tasks", ""], &[]), task).await
    }

    pub async fn update(&self, task_id: &str, update: &TaskUpdate) -> Result<Task, ApiError> {
        self.dispatcher
            .put(&api_path(&["tasks", task_id], &[]), update)
            .await
    }

    /// Mark done. Recurring tasks are re-created by the server.
    pub async fn complete(&self, task_id: &str) -> Result<Task, ApiError> {
        self.dispatcher
            .put(&api_path(&["tasks", task_id, "complete"], &[]), &serde_json::json!({}))
            .await
    }

    /// Ask the server to generate the next occurrence of every recurring
    /// task. The endpoint is a GET with side effects, so it always goes to
    /// the network and drops cached task reads afterwards.
    pub async fn process_recurring(&self) -> Result<String, ApiError> {
        let path = api_path(&["tasks", "recurring"], &[]);
        let reply: ProcessedReply = self
            .dispatcher
            .get_with(&path, ExecuteOptions::fresh())
            .await?;
        let dropped = self.dispatcher.cache().invalidate_prefix("/tasks");
        debug!(dropped, "Recurring tasks processed");
        Ok(reply.message)
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), ApiError> {
        self.dispatcher.delete(&api_path(&["tasks", task_id], &[])).await
    }
}
