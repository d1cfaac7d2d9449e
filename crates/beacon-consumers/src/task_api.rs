use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{NewTaskCommand, TaskStore, TaskStoreError};
use beacon_events::ids::TaskId;
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_TASK_API_URL: &str = "http://127.0.0.1:4700";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Task CRUD lives in its own service; this is the creation path recurring
/// tasks go through. Server-side trouble maps to `Unavailable` (the caller
/// retries), anything the service refuses maps to `Rejected`.
pub struct HttpTaskStore {
    client: Client,
    base_url: String,
}

impl HttpTaskStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Reads `BEACON_TASK_API_URL`, defaulting to `http://127.0.0.1:4700`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("BEACON_TASK_API_URL")
            .unwrap_or_else(|_| DEFAULT_TASK_API_URL.to_string());
        Self::new(base_url)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    task_id: TaskId,
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn create_task(&self, command: NewTaskCommand) -> Result<TaskId, TaskStoreError> {
        let url = format!("{}/tasks", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&command)
            .send()
            .await
            .map_err(|err| TaskStoreError::Unavailable {
                message: format!("request failed: {err}"),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TaskStoreError::Unavailable {
                message: format!("task store returned {status}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskStoreError::Rejected {
                message: format!("task store returned {status}: {body}"),
            });
        }

        let created: CreatedTask =
            response
                .json()
                .await
                .map_err(|err| TaskStoreError::Rejected {
                    message: format!("malformed response: {err}"),
                })?;
        Ok(created.task_id)
    }
}
