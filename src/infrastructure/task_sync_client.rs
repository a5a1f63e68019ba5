use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::RemoteTaskRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTasksRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[async_trait]
pub trait TaskSyncClient: Send + Sync {
    async fn list_tasks(
        &self,
        project_id: &str,
        request: ListTasksRequest,
    ) -> Result<Vec<RemoteTaskRecord>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTaskSyncClient {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl ReqwestTaskSyncClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid api base url '{base_url}': {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "api base url '{base_url}' cannot be a base"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            base_url,
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }

    fn api_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("task sync api error: http {}", status.as_u16())
        } else {
            format!("task sync api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Api(message)
    }

    fn tasks_endpoint(&self, project_id: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("caldav");
            segments.push("tasks");
            segments.push(project_id);
        }
        Ok(url)
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum TasksPayload {
    Wrapped { tasks: Vec<RemoteTaskRecord> },
    Bare(Vec<RemoteTaskRecord>),
}

impl TasksPayload {
    fn into_records(self) -> Vec<RemoteTaskRecord> {
        match self {
            Self::Wrapped { tasks } => tasks,
            Self::Bare(tasks) => tasks,
        }
    }
}

#[async_trait]
impl TaskSyncClient for ReqwestTaskSyncClient {
    async fn list_tasks(
        &self,
        project_id: &str,
        request: ListTasksRequest,
    ) -> Result<Vec<RemoteTaskRecord>, InfraError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(InfraError::InvalidConfig("project id must not be empty".to_string()));
        }

        let endpoint = self.tasks_endpoint(project_id)?;
        let mut req = self
            .client
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("start_date", request.start.to_rfc3339()),
                ("end_date", request.end.to_rfc3339()),
            ]);
        if let Some(access_token) = self.access_token.as_deref() {
            req = req.bearer_auth(access_token);
        }

        let response = req.send().await.map_err(|error| {
            InfraError::Network(format!("network error while listing synced tasks: {error}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading synced tasks response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }

        let parsed: TasksPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::Api(format!("invalid synced tasks payload: {error}; body={body}"))
        })?;
        Ok(parsed.into_records())
    }
}
