//! HTTP client for the remote analysis service

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::RemoteSettings;
use crate::domain::errors::{ApiErrorKind, IngestError, IngestResult};
use crate::domain::model::{TaskResult, TaskStatus};
use crate::ports::{CredentialsProvider, Sleeper};
use crate::remote::retry::RetryPolicy;
use crate::remote::types::{
    content_range, AnalyzeRequest, CreateIndexRequest, GenerateRequest, RateLimitStatus,
    RequestBody, SearchRequest, SearchResponse, TaskCreated, UploadTaskRequest,
};

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Resilient client for task-based remote processing.
///
/// One authenticated session is built on first use and reused until
/// [`close`](Self::close). Network failures and HTTP 429 are retried with
/// the configured [`RetryPolicy`]; everything else fails immediately.
pub struct RemoteTaskClient {
    base_url: String,
    api_key: String,
    settings: RemoteSettings,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    session: Mutex<Option<Client>>,
    rate_limit: Mutex<RateLimitStatus>,
}

impl RemoteTaskClient {
    pub fn new(
        settings: &RemoteSettings,
        credentials: &dyn CredentialsProvider,
        sleeper: Arc<dyn Sleeper>,
    ) -> IngestResult<Self> {
        let api_key = credentials.api_key(&settings.service_name).ok_or_else(|| {
            IngestError::Config(format!(
                "No API key available for service '{}'",
                settings.service_name
            ))
        })?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            settings: settings.clone(),
            retry: RetryPolicy::from_settings(settings),
            sleeper,
            session: Mutex::new(None),
            rate_limit: Mutex::new(RateLimitStatus::default()),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Configured wall-clock limit for `wait_for_task`
    pub fn task_timeout(&self) -> Duration {
        self.settings.task_timeout()
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .map(|session| session.is_some())
            .unwrap_or(false)
    }

    /// Drop the HTTP session; the next request builds a fresh one
    pub fn close(&self) {
        if let Ok(mut session) = self.session.lock() {
            if session.take().is_some() {
                debug!("Closed HTTP session to {}", self.base_url);
            }
        }
    }

    /// Last rate limit counters reported by the server
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limit
            .lock()
            .map(|status| *status)
            .unwrap_or_default()
    }

    fn session(&self) -> IngestResult<Client> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| IngestError::Config("HTTP session lock poisoned".to_string()))?;
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| IngestError::Config("API key is not a valid header value".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(self.settings.request_timeout())
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to create HTTP client: {}", e)))?;
        debug!("Opened HTTP session to {}", self.base_url);
        *session = Some(client.clone());
        Ok(client)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Issue one request with retries and return the JSON body (`Null` if empty)
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
    ) -> IngestResult<Value> {
        let operation = format!("{} {}", method, endpoint);
        self.retry
            .execute(self.sleeper.as_ref(), &operation, || {
                self.send_once(method.clone(), endpoint, &body)
            })
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        body: &RequestBody,
    ) -> IngestResult<Value> {
        let client = self.session()?;
        let mut builder = client.request(method, self.url(endpoint));
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Chunk {
                data,
                content_range,
            } => builder
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_RANGE, content_range.as_str())
                .body(data.clone()),
        };

        let response = builder.send().await?;
        self.record_rate_limit(&response);
        self.handle_response(response).await
    }

    fn record_rate_limit(&self, response: &Response) {
        let read = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
        };
        let remaining = read(RATE_LIMIT_REMAINING);
        let reset = read(RATE_LIMIT_RESET);
        if remaining.is_none() && reset.is_none() {
            return;
        }

        if let Ok(mut status) = self.rate_limit.lock() {
            if remaining.is_some() {
                status.remaining = remaining;
            }
            if reset.is_some() {
                status.reset = reset;
            }
        }
    }

    async fn handle_response(&self, response: Response) -> IngestResult<Value> {
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset = self.rate_limit_status().reset;
            return Err(IngestError::RateLimit {
                message: error_message(&text, status),
                reset,
            });
        }

        if !status.is_success() {
            let kind = ApiErrorKind::from_status(status.as_u16());
            return Err(IngestError::api(
                kind,
                Some(status.as_u16()),
                error_message(&text, status),
            ));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            IngestError::api(
                ApiErrorKind::InvalidResponse,
                Some(status.as_u16()),
                format!("Response is not valid JSON: {}", e),
            )
        })
    }

    /// Upload `path` in chunks to `index_name` and return the remote video id
    pub async fn upload_video(&self, path: &Path, index_name: &str) -> IngestResult<String> {
        self.upload_video_with_progress(path, index_name, |_, _| {})
            .await
    }

    /// As [`upload_video`](Self::upload_video), calling `on_chunk(sent, total)`
    /// after every chunk is accepted
    pub async fn upload_video_with_progress<F>(
        &self,
        path: &Path,
        index_name: &str,
        mut on_chunk: F,
    ) -> IngestResult<String>
    where
        F: FnMut(u64, u64),
    {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| IngestError::storage(format!("Failed to open {}", path.display()), e))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| IngestError::storage(format!("Failed to stat {}", path.display()), e))?
            .len();

        let created: TaskCreated = parse(
            self.request(
                Method::POST,
                "tasks/upload",
                RequestBody::Json(serde_json::to_value(UploadTaskRequest { index_name })?),
            )
            .await?,
        )?;
        let task_id = created.task_id;
        info!(task_id = %task_id, path = %path.display(), bytes = total, "Upload task created");

        let chunk_size = self.settings.chunk_size.max(1);
        let endpoint = format!("tasks/{}", task_id);
        let mut offset = 0u64;
        let mut chunks = 0usize;
        loop {
            let data = read_chunk(&mut file, chunk_size)
                .await
                .map_err(|e| IngestError::storage(format!("Failed to read {}", path.display()), e))?;
            if data.is_empty() {
                break;
            }

            let len = data.len() as u64;
            let body = RequestBody::Chunk {
                content_range: content_range(offset, len, total),
                data,
            };
            self.request(Method::PUT, &endpoint, body).await?;
            offset += len;
            chunks += 1;
            on_chunk(offset, total);
        }
        debug!(task_id = %task_id, chunks, "All chunks sent");

        let result = self
            .wait_for_task(&task_id, self.settings.task_timeout())
            .await?;
        result
            .video_id
            .clone()
            .or_else(|| {
                result
                    .result
                    .as_ref()
                    .and_then(|r| r.get("video_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                IngestError::api(
                    ApiErrorKind::InvalidResponse,
                    None,
                    format!("Upload task {} completed without a video_id", task_id),
                )
            })
    }

    /// Poll a task until it completes, fails, or `timeout` elapses
    pub async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> IngestResult<TaskResult> {
        let started = Instant::now();
        let endpoint = format!("tasks/{}", task_id);
        let mut polls = 0u32;

        loop {
            let task: TaskResult =
                parse(self.request(Method::GET, &endpoint, RequestBody::Empty).await?)?;
            polls += 1;

            match task.status {
                TaskStatus::Completed => {
                    info!(task_id, polls, "Task completed");
                    return Ok(task);
                }
                TaskStatus::Failed => {
                    let message = task
                        .error
                        .unwrap_or_else(|| "Task failed without an error message".to_string());
                    warn!(task_id, "Task failed: {}", message);
                    return Err(IngestError::task(task_id, message));
                }
                TaskStatus::Pending | TaskStatus::Processing => {
                    if started.elapsed() >= timeout {
                        return Err(IngestError::task(
                            task_id,
                            format!(
                                "Timed out after {:.1}s while {}",
                                started.elapsed().as_secs_f64(),
                                status_label(task.status)
                            ),
                        ));
                    }
                    debug!(task_id, status = status_label(task.status), "Task not finished");
                    self.sleeper.sleep(self.settings.poll_interval()).await;
                }
            }
        }
    }

    /// Start an analysis task on an uploaded video
    pub async fn create_task(
        &self,
        task_type: &str,
        video_id: &str,
        options: &Map<String, Value>,
    ) -> IngestResult<String> {
        let body = serde_json::to_value(AnalyzeRequest {
            video_id,
            task_type,
            options,
        })?;
        let created: TaskCreated = parse(
            self.request(Method::POST, "tasks/analyze", RequestBody::Json(body))
                .await?,
        )?;
        info!(task_id = %created.task_id, video_id, task_type, "Analysis task created");
        Ok(created.task_id)
    }

    pub async fn search(
        &self,
        query: &str,
        index_name: &str,
        options: &Map<String, Value>,
    ) -> IngestResult<Vec<Value>> {
        let body = serde_json::to_value(SearchRequest {
            index_name,
            query,
            options,
        })?;
        let response: SearchResponse =
            parse(self.request(Method::POST, "search", RequestBody::Json(body)).await?)?;
        Ok(response.matches)
    }

    pub async fn list_indexes(&self) -> IngestResult<Value> {
        self.request(Method::GET, "indexes", RequestBody::Empty)
            .await
    }

    pub async fn create_index(
        &self,
        index_name: &str,
        options: &Map<String, Value>,
    ) -> IngestResult<Value> {
        let body = serde_json::to_value(CreateIndexRequest {
            index_name,
            options,
        })?;
        self.request(Method::POST, "indexes", RequestBody::Json(body))
            .await
    }

    pub async fn delete_index(&self, index_name: &str) -> IngestResult<Value> {
        self.request(
            Method::DELETE,
            &format!("indexes/{}", index_name),
            RequestBody::Empty,
        )
        .await
    }

    pub async fn generate_text(
        &self,
        video_id: &str,
        prompt: &str,
        options: &Map<String, Value>,
    ) -> IngestResult<Value> {
        let body = serde_json::to_value(GenerateRequest {
            video_id,
            prompt,
            options,
        })?;
        self.request(Method::POST, "generate", RequestBody::Json(body))
            .await
    }

    pub async fn cancel_task(&self, task_id: &str) -> IngestResult<Value> {
        self.request(
            Method::POST,
            &format!("tasks/{}/cancel", task_id),
            RequestBody::Json(json!({})),
        )
        .await
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> IngestResult<T> {
    serde_json::from_value(value).map_err(|e| {
        IngestError::api(
            ApiErrorKind::InvalidResponse,
            None,
            format!("Unexpected response shape: {}", e),
        )
    })
}

/// Server-provided message, taken verbatim from `message` or `error` when the body is JSON
fn error_message(text: &str, status: StatusCode) -> String {
    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(text) {
        for key in ["message", "error"] {
            if let Some(message) = body.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    let text = text.trim();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        text.to_string()
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Processing => "processing",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

async fn read_chunk(file: &mut tokio::fs::File, chunk_size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}
