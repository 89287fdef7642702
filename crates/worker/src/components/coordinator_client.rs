use std::sync::RwLock;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use scheduler_core::{
    AgentError, AgentResult, HeartbeatPayload, LoginRequest, LoginResponse, PullTaskResponse,
    RegistrationRequest, RegistrationResponse, TaskAssignment, TaskReport,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// HTTP client for the coordinator API.
///
/// Requests carry the worker API key when one is configured, otherwise the
/// bearer token obtained from `login`.
pub struct CoordinatorClient {
    base_url: String,
    api_key: Option<SecretString>,
    access_token: RwLock<Option<SecretString>>,
    http_client: Client,
}

impl CoordinatorClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> AgentResult<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgentError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.map(SecretString::from),
            access_token: RwLock::new(None),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_access_token(&self, token: Option<SecretString>) {
        let mut slot = self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token;
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.bearer_value().is_some()
    }

    fn bearer_value(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.api_key {
            return request.header(API_KEY_HEADER, key.expose_secret());
        }
        match self.bearer_value() {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> AgentResult<Response> {
        let url = self.url(path);
        let response = self
            .authorize(self.http_client.post(&url).json(body))
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("POST {path}: {e}")))?;
        ensure_success(response).await
    }

    pub async fn login(&self, username: &str, password: &str) -> AgentResult<LoginResponse> {
        let url = self.url("/auth/login");
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("POST /auth/login: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                let login: LoginResponse = response
                    .json()
                    .await
                    .map_err(|e| AgentError::Serialization(format!("login response: {e}")))?;
                info!("Logged in to coordinator as {}", username);
                Ok(login)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                warn!("Login rejected for {}", username);
                Err(AgentError::Authentication(if body.is_empty() {
                    "invalid credentials".to_string()
                } else {
                    body
                }))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AgentError::Http {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    pub async fn register(&self, request: &RegistrationRequest) -> AgentResult<String> {
        let response = match self.post_json("/workers/register", request).await {
            Ok(response) => response,
            Err(AgentError::Http { status, body }) if status == 401 || status == 403 => {
                error!("Registration rejected: HTTP {} - {}", status, body);
                return Err(AgentError::Authentication(format!("HTTP {status} - {body}")));
            }
            Err(e) => {
                error!("Failed to register worker: {}", e);
                return Err(AgentError::Registration(e.to_string()));
            }
        };

        let registered: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Registration(format!("malformed response: {e}")))?;
        info!(
            "Registered machine {} as worker {}",
            request.machine_id, registered.worker_id
        );
        Ok(registered.worker_id)
    }

    pub async fn send_heartbeat(
        &self,
        worker_id: &str,
        payload: &HeartbeatPayload,
    ) -> AgentResult<()> {
        self.post_json(&format!("/workers/{worker_id}/heartbeat"), payload)
            .await?;
        debug!("Heartbeat sent for worker {}", worker_id);
        Ok(())
    }

    /// `Some` on 200 with a task body, `None` on 204.
    pub async fn pull_task(&self, worker_id: &str) -> AgentResult<Option<TaskAssignment>> {
        let path = format!("/workers/{worker_id}/pull-task");
        let response = self
            .authorize(self.http_client.get(self.url(&path)))
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("GET {path}: {e}")))?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::Network(format!("GET {path}: {e}")))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let pulled: PullTaskResponse = serde_json::from_slice(&body)?;
        Ok(Some(pulled.into_assignment()))
    }

    pub async fn report(&self, worker_id: &str, report: &TaskReport) -> AgentResult<()> {
        let path = format!("/workers/{worker_id}/{}", report.endpoint());
        match report {
            TaskReport::Complete(body) => self.post_json(&path, body).await?,
            TaskReport::Failed(body) => self.post_json(&path, body).await?,
        };
        info!(task_id = %report.task_id(), "Reported {}", report.endpoint());
        Ok(())
    }

    /// Retry the report (never the execution) with exponential backoff.
    pub async fn report_with_retry(
        &self,
        worker_id: &str,
        report: &TaskReport,
        max_attempts: u32,
    ) -> AgentResult<()> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.report(worker_id, report).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        error!(
                            task_id = %report.task_id(),
                            "Giving up on {} after {} attempts: {}",
                            report.endpoint(),
                            attempt,
                            e
                        );
                        return Err(e);
                    }
                    let delay = Duration::from_millis(100 * (1 << (attempt - 1)));
                    warn!(
                        task_id = %report.task_id(),
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        report.endpoint(),
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn push_channel_url(&self, worker_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/workers/{worker_id}/ws")
    }

    /// WebSocket handshake request for the push channel, with the same credentials
    /// as the HTTP calls.
    pub fn push_channel_request(&self, worker_id: &str) -> AgentResult<Request> {
        let mut request = self
            .push_channel_url(worker_id)
            .into_client_request()
            .map_err(|e| AgentError::Configuration(format!("invalid push channel URL: {e}")))?;

        let header = if let Some(key) = &self.api_key {
            Some((API_KEY_HEADER, key.expose_secret().to_string()))
        } else {
            self.bearer_value().map(|value| ("authorization", value))
        };
        if let Some((name, value)) = header {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| AgentError::Configuration(format!("invalid credential header: {e}")))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

async fn ensure_success(response: Response) -> AgentResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::Http {
        status: status.as_u16(),
        body,
    })
}
