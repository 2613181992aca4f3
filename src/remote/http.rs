//! reqwest-backed control-plane client

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::wire;
use super::{ControlPlane, InitReply, InitUploadRequest, TransferInitRequest};
use crate::config::Config;
use crate::error::UploadError;
use crate::http_logger::{self, HttpRequestLog, HttpResponseLog};
use crate::types::ObjectTarget;

const USER_AGENT: &str = concat!("upload-engine/", env!("CARGO_PKG_VERSION"));

/// Error bodies longer than this are cut in error messages
const MAX_ERROR_BODY: usize = 512;

fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Session id, persistent for the lifetime of the process
fn get_session_id() -> &'static str {
    static SESSION_ID: OnceLock<String> = OnceLock::new();
    SESSION_ID.get_or_init(|| Uuid::new_v4().to_string())
}

/// Control-plane API over HTTP
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    log_dir: Option<PathBuf>,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(anyhow::anyhow!("base_url cannot be empty"));
        }
        Ok(Self {
            client,
            base_url,
            log_dir: None,
        })
    }

    /// Write the HTTP journal under `dir` instead of the default directory
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        token: &str,
        body: &T,
    ) -> Result<Bytes, UploadError> {
        let url = format!("{}{}", self.base_url, path);
        let request_id = generate_request_id();
        let payload = serde_json::to_string(body)
            .map_err(|e| UploadError::InvalidRequest(format!("cannot encode request: {}", e)))?;

        let request_log = http_logger::is_enabled().then(|| HttpRequestLog {
            method: "POST".to_string(),
            url: url.clone(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("User-Agent".to_string(), USER_AGENT.to_string()),
                ("x-request-id".to_string(), request_id.clone()),
                ("x-request-session-id".to_string(), get_session_id().to_string()),
                ("Authorization".to_string(), format!("Bearer {}", token)),
            ],
            body: Some(payload.clone()),
        });

        let started = Instant::now();
        let sent = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-request-id", &request_id)
            .header("x-request-session-id", get_session_id())
            .header("Authorization", format!("Bearer {}", token))
            .body(payload)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                if let Some(log) = &request_log {
                    let elapsed = started.elapsed().as_millis() as u64;
                    http_logger::log_request(
                        self.log_dir.as_deref(),
                        log,
                        None,
                        elapsed,
                        Some(&e.to_string()),
                    );
                }
                return Err(UploadError::from_reqwest(e));
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let response_headers = request_log
            .as_ref()
            .map(|_| http_logger::extract_response_headers(&response));

        let body = response.bytes().await.map_err(UploadError::from_reqwest)?;
        let elapsed = started.elapsed().as_millis() as u64;

        if let (Some(log), Some(headers)) = (&request_log, response_headers) {
            let response_log = HttpResponseLog {
                status: status.as_u16(),
                headers,
                body: Some(String::from_utf8_lossy(&body).into_owned()),
            };
            http_logger::log_request(self.log_dir.as_deref(), log, Some(&response_log), elapsed, None);
        }

        debug!("POST {} -> {} in {}ms", path, status, elapsed);

        if !status.is_success() {
            let text = http_logger::truncate_utf8_safe(&String::from_utf8_lossy(&body), MAX_ERROR_BODY);
            return Err(UploadError::from_status(status.as_u16(), retry_after, &text));
        }
        Ok(body)
    }
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    file_id: &'a str,
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn init_upload(
        &self,
        token: &str,
        request: &InitUploadRequest,
    ) -> Result<InitReply, UploadError> {
        let body = self.post_json("/upload/init", token, request).await?;
        wire::decode_init_reply(&body)
    }

    async fn init_transfer(
        &self,
        token: &str,
        request: &TransferInitRequest,
    ) -> Result<ObjectTarget, UploadError> {
        let body = self.post_json("/upload/target", token, request).await?;
        wire::decode_target(&body)
    }

    async fn delete_object(&self, token: &str, object_id: &str) -> Result<(), UploadError> {
        let body = self
            .post_json("/files/delete", token, &DeleteRequest { file_id: object_id })
            .await?;
        wire::decode_ack(&body)
    }
}
