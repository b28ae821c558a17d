//! How a client reaches a sync service: in process or over HTTP

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codesync_domain::{
    CheckRootRequest, CheckRootResponse, Phase1Request, Phase1Response, Phase2Request,
    Phase2Response, RegisterRequest, RegisterResponse, SearchRequest, SearchResponse,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::service::SyncService;

pub mod routes {
    pub const REGISTER: &str = "/v1/register";
    pub const CHECK: &str = "/v1/check";
    pub const PHASE1: &str = "/v1/sync/phase1";
    pub const PHASE2: &str = "/v1/sync/phase2";
    pub const SEARCH: &str = "/v1/search";
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
}

/// Error body returned by the HTTP API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub request_id: String,
}

impl ErrorBody {
    pub fn from_error(error: &SyncError, request_id: impl Into<String>) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            request_id: request_id.into(),
        }
    }
}

/// The protocol operations as seen by a client
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse>;

    async fn check_root(&self, request: CheckRootRequest) -> Result<CheckRootResponse>;

    async fn sync_phase1(&self, request: Phase1Request) -> Result<Phase1Response>;

    async fn sync_phase2(&self, request: Phase2Request) -> Result<Phase2Response>;

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse>;

    fn name(&self) -> &str;
}

/// Calls a [`SyncService`] living in the same process
pub struct LocalTransport {
    service: Arc<SyncService>,
    api_key: Option<String>,
}

impl LocalTransport {
    pub fn new(service: Arc<SyncService>, api_key: Option<String>) -> Self {
        Self { service, api_key }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        self.service.register(self.api_key.as_deref(), request).await
    }

    async fn check_root(&self, request: CheckRootRequest) -> Result<CheckRootResponse> {
        self.service.check_root(self.api_key.as_deref(), request).await
    }

    async fn sync_phase1(&self, request: Phase1Request) -> Result<Phase1Response> {
        self.service.sync_phase1(self.api_key.as_deref(), request).await
    }

    async fn sync_phase2(&self, request: Phase2Request) -> Result<Phase2Response> {
        self.service.sync_phase2(self.api_key.as_deref(), request).await
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.service.search(self.api_key.as_deref(), request).await
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// JSON over HTTP with bearer-token auth
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::configuration_error_with_source("server", e))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    async fn post<Req, Resp>(&self, route: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, route);
        debug!(%url, "POST");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::external_service_error_with_source(url.clone(), e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SyncError::external_service_error_with_source(url, e));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(match status.as_u16() {
            400 => SyncError::validation_error("request", message),
            401 | 403 => SyncError::authorization_error(message),
            _ => SyncError::external_service_error_with_source(
                url,
                anyhow::anyhow!("{status}: {message}"),
            ),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        self.post(routes::REGISTER, &request).await
    }

    async fn check_root(&self, request: CheckRootRequest) -> Result<CheckRootResponse> {
        self.post(routes::CHECK, &request).await
    }

    async fn sync_phase1(&self, request: Phase1Request) -> Result<Phase1Response> {
        self.post(routes::PHASE1, &request).await
    }

    async fn sync_phase2(&self, request: Phase2Request) -> Result<Phase2Response> {
        self.post(routes::PHASE2, &request).await
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.post(routes::SEARCH, &request).await
    }

    fn name(&self) -> &str {
        "http"
    }
}
