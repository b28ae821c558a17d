use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use codesync_domain::{
    CheckRootRequest, CheckRootResponse, Phase1Request, Phase1Response, Phase2Request,
    Phase2Response, RegisterRequest, RegisterResponse, SearchRequest, SearchResponse,
};
use codesync_engine::transport::{ErrorBody, routes};
use codesync_engine::{Result as SyncResult, SyncError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

use super::state::AppState;
use super::types::{ApiError, HealthResponse};

pub fn router(state: AppState) -> Router {
    let body_limit = state.service.max_request_bytes();
    Router::new()
        .route(routes::HEALTH, get(health_handler))
        .route(routes::METRICS, get(metrics_handler))
        .route(routes::REGISTER, post(register_handler))
        .route(routes::CHECK, post(check_handler))
        .route(routes::PHASE1, post(phase1_handler))
        .route(routes::PHASE2, post(phase2_handler))
        .route(routes::SEARCH, post(search_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Malformed or oversized bodies get the same error shape as service errors
fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> SyncResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| SyncError::validation_error("body", rejection.body_text()))
}

/// Record the outcome of a request and turn errors into JSON bodies
fn respond<T>(route: &'static str, result: SyncResult<T>) -> Result<Json<T>, ApiError> {
    match result {
        Ok(body) => {
            metrics::counter!("codesync_http_requests_total", "route" => route, "status" => "200")
                .increment(1);
            Ok(Json(body))
        }
        Err(e) => {
            let request_id = Uuid::new_v4().to_string();
            let status = StatusCode::from_u16(e.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            metrics::counter!(
                "codesync_http_requests_total",
                "route" => route,
                "status" => status.as_u16().to_string()
            )
            .increment(1);
            log_failure(route, &request_id, &e);
            Err((status, Json(ErrorBody::from_error(&e, request_id))))
        }
    }
}

fn log_failure(route: &str, request_id: &str, e: &SyncError) {
    if e.http_status_code() >= 500 {
        error!(route, request_id, code = e.error_code(), error = %e, "Request failed");
    } else {
        warn!(route, request_id, code = e.error_code(), error = %e, "Request rejected");
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        deriver: state.service.deriver_name().to_string(),
        index: state.service.index_name().to_string(),
        store: state.service.cache().store_name().to_string(),
    })
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let result = match parse_body(payload) {
        Ok(req) => state.service.register(bearer_token(&headers), req).await,
        Err(e) => Err(e),
    };
    respond(routes::REGISTER, result)
}

pub async fn check_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CheckRootRequest>, JsonRejection>,
) -> Result<Json<CheckRootResponse>, ApiError> {
    let result = match parse_body(payload) {
        Ok(req) => state.service.check_root(bearer_token(&headers), req).await,
        Err(e) => Err(e),
    };
    respond(routes::CHECK, result)
}

pub async fn phase1_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Phase1Request>, JsonRejection>,
) -> Result<Json<Phase1Response>, ApiError> {
    let result = match parse_body(payload) {
        Ok(req) => state.service.sync_phase1(bearer_token(&headers), req).await,
        Err(e) => Err(e),
    };
    respond(routes::PHASE1, result)
}

pub async fn phase2_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Phase2Request>, JsonRejection>,
) -> Result<Json<Phase2Response>, ApiError> {
    let result = match parse_body(payload) {
        Ok(req) => state.service.sync_phase2(bearer_token(&headers), req).await,
        Err(e) => Err(e),
    };
    respond(routes::PHASE2, result)
}

pub async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let result = match parse_body(payload) {
        Ok(req) => state.service.search(bearer_token(&headers), req).await,
        Err(e) => Err(e),
    };
    respond(routes::SEARCH, result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{HeaderValue, Request};
    use codesync_domain::{DEFAULT_MAX_REQUEST_BYTES, SyncStatus};
    use codesync_engine::settings::MIN_REQUEST_BYTES;
    use codesync_engine::{ClientConfig, HttpTransport, ServerSettings, SyncClient, SyncMode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    use super::*;

    async fn fixture_state(max_request_bytes: usize) -> AppState {
        let mut settings = ServerSettings::default();
        settings.protocol.max_request_bytes = max_request_bytes;
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        AppState::from_settings(&settings, metrics).await.unwrap()
    }

    /// A function of roughly a thousand characters that segments to one chunk
    fn large_function(i: usize) -> String {
        let body: String = (0..40).map(|j| format!("    let v{j} = {j} * {i};\n")).collect();
        format!("pub fn f{i}() -> u64 {{\n{body}    0\n}}\n")
    }

    #[test]
    fn test_bearer_token() {
        let mut fixture = HeaderMap::new();
        assert_eq!(bearer_token(&fixture), None);

        fixture.insert(AUTHORIZATION, HeaderValue::from_static("Bearer key-a"));
        assert_eq!(bearer_token(&fixture), Some("key-a"));

        fixture.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&fixture), None);
    }

    #[test]
    fn test_error_maps_to_status() {
        let actual = respond::<()>("/t", Err(SyncError::authorization_error("tenant b"))).unwrap_err();

        assert_eq!(actual.0, StatusCode::FORBIDDEN);
        assert_eq!(actual.1.code, "AUTHORIZATION_ERROR");
    }

    #[tokio::test]
    async fn test_malformed_body_gets_error_body() {
        let fixture = router(fixture_state(DEFAULT_MAX_REQUEST_BYTES).await);
        let request = Request::post(routes::REGISTER)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = fixture.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let actual: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(actual.code, "VALIDATION_ERROR");
        assert!(!actual.retryable);
    }

    #[tokio::test]
    async fn test_body_over_limit_gets_error_body() {
        let fixture = router(fixture_state(MIN_REQUEST_BYTES).await);
        let request = Request::post(routes::SEARCH)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(format!("{{\"query\": \"{}\"}}", "x".repeat(MIN_REQUEST_BYTES))))
            .unwrap();

        let response = fixture.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let actual: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(actual.code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_large_project_syncs_over_http() {
        let state = fixture_state(MIN_REQUEST_BYTES).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });

        let project = tempfile::tempdir().unwrap();
        for i in 0..80 {
            std::fs::write(project.path().join(format!("f{i}.rs")), large_function(i)).unwrap();
        }
        let transport =
            HttpTransport::new(&format!("http://{addr}"), None, Duration::from_secs(30)).unwrap();
        let mut config = ClientConfig::new("A", "big", project.path());
        config.max_request_bytes = MIN_REQUEST_BYTES;
        let mut client = SyncClient::new(config, Arc::new(transport));

        let actual = client.sync().await.unwrap();

        assert_eq!(actual.mode, SyncMode::Registered);
        assert_eq!(actual.status, SyncStatus::Success);
        assert!(actual.chunks >= 80);
        assert_eq!(actual.stored, actual.chunks);
        assert!(actual.is_complete());
    }
}
