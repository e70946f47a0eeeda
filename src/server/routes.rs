use std::time::Instant;

use chrono::{DateTime, Utc};

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::BrokerError;
use crate::manager::lifecycle::{DependencyHealth, TokenInfo};
use crate::query::forwarder::BatchStatus;
use crate::server::models::{
    ApiResponse, BatchQueryRequest, CaseQueryRequest, LoyaltyQueryRequest, QueryRequest, ResponseStatus,
    UserProfileRequest,
};
use crate::server::server::AppState;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when a token endpoint cannot be reached
    pub status: &'static str,
    pub version: &'static str,
    pub tokens: TokenInfo,
    pub dependencies: DependencyHealth,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
}

/// `/health` and `/status` plus the `/api/v1` routes, the latter behind the
/// API key check.
pub fn router(state: &AppState) -> Router<AppState> {
    let api = Router::new()
        .route("/query", post(execute_query))
        .route("/query/batch", post(execute_batch))
        .route("/metadata", get(list_objects))
        .route("/metadata/{object}", get(object_metadata))
        .route("/connection", get(test_connection))
        .route("/user-profile", post(user_profile))
        .route("/cases", post(user_cases))
        .route("/loyalty", post(loyalty_info))
        .route("/auth/invalidate", post(invalidate_tokens))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .nest("/api/v1", api)
        .layer(middleware::from_fn(echo_correlation_id))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let manager = &state.context.manager;
    let dependencies = manager.check_dependencies().await;
    Json(HealthResponse {
        status: if dependencies.all_healthy() { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        tokens: manager.get_token_info().await,
        dependencies,
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "operational",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        environment: state.context.config.settings.environment.clone(),
    })
}

async fn execute_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    let start = Instant::now();
    let correlation_id = request.correlation_id.clone().or_else(|| correlation_id(&headers));

    if let Err(e) = request.validate() {
        return failure(&e, correlation_id, start);
    }

    match state.context.forwarder.execute_query(&request.effective_query()).await {
        Ok(result) => {
            info!(correlation_id = ?correlation_id, records = result.records.len(), "query served");
            success(ApiResponse::success(result, correlation_id, elapsed_ms(start)))
        }
        Err(e) => failure(&e, correlation_id, start),
    }
}

async fn execute_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchQueryRequest>,
) -> Response {
    let start = Instant::now();
    let correlation_id = request.correlation_id.clone().or_else(|| correlation_id(&headers));

    if let Err(e) = request.validate(state.context.config.query.max_batch_size) {
        return failure(&e, correlation_id, start);
    }

    let queries: Vec<String> = request.queries.iter().map(QueryRequest::effective_query).collect();
    let batch = state.context.forwarder.execute_batch(&queries).await;
    let status = match batch.status {
        BatchStatus::Success => ResponseStatus::Success,
        BatchStatus::Partial => ResponseStatus::Partial,
        BatchStatus::Error => ResponseStatus::Error,
    };
    success(ApiResponse::with_status(status, batch, correlation_id, elapsed_ms(start)))
}

async fn list_objects(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let start = Instant::now();
    let correlation_id = correlation_id(&headers);
    match state.context.forwarder.list_objects().await {
        Ok(objects) => success(ApiResponse::success(objects, correlation_id, elapsed_ms(start))),
        Err(e) => failure(&e, correlation_id, start),
    }
}

async fn object_metadata(
    State(state): State<AppState>,
    Path(object): Path<String>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let correlation_id = correlation_id(&headers);
    match state.context.forwarder.get_object_metadata(&object).await {
        Ok(metadata) => success(ApiResponse::success(metadata, correlation_id, elapsed_ms(start))),
        Err(e) => failure(&e, correlation_id, start),
    }
}

async fn test_connection(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let start = Instant::now();
    let connection = state.context.forwarder.test_connection().await;
    let status = if connection.success {
        ResponseStatus::Success
    } else {
        ResponseStatus::Error
    };
    success(ApiResponse::with_status(status, connection, correlation_id(&headers), elapsed_ms(start)))
}

async fn user_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UserProfileRequest>,
) -> Response {
    let start = Instant::now();
    let correlation_id = request.correlation_id.clone().or_else(|| correlation_id(&headers));
    if let Err(e) = request.validate() {
        return failure(&e, correlation_id, start);
    }
    match state
        .context
        .forwarder
        .get_user_profile(&request.email, request.include_related_data)
        .await
    {
        Ok(profile) => success(ApiResponse::success(profile, correlation_id, elapsed_ms(start))),
        Err(e) => failure(&e, correlation_id, start),
    }
}

async fn user_cases(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CaseQueryRequest>,
) -> Response {
    let start = Instant::now();
    let correlation_id = request.correlation_id.clone().or_else(|| correlation_id(&headers));
    if let Err(e) = request.validate() {
        return failure(&e, correlation_id, start);
    }
    let result = state
        .context
        .forwarder
        .get_user_cases(
            &request.email,
            request.status_filter.as_deref(),
            request.limit,
            request.include_case_details,
        )
        .await;
    match result {
        Ok(cases) => success(ApiResponse::success(cases, correlation_id, elapsed_ms(start))),
        Err(e) => failure(&e, correlation_id, start),
    }
}

async fn loyalty_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoyaltyQueryRequest>,
) -> Response {
    let start = Instant::now();
    let correlation_id = request.correlation_id.clone().or_else(|| correlation_id(&headers));
    if let Err(e) = request.validate() {
        return failure(&e, correlation_id, start);
    }
    match state
        .context
        .forwarder
        .get_loyalty_info(&request.email, request.include_transaction_history)
        .await
    {
        Ok(loyalty) => success(ApiResponse::success(loyalty, correlation_id, elapsed_ms(start))),
        Err(e) => failure(&e, correlation_id, start),
    }
}

async fn invalidate_tokens(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let start = Instant::now();
    state.context.manager.invalidate_all().await;
    let body = json!({ "message": "authentication tokens cleared" });
    success(ApiResponse::success(body, correlation_id(&headers), elapsed_ms(start)))
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let security = &state.context.config.security;
    if !security.enable_api_key_validation {
        return next.run(request).await;
    }

    let rejection = match request
        .headers()
        .get(security.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
    {
        None => Some("API key is required"),
        Some(key) if !security.allowed_api_keys.iter().any(|k| k == key) => Some("Invalid API key"),
        Some(_) => None,
    };
    let Some(message) = rejection else {
        return next.run(request).await;
    };

    warn!(path = %request.uri().path(), "{}", message);
    (StatusCode::UNAUTHORIZED, Json(json!({ "status": "error", "message": message }))).into_response()
}

async fn echo_correlation_id(request: Request, next: Next) -> Response {
    let incoming = request.headers().get(CORRELATION_ID_HEADER).cloned();
    let mut response = next.run(request).await;
    if let Some(value) = incoming {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// HTTP status for an error leaving the broker.
pub fn status_for(err: &BrokerError) -> StatusCode {
    match err {
        BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
        BrokerError::Configuration(_) | BrokerError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BrokerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BrokerError::Query { status_code, .. } => match *status_code {
            400 => StatusCode::BAD_REQUEST,
            404 => StatusCode::NOT_FOUND,
            429 => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        },
        BrokerError::AuthExchange { .. }
        | BrokerError::InvalidResponse { .. }
        | BrokerError::Transport { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn correlation_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn success<T: Serialize>(body: ApiResponse<T>) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn failure(err: &BrokerError, correlation_id: Option<String>, start: Instant) -> Response {
    warn!(correlation_id = ?correlation_id, code = ?err.error_code(), "request failed: {}", err);
    (status_for(err), Json(ApiResponse::error(err, correlation_id, elapsed_ms(start)))).into_response()
}
