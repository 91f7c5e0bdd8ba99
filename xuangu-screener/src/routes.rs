//! HTTP routes for the screening service.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use xuangu_common::logging::generate_trace_id;

use crate::auth::session_middleware;
use crate::error::ScreenerError;
use crate::query::RecordSet;
use crate::themes::ThemeStats;
use crate::ScreenerState;

// ============================================================================
// Request Types
// ============================================================================

/// Accepts a missing, `null` or array value.
fn list_or_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
pub struct FactorsRequest {
    #[serde(default, deserialize_with = "list_or_empty")]
    pub factors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThemesRequest {
    #[serde(default, deserialize_with = "list_or_empty")]
    pub themes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThemesFactorsRequest {
    #[serde(default, deserialize_with = "list_or_empty")]
    pub themes: Vec<String>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub factors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndicatorRequest {
    #[serde(default)]
    pub zhibiao: Option<String>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub themes: Vec<String>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub factors: Vec<String>,
}

impl IndicatorRequest {
    fn indicator(&self) -> Result<&str, ScreenerError> {
        self.zhibiao
            .as_deref()
            .map(str::trim)
            .filter(|z| !z.is_empty())
            .ok_or_else(|| ScreenerError::BadRequest("特色指标名称不能为空".into()))
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct ScreenResponse<T> {
    pub code: u16,
    pub data: T,
}

impl<T> ScreenResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { code: 200, data })
    }
}

#[derive(Debug, Serialize)]
pub struct ThemeListResponse {
    pub themes: Vec<ThemeStats>,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "服务正常运行".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "xuangu-screener".to_string(),
    })
}

pub async fn filter_factors(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<FactorsRequest>,
) -> Json<ScreenResponse<RecordSet>> {
    ScreenResponse::ok(state.engine.query_by_factors(&request.factors).await)
}

pub async fn list_themes(State(state): State<Arc<ScreenerState>>) -> Json<ThemeListResponse> {
    Json(ThemeListResponse {
        themes: state.themes.list_themes().await,
    })
}

pub async fn filter_themes(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<ThemesRequest>,
) -> Json<ScreenResponse<RecordSet>> {
    ScreenResponse::ok(state.engine.query_by_themes(&request.themes).await)
}

pub async fn filter_themes_and_factors(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<ThemesFactorsRequest>,
) -> Json<ScreenResponse<RecordSet>> {
    ScreenResponse::ok(
        state
            .engine
            .query_by_themes_and_factors(&request.themes, &request.factors)
            .await,
    )
}

/// Per-stock analysis, passed through from the analytics service.
pub async fn stock_detail(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<DetailRequest>,
) -> Result<Json<ScreenResponse<Value>>, ScreenerError> {
    let code = request
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ScreenerError::BadRequest("股票代码不能为空".into()))?;

    let failed = || ScreenerError::BadRequest(format!("获取股票{code}详情失败，请稍后再试"));

    let detail = state.detail.fetch_detail(code).await.ok_or_else(failed)?;
    if let Some(error) = detail.get("error").filter(|e| is_truthy(e)) {
        let message = detail
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| failed().to_string());
        tracing::debug!(code = %code, error = %error, "Analytics service reported an error");
        return Err(ScreenerError::BadRequest(message));
    }
    if !is_truthy(&detail) {
        return Err(failed());
    }

    Ok(ScreenResponse::ok(detail))
}

pub async fn filter_indicator(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<IndicatorRequest>,
) -> Result<Json<ScreenResponse<RecordSet>>, ScreenerError> {
    let indicator = request.indicator()?;
    Ok(ScreenResponse::ok(
        state.engine.query_indicator_only(indicator).await,
    ))
}

pub async fn filter_indicator_themes_factors(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<IndicatorRequest>,
) -> Result<Json<ScreenResponse<RecordSet>>, ScreenerError> {
    let indicator = request.indicator()?;
    Ok(ScreenResponse::ok(
        state
            .engine
            .query_by_indicator_themes_factors(indicator, &request.themes, &request.factors)
            .await,
    ))
}

/// JSON truthiness: null, false, 0, "" and empty containers are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the service router with all routes and middleware.
pub fn build_router(state: Arc<ScreenerState>) -> Router {
    let server = &state.config.server;

    let mut screening = Router::new()
        .route("/stock/filter/factors", post(filter_factors))
        .route("/theme/list", get(list_themes))
        .route("/stock/filter/themes", post(filter_themes))
        .route("/stock/filter/themes-and-factors", post(filter_themes_and_factors))
        .route("/stock/filter/detail", post(stock_detail))
        .route("/stock/filter/zhibiao", post(filter_indicator))
        .route(
            "/stock/filter/themes-factors-zhibiao",
            post(filter_indicator_themes_factors),
        );

    if state.config.auth.require_session {
        screening = screening.route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.sessions),
            session_middleware,
        ));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        tracing::info_span!(
            "http",
            method = %request.method(),
            uri = %request.uri(),
            trace_id = %generate_trace_id(),
        )
    });

    Router::new()
        .route("/health", get(health))
        .merge(screening)
        .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.request_timeout_secs),
        ))
        .layer(trace)
        .layer(cors)
        .with_state(Arc::clone(&state))
}
