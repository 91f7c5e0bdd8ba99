//! HTTP API integration tests
//!
//! Requests go through the full router with the in-memory store; the
//! analytics service is mocked with wiremock.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xuangu_common::Config;
use xuangu_screener::store::InMemoryStore;
use xuangu_screener::{build_router, ScreenerState};

// ============================================================================
// Helpers
// ============================================================================

fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.seed_set("factor:ROE_大于20", ["600519", "000858"]);
    store.seed_set("factor:市盈率_20~30", ["600519"]);
    store.seed_set("theme:白酒", ["600519", "000858"]);
    store.seed_set("zhibiao:龙头", ["600519"]);
    store.seed_hash("code:600519", [("股票简称", "贵州茅台"), ("ROE", "30.456")]);
    store.seed_hash("code:000858", [("股票简称", "五粮液"), ("ROE", "25")]);
    store.seed_hash(
        "theme:detail:白酒:600519",
        [("desc", "高端白酒"), ("theme", "白酒"), ("name", "贵州茅台"), ("hot_num", "900")],
    );
    store
}

fn app_with(config: Config, store: Arc<InMemoryStore>) -> Router {
    build_router(Arc::new(ScreenerState::new(config, store)))
}

fn app() -> Router {
    app_with(Config::default(), seeded_store())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ============================================================================
// Screening endpoints
// ============================================================================

#[tokio::test]
async fn test_health() {
    let (status, body) = send(app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "xuangu-screener");
}

#[tokio::test]
async fn test_filter_factors() {
    let (status, body) = send(
        app(),
        post_json("/stock/filter/factors", json!({"factors": ["ROE_大于20", "市盈率_20~30"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    assert_eq!(body["data"]["600519"]["股票简称"], "贵州茅台");
    assert_eq!(body["data"]["600519"]["ROE"], 30.46);
    assert!(body["data"].get("000858").is_none());
}

#[tokio::test]
async fn test_filter_factors_missing_list_is_empty() {
    let (status, body) = send(app(), post_json("/stock/filter/factors", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 200, "data": {}}));
}

#[tokio::test]
async fn test_filter_themes_and_theme_list() {
    let (status, body) =
        send(app(), post_json("/stock/filter/themes", json!({"themes": ["白酒"]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["600519"]["题材描述"], "高端白酒");
    assert_eq!(body["data"]["000858"], json!({}));

    let (status, body) = send(app(), get("/theme/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["themes"],
        json!([{"name": "白酒", "stock_count": 1, "max_hot_num": 900, "total_hot_num": 900}])
    );
}

#[tokio::test]
async fn test_filter_themes_and_factors() {
    let (status, body) = send(
        app(),
        post_json(
            "/stock/filter/themes-and-factors",
            json!({"themes": ["白酒"], "factors": ["ROE_大于20"]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["600519"]["主题"], "白酒");
    assert_eq!(body["data"]["000858"]["ROE"], 25.0);
}

#[tokio::test]
async fn test_indicator_endpoints() {
    let (status, body) =
        send(app(), post_json("/stock/filter/zhibiao", json!({"zhibiao": "龙头"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["600519"]["股票代码"], "600519");

    let (status, body) = send(
        app(),
        post_json(
            "/stock/filter/themes-factors-zhibiao",
            json!({"zhibiao": "龙头", "themes": ["白酒"], "factors": null}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["600519"]["题材"], "白酒");
    assert_eq!(body["data"]["600519"]["特色指标"], "龙头");
}

#[tokio::test]
async fn test_indicator_required() {
    for uri in ["/stock/filter/zhibiao", "/stock/filter/themes-factors-zhibiao"] {
        let (status, body) = send(app(), post_json(uri, json!({"themes": ["白酒"]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["code"], 400);
        assert_eq!(body["error"], "特色指标名称不能为空");
    }
}

#[tokio::test]
async fn test_store_outage_returns_empty_data() {
    let store = seeded_store();
    store.fail_with(xuangu_screener::store::StoreError::Connection("refused".into()));

    let (status, body) = send(
        app_with(Config::default(), store),
        post_json("/stock/filter/factors", json!({"factors": ["ROE_大于20"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 200, "data": {}}));
}

// ============================================================================
// Detail passthrough
// ============================================================================

async fn detail_app(server: &MockServer) -> Router {
    let mut config = Config::default();
    config.detail.base_url = server.uri();
    config.detail.timeout_secs = 2;
    app_with(config, seeded_store())
}

#[tokio::test]
async fn test_detail_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-stock-analysis"))
        .and(query_param("stock_code", "600519"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"score": 87, "summary": "稳健"})))
        .mount(&server)
        .await;

    let (status, body) = send(
        detail_app(&server).await,
        post_json("/stock/filter/detail", json!({"code": "600519"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 200, "data": {"score": 87, "summary": "稳健"}}));
}

#[tokio::test]
async fn test_detail_error_body_is_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-stock-analysis"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"error": true, "message": "暂无数据"})),
        )
        .mount(&server)
        .await;

    let (status, body) = send(
        detail_app(&server).await,
        post_json("/stock/filter/detail", json!({"code": "000000"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"code": 400, "error": "暂无数据"}));
}

#[tokio::test]
async fn test_detail_upstream_failure_is_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-stock-analysis"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (status, body) = send(
        detail_app(&server).await,
        post_json("/stock/filter/detail", json!({"code": "600519"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "获取股票600519详情失败，请稍后再试");

    let (status, _) = send(
        detail_app(&server).await,
        post_json("/stock/filter/detail", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_slow_request_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-stock-analysis"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"score": 1}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.detail.base_url = server.uri();
    config.detail.timeout_secs = 10;
    config.server.request_timeout_secs = 1;

    let (status, _) = send(
        app_with(config, seeded_store()),
        post_json("/stock/filter/detail", json!({"code": "600519"})),
    )
    .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
}

// ============================================================================
// Session gate
// ============================================================================

fn gated_app() -> Router {
    let store = seeded_store();
    store.seed_hash(
        "session:good",
        [
            ("user_id", "1"),
            ("username", "analyst"),
            ("roles", r#"["user"]"#),
            ("permissions", r#"["stock:fliter"]"#),
            ("expire_time", "2999-01-01T00:00:00"),
        ],
    );
    store.seed_hash(
        "session:viewer",
        [
            ("user_id", "2"),
            ("username", "viewer"),
            ("permissions", r#"["report:view"]"#),
            ("expire_time", "2999-01-01T00:00:00"),
        ],
    );

    let mut config = Config::default();
    config.auth.require_session = true;
    app_with(config, store)
}

fn with_token(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

#[tokio::test]
async fn test_session_gate() {
    let (status, body) = send(gated_app(), get("/theme/list")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    let (status, _) = send(gated_app(), with_token(get("/theme/list"), "unknown")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(gated_app(), with_token(get("/theme/list"), "viewer")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);

    let (status, _) = send(gated_app(), with_token(get("/theme/list"), "good")).await;
    assert_eq!(status, StatusCode::OK);

    // Health stays open.
    let (status, _) = send(gated_app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}
