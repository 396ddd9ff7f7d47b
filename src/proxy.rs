use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::{
    accounting::{ActiveConnection, RequestRecord},
    classify::{classify, ContentKind},
    codec::{self, ROUTER_PATH},
    error::RouterError,
    headers::{apply_cors, forward_response_headers, CORS_MAX_AGE},
    relay::{relay, TransferContext},
    rewrite::{rewrite_or_passthrough, RewriteContext},
    shared::ProxyState,
    upstream::{ProxyRequest, UpstreamResponse},
};

const DEFAULT_LOG_LIMIT: usize = 50;
const DEFAULT_TEST_URL: &str = "https://example.com";

// Middleware to log API calls with their outcome
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    if path.starts_with("/api") {
        info!(
            "{} {} {} in {}ms",
            method,
            path,
            response.status().as_u16(),
            started.elapsed().as_millis()
        );
    }
    response
}

/// All routes served by the proxy.
pub fn build_router(state: ProxyState) -> Router {
    let body_limit = state.config.max_request_body_size;

    Router::new()
        .route(ROUTER_PATH, any(router_handler).options(router_preflight))
        .route("/api/request-logs", get(request_logs).delete(clear_request_logs))
        .route("/api/server-stats", get(server_stats))
        .route("/api/ping", get(ping))
        .route("/test", get(test_page))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct RouterParams {
    url: Option<String>,
}

async fn router_preflight() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    apply_cors(headers);
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE));
    response
}

/// Decode the `url` token into the target URL string.
fn decode_target(token: Option<&str>) -> Result<String, RouterError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(RouterError::MissingUrl)?;
    Ok(codec::decode(token)?)
}

async fn router_handler(
    State(state): State<ProxyState>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<RouterParams>,
    body: Bytes,
) -> Result<Response, RouterError> {
    let recorder = state.recorder();

    let request = decode_target(params.url.as_deref())
        .and_then(|target| {
            ProxyRequest::new(method.clone(), &target, headers.clone(), body)
                .ok_or(RouterError::InvalidTargetUrl { target_url: target })
        })
        .map_err(|err| {
            warn!(method = %method, error = %err, "Rejected router request");
            recorder.increment_error_count();
            err
        })?;

    recorder.increment_request_count();
    let connection = ActiveConnection::open(recorder.clone());
    let started = Instant::now();
    let target_url = request.target_url.clone();
    let url = target_url.to_string();

    info!(method = %method, url = %url, "Proxying request");

    let upstream = match state.upstream.fetch(request).await {
        Ok(upstream) => upstream,
        Err(err) => {
            recorder.increment_error_count();
            recorder.record_request(RequestRecord {
                method: method.to_string(),
                url,
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                size: 0,
                duration_ms: started.elapsed().as_millis() as u64,
            });
            return Err(err.into());
        }
    };

    let classification = classify(&upstream.headers, &target_url);
    debug!(url = %url, status = %upstream.status, kind = ?classification.kind, "Classified upstream response");

    let ctx = TransferContext {
        method: method.to_string(),
        url,
        started,
        recorder,
        connection,
    };

    if classification.kind != ContentKind::Html {
        return Ok(relay(upstream, &classification, ctx));
    }

    let proxy_origin = state.proxy_origin(&headers);
    serve_html(upstream, proxy_origin, ctx).await
}

/// Buffer, rewrite and send an HTML page.
async fn serve_html(
    upstream: UpstreamResponse,
    proxy_origin: String,
    ctx: TransferContext,
) -> Result<Response, RouterError> {
    let status = upstream.status;
    let mut headers = forward_response_headers(&upstream.headers, &ctx.url);
    let base = upstream.final_url.clone();

    let raw = match upstream.text().await {
        Ok(raw) => raw,
        Err(err) => {
            error!(url = %ctx.url, error = %err, "Failed reading upstream HTML");
            finish(&ctx, StatusCode::INTERNAL_SERVER_ERROR.as_u16(), 0, true);
            return Err(RouterError::StreamRead(err.message));
        }
    };

    let rewrite_ctx = RewriteContext::new(base, proxy_origin);
    let html = match tokio::task::spawn_blocking(move || rewrite_or_passthrough(&raw, &rewrite_ctx)).await {
        Ok(html) => html,
        Err(err) => {
            finish(&ctx, StatusCode::INTERNAL_SERVER_ERROR.as_u16(), 0, true);
            return Err(RouterError::Internal(err.to_string()));
        }
    };

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    apply_cors(&mut headers);

    let size = html.len() as u64;
    finish(&ctx, status.as_u16(), size, false);
    debug!(url = %ctx.url, size, "Served rewritten HTML");

    let mut response = Response::new(Body::from(html));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn finish(ctx: &TransferContext, status: u16, size: u64, failed: bool) {
    if failed {
        ctx.recorder.increment_error_count();
    }
    ctx.recorder.add_data_transferred(size);
    ctx.recorder.record_request(RequestRecord {
        method: ctx.method.clone(),
        url: ctx.url.clone(),
        status,
        size,
        duration_ms: ctx.started.elapsed().as_millis() as u64,
    });
}

#[derive(Debug, Deserialize)]
struct LogParams {
    limit: Option<usize>,
}

async fn request_logs(State(state): State<ProxyState>, Query(params): Query<LogParams>) -> impl IntoResponse {
    Json(state.store.logs(params.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

async fn clear_request_logs(State(state): State<ProxyState>) -> impl IntoResponse {
    state.store.clear_logs();
    Json(json!({ "message": "Request logs cleared successfully" }))
}

async fn server_stats(State(state): State<ProxyState>) -> impl IntoResponse {
    Json(state.store.stats())
}

async fn ping() -> impl IntoResponse {
    let started = Instant::now();
    sleep(Duration::from_millis(100)).await;
    let latency = started.elapsed().as_secs_f64() * 1000.0;
    Json(json!({ "message": "pong", "latency": format!("{:.2} ms", latency) }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Deserialize)]
struct TestParams {
    url: Option<String>,
}

// Page that loads a target through the router inside an iframe
async fn test_page(Query(params): Query<TestParams>) -> Html<String> {
    let target = params
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TEST_URL.to_string());
    let src = format!("{}?url={}", ROUTER_PATH, urlencoding::encode(&codec::token(&target)));

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Router Test</title>
  <style>
    body {{ font-family: Arial, sans-serif; margin: 20px; }}
    iframe {{ width: 100%; height: 600px; border: 1px solid #ccc; }}
  </style>
</head>
<body>
  <h1>HTTP Router Server Test</h1>
  <p>Target URL: <strong>{}</strong></p>
  <iframe src="{}"></iframe>
</body>
</html>
"#,
        escape_html(&target),
        escape_html(&src)
    ))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
