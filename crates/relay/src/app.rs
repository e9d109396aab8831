use std::{future::Future, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::admin;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ErrorCode, RelayError, REQUEST_ID_HEADER,
};
use crate::hub::CollabHub;
use crate::ot::OtEngine;
use crate::ws;

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(hub: CollabHub, engine: Arc<dyn OtEngine>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(hub.clone(), engine))
            .merge(admin::router(hub))
            .fallback(not_found),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

/// Serves `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited unexpectedly")
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn not_found() -> RelayError {
    RelayError::from_code(ErrorCode::NotFound)
}

async fn panic_handler(mut request: Request<Body>, next: Next) -> Response {
    // Pin the id on the request so the inner context middleware reuses it.
    let request_id = request_id_from_headers_or_generate(request.headers());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(request_id = %request_id, ?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError)
                .with_request_id(request_id)
                .into_response()
        }
    }
}

/// Replaces axum's plain-text body limit rejection with the JSON envelope.
fn structured_payload_too_large(response: Response, request_id: &str) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return response;
    }
    RelayError::from_code(ErrorCode::PayloadTooLarge).with_request_id(request_id).into_response()
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    let mut response = structured_payload_too_large(response, &request_id);
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
