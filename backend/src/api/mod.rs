//! HTTP surface: router, middleware and error mapping.

pub mod auth;
pub mod handlers;
pub mod idempotency;
pub mod ratelimit;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::error::AppError;
use crate::metrics::counters::Counters;
use crate::runtime::Runtime;

use idempotency::{IdempotencyCache, Lookup};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "error": self.code(),
            "detail": self.to_string(),
        });
        if let AppError::RateLimited { retry_after_sec } = &self {
            body["retry_after_sec"] = (*retry_after_sec).into();
        }

        (status, Json(body)).into_response()
    }
}

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs/create", post(handlers::create_job))
        .route("/jobs/accept", post(handlers::accept_job))
        .route("/jobs/reject", post(handlers::reject_job))
        .route("/jobs/complete", post(handlers::complete_job))
        .route("/captains/online", post(handlers::captain_online))
        .route("/captains/location", post(handlers::captain_location))
        .route("/captains/go-home", post(handlers::captain_go_home))
        .route("/cancel/policy", get(handlers::cancel_policy))
        .route("/cancel/order", post(handlers::cancel_order))
        .route("/cancel/ride", post(handlers::cancel_ride))
        .route("/pricing/calculate", post(handlers::pricing_calculate))
        .route("/rides/fare", post(handlers::rides_fare))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&runtime),
            idempotency_mw,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&runtime),
            rate_limit_mw,
        ))
        .with_state(runtime)
}

pub async fn serve(runtime: Arc<Runtime>, addr: &str) -> anyhow::Result<()> {
    let app = router(runtime);
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "http listener bound");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

async fn rate_limit_mw(
    State(runtime): State<Arc<Runtime>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(request.headers(), &addr);
    if let Err(e) =
        runtime
            .ratelimiter
            .check(&ip, request.method().as_str(), request.uri().path())
    {
        Counters::bump(&runtime.counters.rate_limited);
        return Err(e);
    }
    Ok(next.run(request).await)
}

/// Replays stored responses for POSTs carrying an `Idempotency-Key`.
async fn idempotency_mw(
    State(runtime): State<Arc<Runtime>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if request.method() != Method::POST {
        return Ok(next.run(request).await);
    }
    let Some(idem_key) = request
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return Ok(next.run(request).await);
    };

    let bearer = auth::bearer_token(request.headers()).map(str::to_string);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, 1 << 20)
        .await
        .map_err(|e| AppError::Validation(format!("unreadable body: {e}")))?;

    let request_hash = IdempotencyCache::body_hash(&bytes);
    let key = IdempotencyCache::cache_key(&method, &path, bearer.as_deref(), &idem_key);

    if let Lookup::Replay(stored) = runtime.idempotency.lookup(&key, &request_hash)? {
        Counters::bump(&runtime.counters.idempotent_replays);

        let mut response = Response::builder()
            .status(StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK))
            .header("idempotency-replay", "true");
        if let Some(ct) = &stored.content_type {
            response = response.header(header::CONTENT_TYPE, ct);
        }
        return response
            .body(Body::from(stored.body))
            .map_err(|e| AppError::Dependency(format!("replay build: {e}")));
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let status = response.status().as_u16();
    if !(200..=202).contains(&status) {
        return Ok(response);
    }

    // Buffer the successful response so later retries replay it.
    let (rparts, rbody) = response.into_parts();
    let rbytes = axum::body::to_bytes(rbody, 1 << 20)
        .await
        .map_err(|e| AppError::Dependency(format!("response buffer: {e}")))?;

    let content_type = rparts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    runtime
        .idempotency
        .store(key, request_hash, status, content_type, rbytes.to_vec());

    Ok(Response::from_parts(rparts, Body::from(rbytes)))
}
