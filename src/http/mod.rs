// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod handlers;
pub mod state;

use crate::{error::CollectorError, http::state::AppState};

/// Builds the full collector router. API routes sit behind the optional
/// API-key gate; `/` and `/health` stay open for probes.
pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/api/v2/mikrotik/ping", post(handlers::ping_targets))
        .route("/api/v2/mikrotik/command", post(handlers::execute_command))
        .route("/api/v2/mikrotik/batch", post(handlers::execute_batch))
        .route(
            "/api/v2/mikrotik/multi-host",
            post(handlers::execute_multi_host),
        )
        .route("/api/v2/test-connection", post(handlers::test_connection))
        .route("/api/v2/stats", get(handlers::get_stats))
        .route("/api/v2/cache/clear", post(handlers::clear_cache));

    if state.cfg.http.enable_auth {
        api = api.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));
    }

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Keeps the active-request gauge, the peak watermark and the rolling
/// response-time mean current for every request.
async fn track_requests(
    axum::extract::State(state): axum::extract::State<AppState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state.stats.request_started();
    let started = tokio::time::Instant::now();
    let response = next.run(req).await;
    let success = response.status().is_success();
    state.stats.request_finished(started.elapsed(), success);
    response
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::Device(_) | Self::Wire(_) => {
                StatusCode::BAD_GATEWAY
            },
            Self::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Busy => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) | Self::Canceled => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let retry_after_seconds = match &self {
            Self::Busy | Self::PoolExhausted(_) => Some(5),
            Self::Timeout(_) => Some(30),
            _ => None,
        };

        let mut body = json!({
            "status": "error",
            "error": self.to_string(),
            "error_kind": self.kind(),
            "retryable": self.is_retryable(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let (Some(secs), Some(obj)) = (retry_after_seconds, body.as_object_mut())
        {
            obj.insert("retry_after_seconds".to_string(), json!(secs));
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after_seconds
            && let Ok(value) = secs.to_string().parse()
        {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }
        response
    }
}
