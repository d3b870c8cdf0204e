// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::http::state::AppState;

/// Bearer/X-API-Key gate for the API routes, active when `ENABLE_AUTH` is
/// set. Config validation guarantees a key exists by the time this runs.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.cfg.http.api_key.as_deref() else {
        return next.run(req).await;
    };

    let provided = bearer_token(&req).or_else(|| header_key(&req));
    match provided {
        Some(key) if key == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": "error",
                "error": "missing or invalid API key",
            })),
        )
            .into_response(),
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn header_key(req: &Request) -> Option<&str> {
    req.headers().get("x-api-key")?.to_str().ok()
}
