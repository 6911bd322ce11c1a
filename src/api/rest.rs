// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are public: the core ingests and
// derives analytics over public market data only (spec §1 Non-goals), so
// there is nothing here worth gating behind a token.
//
// CORS is configured permissively, matching the teacher's development
// posture.
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app::EngineState;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<EngineState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/symbols/:symbol", get(symbol_snapshot))
        .route("/api/v1/filters/:class", get(filter_cache))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connection: String,
    healthy: bool,
    server_time: i64,
}

async fn health(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connection: state.status().to_string(),
        healthy: state.orchestrator.is_healthy(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    Json(state.snapshot())
}

async fn symbol_snapshot(
    State(state): State<Arc<EngineState>>,
    axum::extract::Path(symbol): axum::extract::Path<String>,
) -> impl IntoResponse {
    match state.analytics.symbol_snapshot(&symbol.to_uppercase()) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => {
            let body = serde_json::json!({ "symbol": symbol, "message": "no analytics yet" });
            (axum::http::StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}

async fn filter_cache(
    State(state): State<Arc<EngineState>>,
    axum::extract::Path(class): axum::extract::Path<String>,
) -> impl IntoResponse {
    let parsed = match class.as_str() {
        "30k" => Some(crate::model::FilterClass::T30k),
        "50k" => Some(crate::model::FilterClass::T50k),
        "100k" => Some(crate::model::FilterClass::T100k),
        "300k" => Some(crate::model::FilterClass::T300k),
        "500k" => Some(crate::model::FilterClass::T500k),
        "1M" => Some(crate::model::FilterClass::T1m),
        "5M" => Some(crate::model::FilterClass::T5m),
        "10M" => Some(crate::model::FilterClass::T10m),
        _ => None,
    };
    match parsed {
        Some(class) => Json(state.repository.filter_cache_snapshot(class)).into_response(),
        None => {
            let body = serde_json::json!({ "error": format!("unknown filter class '{class}'") });
            (axum::http::StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
    }
}
