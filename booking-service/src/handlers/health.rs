use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe. Reports the database when one is configured.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let Some(db) = &state.database else {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "booking-service",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "memory"
            })),
        );
    };

    match db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "booking-service",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "postgres"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "booking-service",
                "error": e.to_string()
            })),
        ),
    }
}

pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match &state.database {
        Some(db) => match db.health_check().await {
            Ok(_) => StatusCode::OK,
            Err(_) => StatusCode::SERVICE_UNAVAILABLE,
        },
        None => StatusCode::OK,
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
