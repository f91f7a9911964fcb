//! Health check endpoint

use std::io;

use axum::{Json, Router, http::StatusCode, routing::get};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::net::TcpListener;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Everything but GET /health
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_check).fallback(not_found))
        .fallback(not_found)
}

/// Serves the health check on `listener` until the process ends.
pub async fn serve(listener: TcpListener) -> io::Result<()> {
    axum::serve(listener, router()).await
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    #[tokio::test]
    async fn health_reports_ok_with_a_timestamp() {
        let Json(health) = health_check().await;

        assert_eq!(health.status, "ok");
        assert!(DateTime::parse_from_rfc3339(&health.timestamp).is_ok());

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (status, body) = not_found().await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not Found");
    }
}
