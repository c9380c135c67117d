//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Build revision
    pub version: &'static str,
    pub timestamp_ms: i64,
}

/// GET /health
///
/// - Healthy: 200 + {code: 0, data: {version, timestamp_ms}}
/// - Database unreachable: 503 + {code: 5001, msg: "unavailable"}
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    if let Some(db) = &state.pg_db {
        if let Err(e) = db.health_check().await {
            tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    code: error_codes::SERVICE_UNAVAILABLE,
                    msg: "unavailable".to_string(),
                    data: None,
                }),
            );
        }
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            version: env!("GIT_HASH"),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::memory_state;
    use super::*;

    #[tokio::test]
    async fn test_healthy_without_database() {
        let (status, Json(body)) = health_check(State(memory_state())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.code, error_codes::SUCCESS);
        assert!(body.data.unwrap().timestamp_ms > 0);
    }
}
