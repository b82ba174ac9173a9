use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::jobs::JobStats;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    store: StoreHealth,
    jobs: JobStats,
}

#[derive(Serialize)]
pub struct StoreHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Returns 200 OK if the job store answers within 5s, 503 Service Unavailable otherwise.
/// The body also carries this process's enqueue counters.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let store_health =
        match tokio::time::timeout(Duration::from_secs(5), state.job_store.ping()).await {
            Ok(Ok(())) => StoreHealth {
                status: "ok".to_string(),
                error: None,
            },
            Ok(Err(e)) => StoreHealth {
                status: "error".to_string(),
                error: Some(format!("Query failed: {}", e)),
            },
            Err(_) => StoreHealth {
                status: "error".to_string(),
                error: Some("Query timeout (>5s)".to_string()),
            },
        };

    let is_healthy = store_health.status == "ok";

    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            store: store_health,
            jobs: state.job_store.stats(),
        }),
    )
}
