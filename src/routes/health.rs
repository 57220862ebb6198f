use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::classifier::ProviderStatus;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub classifier: ProviderStatus,
    pub scheduler: SchedulerHealth,
}

#[derive(Serialize)]
pub struct SchedulerHealth {
    pub running: bool,
    pub canvases: usize,
}

/// GET /health — service liveness plus classifier lifecycle state.
///
/// An uninitialized classifier is healthy (initialization is lazy); only a
/// memoized initialization failure degrades the service.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let classifier = state.scheduler.classifier_status();
    let degraded = classifier == ProviderStatus::Unavailable;

    let response = HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            classifier,
            scheduler: SchedulerHealth {
                running: state.scheduler.is_running(),
                canvases: state.scheduler.snapshot().len(),
            },
        },
    };

    let status_code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}
