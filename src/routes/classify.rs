use std::sync::atomic::Ordering;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::canvas::CanvasState;
use crate::services::extractor;
use crate::models::manifest::Manifest;

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub running: bool,
    pub classified: usize,
    pub pending: usize,
    pub errors: usize,
    pub threshold: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LoadManifestResponse {
    pub canvases: usize,
    pub classifiable: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub started: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CanvasListResponse {
    pub threshold: u8,
    pub canvases: Vec<CanvasState>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CanvasQuery {
    /// Overrides the stored threshold for this request only.
    #[garde(range(max = 100))]
    pub threshold: Option<u8>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ThresholdRequest {
    #[garde(range(max = 100))]
    pub threshold: u8,
}

fn summary_response(state: &AppState) -> SummaryResponse {
    let summary = state.scheduler.summary();
    SummaryResponse {
        running: state.scheduler.is_running(),
        classified: summary.classified,
        pending: summary.pending,
        errors: summary.errors,
        threshold: state.threshold.load(Ordering::Relaxed),
        last_run_error: state.scheduler.last_run_error(),
        last_run_finished_at: state.scheduler.last_run_finished_at(),
    }
}

/// POST /api/v1/manifest — load a manifest, rebuilding the state table.
pub async fn load_manifest(
    State(state): State<AppState>,
    Json(manifest): Json<Manifest>,
) -> Json<LoadManifestResponse> {
    let descriptors = extractor::job_descriptors(&manifest);
    let total = descriptors.len();
    let classifiable = descriptors.iter().filter(|d| d.image_url.is_some()).count();
    metrics::counter!("manifests_loaded_total").increment(1);
    tracing::info!(canvases = total, classifiable, "manifest loaded");

    state.scheduler.initialize(descriptors);

    Json(LoadManifestResponse {
        canvases: total,
        classifiable,
        skipped: total - classifiable,
    })
}

/// POST /api/v1/classify — trigger a classification run in the background.
pub async fn trigger_classification(
    State(state): State<AppState>,
) -> (StatusCode, Json<ClassifyResponse>) {
    if state.scheduler.is_running() {
        return (
            StatusCode::OK,
            Json(ClassifyResponse {
                started: false,
                message: "a classification run is already active".to_string(),
            }),
        );
    }

    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        // A run-level failure lands in the summary as last_run_error.
        if let Err(e) = scheduler.run().await {
            tracing::error!(error = %e, "classification run failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(ClassifyResponse {
            started: true,
            message: "classification started".to_string(),
        }),
    )
}

/// GET /api/v1/summary — current counts and run status.
pub async fn get_summary(State(state): State<AppState>) -> Json<SummaryResponse> {
    Json(summary_response(&state))
}

/// GET /api/v1/canvases — threshold-filtered canvas states in manifest order.
pub async fn list_canvases(
    State(state): State<AppState>,
    Query(query): Query<CanvasQuery>,
) -> Result<Json<CanvasListResponse>, StatusCode> {
    query.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let threshold = query
        .threshold
        .unwrap_or_else(|| state.threshold.load(Ordering::Relaxed));

    Ok(Json(CanvasListResponse {
        threshold,
        canvases: state.scheduler.visible_entries(threshold),
    }))
}

/// PUT /api/v1/threshold — set the stored confidence threshold.
pub async fn set_threshold(
    State(state): State<AppState>,
    Json(request): Json<ThresholdRequest>,
) -> Result<Json<SummaryResponse>, StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    state.threshold.store(request.threshold, Ordering::Relaxed);
    Ok(Json(summary_response(&state)))
}
