use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ReconcileParams {
    pub project_id: Option<String>,
    pub zone: Option<String>,
}

pub async fn root() -> &'static str {
    "Spot Keeper API - restarts preempted spot VMs"
}

pub async fn version() -> Json<serde_json::Value> {
    Json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

/// HTTP entry point: accepts `project_id`/`zone` in a JSON body or as query
/// parameters. A body carrying `project_id` wins, and `zone` is then read
/// from that same source; a malformed body is treated as absent.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReconcileParams>,
    body: Bytes,
) -> Response {
    let body: Option<ReconcileParams> = serde_json::from_slice(&body).ok();

    // Source selection keys on the presence of project_id, validation on its
    // value; an empty body field still selects the body as the source.
    let (project_id, zone) = match body {
        Some(b) if b.project_id.is_some() => (b.project_id, b.zone),
        _ => (query.project_id, query.zone),
    };

    let Some(project_id) = project_id.filter(|s| !s.trim().is_empty()) else {
        return missing_parameter("project_id");
    };
    let Some(zone) = zone.filter(|s| !s.trim().is_empty()) else {
        return missing_parameter("zone");
    };

    match keeper_reconciler::reconcile(state.provider.as_ref(), &project_id, &zone).await {
        Ok(results) => {
            info!(%project_id, %zone, results = results.len(), "reconciliation finished");
            (StatusCode::OK, Json(json!({ "results": results }))).into_response()
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!("Reconciliation failed: {}", message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response()
        }
    }
}

fn missing_parameter(name: &str) -> Response {
    let message = format!("Missing required parameter: {}", name);
    error!("{}", message);
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
