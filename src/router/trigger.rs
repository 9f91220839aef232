use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::{Error, Result};
use crate::sync::{Report, Status};

#[derive(Debug, Serialize)]
pub struct Response {
    pub status: Status,
}

#[derive(Debug, Serialize)]
pub struct AllResponse {
    pub status: Status,
    #[serde(flatten)]
    pub report: Report,
}

/// Handler to synchronize every employee.
///
/// The run is spawned so it completes even if the client goes away.
pub async fn all(State(state): State<AppState>) -> Result<Json<AllResponse>> {
    let synchronizer = Arc::clone(&state.synchronizer);
    let report = tokio::spawn(async move { synchronizer.sync_all().await })
        .await
        .map_err(|_| Error::Canceled)??;

    Ok(Json(AllResponse {
        status: report.status(),
        report,
    }))
}

/// Handler to synchronize one employee.
pub async fn one(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Response>> {
    let synchronizer = Arc::clone(&state.synchronizer);
    let status = tokio::spawn(async move { synchronizer.sync_one(uuid).await })
        .await
        .map_err(|_| Error::Canceled)??;

    Ok(Json(Response { status }))
}
