//! Package handlers: submission and the list of packages being processed.

use axum::Json;
use axum::extract::State;
use ccp_core::controller::Submission;
use ccp_types::package::{CreatePackageRequest, PackageType};
use serde::Serialize;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmittedPackage {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ActivePackage {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub package_type: PackageType,
}

/// POST /api/v1/packages - Submit a transfer.
///
/// Responds once the transfer is recorded; copying its contents continues in
/// the background.
pub async fn create_package(
    State(state): State<AppState>,
    Json(body): Json<CreatePackageRequest>,
) -> Result<Json<ApiResponse<SubmittedPackage>>, AppError> {
    let timer = RequestTimer::start();

    let Submission { id, name, handle } = state.controller.submit(body).await?;
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(package_id = %id, error = %e, "transfer deposit failed"),
            Err(e) => tracing::error!(package_id = %id, error = %e, "transfer deposit task aborted"),
        }
    });

    Ok(Json(
        timer
            .finish(SubmittedPackage { id, name })
            .with_link("decisions", format!("/api/v1/packages/{id}/decisions")),
    ))
}

/// GET /api/v1/packages/active - Packages currently being processed.
pub async fn list_active(State(state): State<AppState>) -> Json<ApiResponse<Vec<ActivePackage>>> {
    let timer = RequestTimer::start();

    let packages = state
        .controller
        .active_packages()
        .into_iter()
        .map(|info| ActivePackage {
            id: info.id,
            name: info.name,
            path: info.path,
            package_type: info.package_type,
        })
        .collect();
    Json(timer.finish(packages).with_link("self", "/api/v1/packages/active"))
}
