//! Decision handlers: listing pending decisions and resolving them.

use axum::Json;
use axum::extract::{Path, State};
use ccp_core::controller::ControllerError;
use ccp_types::decision::DecisionSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// Position of the chosen option.
    pub choice: usize,
}

#[derive(Debug, Deserialize)]
pub struct JobDecisionRequest {
    /// A position, or the value or label of a choice.
    pub choice: String,
}

#[derive(Debug, Serialize)]
pub struct Resolved {
    pub resolved: bool,
}

/// GET /api/v1/decisions - Pending decisions.
pub async fn list_decisions(State(state): State<AppState>) -> Json<ApiResponse<Vec<DecisionSummary>>> {
    let timer = RequestTimer::start();

    let decisions = state.controller.decisions();
    Json(timer.finish(decisions).with_link("self", "/api/v1/decisions"))
}

/// GET /api/v1/packages/{id}/decisions - Pending decisions of one package.
pub async fn package_decisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<DecisionSummary>>>, AppError> {
    let timer = RequestTimer::start();

    let id = parse_id(&id)?;
    let decisions = state
        .controller
        .package_decisions(id)
        .ok_or(ControllerError::NotAwaiting)?;
    Ok(Json(timer.finish(decisions)))
}

/// POST /api/v1/decisions/{id}/resolve - Resolve a decision by position.
pub async fn resolve_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ApiResponse<Resolved>>, AppError> {
    let timer = RequestTimer::start();

    let id = parse_id(&id)?;
    state.controller.resolve_decision(id, body.choice)?;
    Ok(Json(timer.finish(Resolved { resolved: true })))
}

/// POST /api/v1/jobs/{id}/decision - Resolve the decision raised by a job.
pub async fn resolve_job_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<JobDecisionRequest>,
) -> Result<Json<ApiResponse<Resolved>>, AppError> {
    let timer = RequestTimer::start();

    let job_id = parse_id(&id)?;
    state.controller.resolve_decision_legacy(job_id, &body.choice)?;
    Ok(Json(timer.finish(Resolved { resolved: true })))
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|e| AppError::Validation(format!("invalid id '{raw}': {e}")))
}
