use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::approval::{ApprovalDocument, Decision, DraftDocument};
use crate::database::ApprovalStore;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::notification::Notifier;
use crate::tenant::TenantContext;

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequest {
    #[serde(flatten)]
    pub draft: DraftDocument,
    /// Submit right after creation
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegateRequest {
    pub delegate_id: Uuid,
    #[serde(default)]
    pub comment: Option<String>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::invalid_json(e.body_text()))
}

fn path_params<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(value)| value)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// POST /api/approvals - Create a draft, optionally submitting it
pub async fn create<S: ApprovalStore, N: Notifier>(
    State(state): State<AppState<S, N>>,
    Extension(ctx): Extension<Arc<TenantContext>>,
    body: Result<Json<CreateApprovalRequest>, JsonRejection>,
) -> ApiResult<ApprovalDocument> {
    let request = json_body(body)?;
    let doc = state.engine.create(&ctx, request.draft, request.submit).await?;
    Ok(ApiResponse::created(doc))
}

/// GET /api/approvals/:id
pub async fn get<S: ApprovalStore, N: Notifier>(
    State(state): State<AppState<S, N>>,
    Extension(ctx): Extension<Arc<TenantContext>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ApprovalDocument> {
    let id = path_params(path)?;
    Ok(ApiResponse::success(state.engine.get(&ctx, id).await?))
}

/// POST /api/approvals/:id/submit
pub async fn submit<S: ApprovalStore, N: Notifier>(
    State(state): State<AppState<S, N>>,
    Extension(ctx): Extension<Arc<TenantContext>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ApprovalDocument> {
    let id = path_params(path)?;
    Ok(ApiResponse::success(state.engine.submit(&ctx, id).await?))
}

/// POST /api/approvals/:id/lines/:line_id/decision
pub async fn decide<S: ApprovalStore, N: Notifier>(
    State(state): State<AppState<S, N>>,
    Extension(ctx): Extension<Arc<TenantContext>>,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> ApiResult<ApprovalDocument> {
    let (id, line_id) = path_params(path)?;
    let request = json_body(body)?;
    let doc = state
        .engine
        .decide(&ctx, id, line_id, request.decision, request.comment)
        .await?;
    Ok(ApiResponse::success(doc))
}

/// POST /api/approvals/:id/cancel
pub async fn cancel<S: ApprovalStore, N: Notifier>(
    State(state): State<AppState<S, N>>,
    Extension(ctx): Extension<Arc<TenantContext>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ApprovalDocument> {
    let id = path_params(path)?;
    Ok(ApiResponse::success(state.engine.cancel(&ctx, id).await?))
}

/// POST /api/approvals/:id/lines/:line_id/delegate
pub async fn delegate<S: ApprovalStore, N: Notifier>(
    State(state): State<AppState<S, N>>,
    Extension(ctx): Extension<Arc<TenantContext>>,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
    body: Result<Json<DelegateRequest>, JsonRejection>,
) -> ApiResult<ApprovalDocument> {
    let (id, line_id) = path_params(path)?;
    let request = json_body(body)?;
    let doc = state
        .engine
        .delegate(&ctx, id, line_id, request.delegate_id, request.comment)
        .await?;
    Ok(ApiResponse::success(doc))
}
