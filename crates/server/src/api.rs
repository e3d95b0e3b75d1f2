//! JSON API over the repair workflow.
//!
//! The caller is identified by the `x-user-id` header, set by the identity
//! proxy in front of this service. Every response carries the request's
//! correlation id, taken from `x-correlation-id` when present.
//!
//! - `POST /requests`                    file a repair request
//! - `GET  /requests?scope=`             list (`my`, `branch`, `approved`, `all`)
//! - `GET  /requests/{id}`               fetch one request
//! - `GET  /requests/{id}/history`       transition history
//! - `POST /requests/{id}/decision`      branch-head verdict
//! - `POST /requests/{id}/job`           IT job update
//! - `POST /assignments`                 file a branch assignment
//! - `GET  /assignments?status=`         list assignments
//! - `POST /assignments/{id}/decision`   admin verdict on an assignment
//! - `GET  /me/roles`                    the caller's role grants

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fixtrack_core::domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
use fixtrack_core::domain::branch::BranchId;
use fixtrack_core::domain::equipment::EquipmentId;
use fixtrack_core::domain::repair::{
    JobStatus, NewRepairRequest, RepairRequest, RepairRequestId, RequestType, Resolution, Verdict,
};
use fixtrack_core::domain::role::{Role, RoleGrant, UserId};
use fixtrack_core::domain::transition::TransitionRecord;
use fixtrack_core::errors::{ApplicationError, DomainError, InterfaceError};
use fixtrack_core::workflow::{AssignmentDecisionInput, DecisionInput, JobUpdate, ListScope};
use fixtrack_db::{BranchAssignmentService, RepairWorkflowService};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::convert::Infallible;
use tracing::warn;
use uuid::Uuid;

pub const USER_HEADER: &str = "x-user-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub workflow: RepairWorkflowService,
    pub assignments: BranchAssignmentService,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/history", get(request_history))
        .route("/requests/{id}/decision", post(decide_request))
        .route("/requests/{id}/job", post(update_job))
        .route("/assignments", post(file_assignment).get(list_assignments))
        .route("/assignments/{id}/decision", post(decide_assignment))
        .route("/me/roles", get(my_roles))
        .with_state(state)
}

/// Identity and tracing context of one HTTP call.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub actor: UserId,
    pub correlation_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

impl RequestContext {
    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        Self {
            actor: UserId(header(USER_HEADER).unwrap_or_default()),
            correlation_id: header(CORRELATION_HEADER)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    fn fail(&self, error: ApplicationError) -> ApiError {
        ApiError(error.into_interface(self.correlation_id.clone()))
    }

    fn invalid(&self, message: impl Into<String>) -> ApiError {
        self.fail(DomainError::Validation(message.into()).into())
    }

    fn body<T: DeserializeOwned>(
        &self,
        payload: Result<Json<T>, JsonRejection>,
    ) -> Result<T, ApiError> {
        payload.map(|Json(body)| body).map_err(|rejection| self.invalid(rejection.body_text()))
    }

    fn respond<T: Serialize>(&self, status: StatusCode, body: T) -> Response {
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    class: &'static str,
    message: &'static str,
    detail: &'a str,
    correlation_id: &'a str,
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "validation"),
            InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "authorization"),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "state"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, class) = self.status();
        if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                error = %self.0,
                "request failed"
            );
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                class,
                message: self.0.user_message(),
                detail: self.0.message(),
                correlation_id: self.0.correlation_id(),
            },
        };
        let mut response = (status, Json(envelope)).into_response();
        if let Ok(value) = HeaderValue::from_str(self.0.correlation_id()) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

/// Flat wire shape of a repair request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestView {
    pub id: String,
    pub equipment_id: String,
    pub requested_by: String,
    pub branch_id: String,
    pub request_type: String,
    pub description: String,
    pub status: String,
    pub job_status: Option<String>,
    pub branch_head_decision: Option<String>,
    pub branch_head_notes: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub it_assigned_to: Option<String>,
    pub it_received_at: Option<DateTime<Utc>>,
    pub repair_cost: Option<Decimal>,
    pub repair_notes: Option<String>,
    pub decision: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RepairRequest> for RequestView {
    fn from(request: RepairRequest) -> Self {
        let decision = request.decision.as_ref();
        Self {
            status: request.status.kind().as_str().to_owned(),
            job_status: request.status.job_status().map(|job| job.as_str().to_owned()),
            branch_head_decision: decision.map(|d| d.verdict.as_str().to_owned()),
            branch_head_notes: decision.and_then(|d| d.notes.clone()),
            approved_by: decision.map(|d| d.decided_by.0.clone()),
            approved_at: decision.map(|d| d.decided_at),
            it_assigned_to: request.job.assigned_to.map(|user| user.0),
            it_received_at: request.job.received_at,
            repair_cost: request.job.repair_cost,
            repair_notes: request.job.repair_notes,
            decision: request.job.resolution.map(|r| r.as_str().to_owned()),
            completed_at: request.job.completed_at,
            id: request.id.0,
            equipment_id: request.equipment_id.0,
            requested_by: request.requested_by.0,
            branch_id: request.branch_id.0,
            request_type: request.request_type.as_str().to_owned(),
            description: request.description,
            state_version: request.state_version,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub equipment_id: String,
    pub branch_id: String,
    pub request_type: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobUpdateBody {
    pub job_status: String,
    pub repair_cost: Option<Decimal>,
    pub repair_notes: Option<String>,
    pub decision: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentBody {
    pub branch_id: String,
    pub requested_role: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRequestsQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAssignmentsQuery {
    pub status: Option<String>,
}

fn parse_field<T>(
    ctx: &RequestContext,
    field: &str,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ApiError> {
    parse(raw.trim()).ok_or_else(|| ctx.invalid(format!("unknown {field} `{raw}`")))
}

async fn create_request(
    State(state): State<ApiState>,
    ctx: RequestContext,
    payload: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = ctx.body(payload)?;
    let input = NewRepairRequest {
        equipment_id: EquipmentId(body.equipment_id),
        branch_id: BranchId(body.branch_id),
        request_type: parse_field(&ctx, "request_type", &body.request_type, RequestType::parse)?,
        description: body.description,
    };

    let request =
        state.workflow.create_request(&ctx.actor, input).await.map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::CREATED, RequestView::from(request)))
}

async fn list_requests(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Response, ApiError> {
    let scope = match query.scope.as_deref() {
        None => ListScope::default(),
        Some(raw) => parse_field(&ctx, "scope", raw, ListScope::parse)?,
    };

    let requests =
        state.workflow.list_requests(&ctx.actor, scope).await.map_err(|e| ctx.fail(e))?;
    let views: Vec<RequestView> = requests.into_iter().map(RequestView::from).collect();
    Ok(ctx.respond(StatusCode::OK, views))
}

async fn get_request(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request = state
        .workflow
        .get_request(&ctx.actor, &RepairRequestId(id))
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, RequestView::from(request)))
}

async fn request_history(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let history: Vec<TransitionRecord> = state
        .workflow
        .request_history(&ctx.actor, &RepairRequestId(id))
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, history))
}

async fn decide_request(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    payload: Result<Json<DecisionBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = ctx.body(payload)?;
    let input = DecisionInput {
        verdict: parse_field(&ctx, "decision", &body.decision, Verdict::parse)?,
        notes: body.notes,
    };

    let request = state
        .workflow
        .decide(&ctx.actor, &RepairRequestId(id), input)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, RequestView::from(request)))
}

async fn update_job(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    payload: Result<Json<JobUpdateBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = ctx.body(payload)?;
    let resolution = body
        .decision
        .as_deref()
        .map(|raw| parse_field(&ctx, "decision", raw, Resolution::parse))
        .transpose()?;
    let update = JobUpdate {
        job_status: parse_field(&ctx, "job_status", &body.job_status, JobStatus::parse)?,
        repair_cost: body.repair_cost,
        repair_notes: body.repair_notes,
        resolution,
    };

    let request = state
        .workflow
        .update_job(&ctx.actor, &RepairRequestId(id), update)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, RequestView::from(request)))
}

async fn file_assignment(
    State(state): State<ApiState>,
    ctx: RequestContext,
    payload: Result<Json<AssignmentBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = ctx.body(payload)?;
    let role = parse_field(&ctx, "requested_role", &body.requested_role, Role::parse)?;

    let assignment: UserBranchAssignment = state
        .assignments
        .request_assignment(&ctx.actor, BranchId(body.branch_id), role)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::CREATED, assignment))
}

async fn list_assignments(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Query(query): Query<ListAssignmentsQuery>,
) -> Result<Response, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| parse_field(&ctx, "status", raw, AssignmentStatus::parse))
        .transpose()?;

    let assignments =
        state.assignments.list_assignments(&ctx.actor, status).await.map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, assignments))
}

async fn decide_assignment(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    payload: Result<Json<DecisionBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = ctx.body(payload)?;
    let input = AssignmentDecisionInput {
        verdict: parse_field(&ctx, "decision", &body.decision, Verdict::parse)?,
        notes: body.notes,
    };

    let assignment = state
        .assignments
        .decide_assignment(&ctx.actor, &AssignmentId(id), input)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, assignment))
}

async fn my_roles(
    State(state): State<ApiState>,
    ctx: RequestContext,
) -> Result<Response, ApiError> {
    let grants: Vec<RoleGrant> =
        state.assignments.roles_of(&ctx.actor).await.map_err(|e| ctx.fail(e))?;
    Ok(ctx.respond(StatusCode::OK, grants))
}
