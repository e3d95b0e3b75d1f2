use chrono::Utc;
use tracing::info;

use fixtrack_core::domain::repair::{NewRepairRequest, RepairRequest, RepairRequestId};
use fixtrack_core::domain::role::UserId;
use fixtrack_core::domain::transition::{TransitionRecord, TransitionSubject};
use fixtrack_core::errors::{ApplicationError, DomainError};
use fixtrack_core::policy::{AccessPolicy, Action};
use fixtrack_core::workflow::{
    apply_decision, apply_job_update, open_request, DecisionInput, JobUpdate, ListScope,
    RequestTransition,
};

use super::{log_failure, resolve_caller};
use crate::repositories::{ExpectedState, Repositories, RequestFilter};

const SUBJECT: &str = "repair request";

/// Drives repair requests through approval and servicing.
#[derive(Clone)]
pub struct RepairWorkflowService {
    repositories: Repositories,
    policy: AccessPolicy,
}

impl RepairWorkflowService {
    pub fn new(repositories: Repositories, policy: AccessPolicy) -> Self {
        Self { repositories, policy }
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub async fn create_request(
        &self,
        actor: &UserId,
        input: NewRepairRequest,
    ) -> Result<RepairRequest, ApplicationError> {
        let result = self.try_create(actor, input).await;
        if let Err(error) = &result {
            log_failure("create_request", "-", error);
        }
        result
    }

    async fn try_create(
        &self,
        actor: &UserId,
        input: NewRepairRequest,
    ) -> Result<RepairRequest, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        self.policy.authorize(&caller, Action::CreateRequest).into_result()?;
        input.validate()?;

        if self.repositories.equipment.find_by_id(&input.equipment_id).await?.is_none() {
            return Err(DomainError::Validation(format!(
                "equipment `{}` is not registered",
                input.equipment_id.0
            ))
            .into());
        }
        if self.repositories.branches.find_by_id(&input.branch_id).await?.is_none() {
            return Err(DomainError::Validation(format!(
                "branch `{}` is not registered",
                input.branch_id.0
            ))
            .into());
        }

        let transition = open_request(RepairRequestId::generate(), actor.clone(), input, Utc::now())?;
        self.repositories.requests.insert(&transition.request, &transition.record).await?;

        info!(
            event_name = "workflow.request.created",
            request_id = %transition.request.id.0,
            branch_id = %transition.request.branch_id.0,
            request_type = transition.request.request_type.as_str(),
            actor = %actor.0,
            "repair request created"
        );
        Ok(transition.request)
    }

    /// Branch-head verdict on a pending request.
    pub async fn decide(
        &self,
        actor: &UserId,
        request_id: &RepairRequestId,
        input: DecisionInput,
    ) -> Result<RepairRequest, ApplicationError> {
        let result = self.try_decide(actor, request_id, input).await;
        if let Err(error) = &result {
            log_failure("decide", &request_id.0, error);
        }
        result
    }

    async fn try_decide(
        &self,
        actor: &UserId,
        request_id: &RepairRequestId,
        input: DecisionInput,
    ) -> Result<RepairRequest, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        let current = self.load(request_id).await?;
        self.policy.authorize(&caller, Action::DecideRequest(&current)).into_result()?;

        let transition = apply_decision(&current, &input, actor, Utc::now())?;
        let decided = self.commit(&current, transition, "decide").await?;

        info!(
            event_name = "workflow.request.decided",
            request_id = %decided.id.0,
            verdict = input.verdict.as_str(),
            status = decided.status.kind().as_str(),
            actor = %actor.0,
            "repair request decided"
        );
        Ok(decided)
    }

    /// IT-unit progress report on an approved or in-progress request.
    pub async fn update_job(
        &self,
        actor: &UserId,
        request_id: &RepairRequestId,
        update: JobUpdate,
    ) -> Result<RepairRequest, ApplicationError> {
        let result = self.try_update_job(actor, request_id, update).await;
        if let Err(error) = &result {
            log_failure("update_job", &request_id.0, error);
        }
        result
    }

    async fn try_update_job(
        &self,
        actor: &UserId,
        request_id: &RepairRequestId,
        update: JobUpdate,
    ) -> Result<RepairRequest, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        let current = self.load(request_id).await?;
        self.policy.authorize(&caller, Action::UpdateJob(&current)).into_result()?;

        let transition = apply_job_update(&current, &update, actor, Utc::now())?;
        let updated = self.commit(&current, transition, "update the job of").await?;

        info!(
            event_name = "workflow.request.job_updated",
            request_id = %updated.id.0,
            job_status = update.job_status.as_str(),
            status = updated.status.kind().as_str(),
            actor = %actor.0,
            "repair job updated"
        );
        Ok(updated)
    }

    pub async fn get_request(
        &self,
        actor: &UserId,
        request_id: &RepairRequestId,
    ) -> Result<RepairRequest, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        let request = self.load(request_id).await?;
        self.policy.authorize(&caller, Action::ViewRequest(&request)).into_result()?;
        Ok(request)
    }

    /// Requests in `scope` that the caller may see, newest first.
    pub async fn list_requests(
        &self,
        actor: &UserId,
        scope: ListScope,
    ) -> Result<Vec<RepairRequest>, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        let filter = RequestFilter {
            requested_by: (scope == ListScope::My).then(|| actor.clone()),
            branch_id: None,
            statuses: scope.statuses().to_vec(),
        };

        let requests = self.repositories.requests.list(&filter).await?;
        let total = requests.len();
        let visible: Vec<RepairRequest> =
            requests.into_iter().filter(|request| self.policy.can_view(&caller, request)).collect();

        tracing::debug!(
            event_name = "workflow.request.listed",
            scope = scope.as_str(),
            actor = %actor.0,
            matched = total,
            visible = visible.len(),
            "repair requests listed"
        );
        Ok(visible)
    }

    /// Transition history of a request the caller may see, oldest first.
    pub async fn request_history(
        &self,
        actor: &UserId,
        request_id: &RepairRequestId,
    ) -> Result<Vec<TransitionRecord>, ApplicationError> {
        let request = self.get_request(actor, request_id).await?;
        Ok(self
            .repositories
            .transitions
            .list_for_subject(TransitionSubject::RepairRequest, &request.id.0)
            .await?)
    }

    async fn load(&self, request_id: &RepairRequestId) -> Result<RepairRequest, ApplicationError> {
        self.repositories.requests.find_by_id(request_id).await?.ok_or_else(|| {
            DomainError::NotFound { entity: SUBJECT, id: request_id.0.clone() }.into()
        })
    }

    /// Persists a transition only if nobody moved the request since it was
    /// read. A lost race is reported against the state that won.
    async fn commit(
        &self,
        current: &RepairRequest,
        transition: RequestTransition,
        operation: &'static str,
    ) -> Result<RepairRequest, ApplicationError> {
        let applied = self
            .repositories
            .requests
            .update_if_current(ExpectedState::of(current), &transition.request, &transition.record)
            .await?;
        if applied {
            return Ok(transition.request);
        }

        let latest = self.load(&current.id).await?;
        let error = if latest.status.kind() != current.status.kind() {
            DomainError::InvalidState {
                subject: SUBJECT,
                status: latest.status.kind().as_str().to_owned(),
                operation,
            }
        } else {
            DomainError::StaleWrite { subject: SUBJECT, id: current.id.0.clone() }
        };
        Err(error.into())
    }
}
