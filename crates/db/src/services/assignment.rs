use chrono::Utc;
use tracing::info;

use fixtrack_core::domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
use fixtrack_core::domain::branch::BranchId;
use fixtrack_core::domain::role::{Role, RoleGrant, UserId};
use fixtrack_core::errors::{ApplicationError, DomainError};
use fixtrack_core::policy::{AccessPolicy, Action};
use fixtrack_core::workflow::{apply_assignment_decision, file_assignment, AssignmentDecisionInput};

use super::{log_failure, resolve_caller};
use crate::repositories::{Repositories, RepositoryError};

const SUBJECT: &str = "branch assignment";

/// Branch membership requests and the role changes an admin approval implies.
#[derive(Clone)]
pub struct BranchAssignmentService {
    repositories: Repositories,
    policy: AccessPolicy,
}

impl BranchAssignmentService {
    pub fn new(repositories: Repositories, policy: AccessPolicy) -> Self {
        Self { repositories, policy }
    }

    /// Files a pending request for `role` at `branch_id` on behalf of the caller.
    pub async fn request_assignment(
        &self,
        actor: &UserId,
        branch_id: BranchId,
        role: Role,
    ) -> Result<UserBranchAssignment, ApplicationError> {
        let result = self.try_request(actor, branch_id, role).await;
        if let Err(error) = &result {
            log_failure("request_assignment", &actor.0, error);
        }
        result
    }

    async fn try_request(
        &self,
        actor: &UserId,
        branch_id: BranchId,
        role: Role,
    ) -> Result<UserBranchAssignment, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        self.policy.authorize(&caller, Action::FileAssignment).into_result()?;

        if self.repositories.branches.find_by_id(&branch_id).await?.is_none() {
            return Err(DomainError::Validation(format!(
                "branch `{}` is not registered",
                branch_id.0
            ))
            .into());
        }

        let pending = self.repositories.assignments.list(Some(actor), Some(AssignmentStatus::Pending)).await?;
        if !pending.is_empty() {
            return Err(already_pending().into());
        }

        let (assignment, record) = file_assignment(actor.clone(), branch_id, role, Utc::now())?;
        match self.repositories.assignments.insert(&assignment, &record).await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(_)) => return Err(already_pending().into()),
            Err(other) => return Err(other.into()),
        }

        info!(
            event_name = "workflow.assignment.filed",
            assignment_id = %assignment.id.0,
            branch_id = %assignment.branch_id.0,
            requested_role = assignment.requested_role.as_str(),
            actor = %actor.0,
            "branch assignment filed"
        );
        Ok(assignment)
    }

    /// Admin verdict. Approval replaces every role the user held with the
    /// requested one, scoped to the assignment's branch.
    pub async fn decide_assignment(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
        input: AssignmentDecisionInput,
    ) -> Result<UserBranchAssignment, ApplicationError> {
        let result = self.try_decide(actor, assignment_id, input).await;
        if let Err(error) = &result {
            log_failure("decide_assignment", &assignment_id.0, error);
        }
        result
    }

    async fn try_decide(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
        input: AssignmentDecisionInput,
    ) -> Result<UserBranchAssignment, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        let current = self.load(assignment_id).await?;
        self.policy.authorize(&caller, Action::DecideAssignment(&current)).into_result()?;

        let transition = apply_assignment_decision(&current, &input, actor, Utc::now())?;
        let applied = self
            .repositories
            .assignments
            .decide_if_pending(
                current.state_version,
                &transition.assignment,
                transition.grant.as_ref(),
                &transition.record,
            )
            .await?;

        if !applied {
            let latest = self.load(assignment_id).await?;
            let error = if latest.status != AssignmentStatus::Pending {
                DomainError::InvalidState {
                    subject: SUBJECT,
                    status: latest.status.as_str().to_owned(),
                    operation: "decide",
                }
            } else {
                DomainError::StaleWrite { subject: SUBJECT, id: assignment_id.0.clone() }
            };
            return Err(error.into());
        }

        info!(
            event_name = "workflow.assignment.decided",
            assignment_id = %transition.assignment.id.0,
            user_id = %transition.assignment.user_id.0,
            status = transition.assignment.status.as_str(),
            granted_role = transition.grant.as_ref().map(|grant| grant.role.as_str()),
            actor = %actor.0,
            "branch assignment decided"
        );
        Ok(transition.assignment)
    }

    /// Admins see every assignment; everyone else sees their own.
    pub async fn list_assignments(
        &self,
        actor: &UserId,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<UserBranchAssignment>, ApplicationError> {
        let caller = resolve_caller(&self.repositories, actor).await?;
        let owner = (!caller.has_role(Role::Admin)).then_some(actor);

        let assignments = self.repositories.assignments.list(owner, status).await?;
        Ok(assignments
            .into_iter()
            .filter(|assignment| {
                self.policy.authorize(&caller, Action::ViewAssignment(assignment)).allowed
            })
            .collect())
    }

    /// The caller's current grants; at most one after any approval.
    pub async fn roles_of(&self, actor: &UserId) -> Result<Vec<RoleGrant>, ApplicationError> {
        resolve_caller(&self.repositories, actor).await?;
        Ok(self.repositories.roles.grants_for(actor).await?)
    }

    async fn load(
        &self,
        assignment_id: &AssignmentId,
    ) -> Result<UserBranchAssignment, ApplicationError> {
        self.repositories.assignments.find_by_id(assignment_id).await?.ok_or_else(|| {
            DomainError::NotFound { entity: SUBJECT, id: assignment_id.0.clone() }.into()
        })
    }
}

fn already_pending() -> DomainError {
    DomainError::InvalidState { subject: SUBJECT, status: "pending".to_owned(), operation: "supersede" }
}
