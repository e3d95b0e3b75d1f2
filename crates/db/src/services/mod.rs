//! Application services that run workflow transitions against the stores.
//!
//! Every operation resolves the caller's effective role through the
//! [`RoleDirectory`](crate::repositories::RoleDirectory), checks it against the
//! access policy, runs the pure transition from `fixtrack_core::workflow` and
//! persists the result with a conditional write.

pub mod assignment;
pub mod repair;

pub use assignment::BranchAssignmentService;
pub use repair::RepairWorkflowService;

use fixtrack_core::domain::role::UserId;
use fixtrack_core::errors::{ApplicationError, DomainError};
use fixtrack_core::policy::Caller;

use crate::repositories::Repositories;

pub(crate) async fn resolve_caller(
    repositories: &Repositories,
    actor: &UserId,
) -> Result<Caller, ApplicationError> {
    if actor.is_blank() {
        return Err(DomainError::Authorization("caller identity is required".into()).into());
    }
    let grants = repositories.roles.grants_for(actor).await?;
    Ok(Caller::from_grants(actor.clone(), &grants))
}

/// Logs a refused or failed operation at a level matching its class.
pub(crate) fn log_failure(operation: &'static str, subject_id: &str, error: &ApplicationError) {
    match error {
        ApplicationError::Domain(domain) => tracing::warn!(
            event_name = "workflow.operation.rejected",
            operation,
            subject_id,
            error_class = domain.class(),
            error = %domain,
            "workflow operation rejected"
        ),
        other => tracing::error!(
            event_name = "workflow.operation.failed",
            operation,
            subject_id,
            error_class = other.class(),
            error = %other,
            "workflow operation failed"
        ),
    }
}
