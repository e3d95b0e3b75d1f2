use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
use crate::domain::branch::BranchId;
use crate::domain::repair::{
    BranchHeadDecision, JobRecord, JobStatus, NewRepairRequest, RepairRequest, RepairRequestId,
    RequestStatus, Verdict,
};
use crate::domain::role::{Role, RoleGrant, UserId};
use crate::domain::transition::{TransitionEvent, TransitionRecord, TransitionSubject};
use crate::errors::DomainError;
use crate::workflow::states::{
    AssignmentDecisionInput, AssignmentTransition, DecisionInput, JobUpdate, RequestTransition,
};

const REQUEST: &str = "repair request";
const ASSIGNMENT: &str = "branch assignment";

pub fn open_request(
    id: RepairRequestId,
    requested_by: UserId,
    input: NewRepairRequest,
    now: DateTime<Utc>,
) -> Result<RequestTransition, DomainError> {
    input.validate()?;

    let request = RepairRequest {
        id,
        equipment_id: input.equipment_id,
        requested_by: requested_by.clone(),
        branch_id: input.branch_id,
        request_type: input.request_type,
        description: input.description.trim().to_owned(),
        status: RequestStatus::Pending,
        decision: None,
        job: JobRecord::default(),
        state_version: 1,
        created_at: now,
        updated_at: now,
    };

    let to = request.status.kind();
    let record = TransitionRecord::new(
        TransitionSubject::RepairRequest,
        request.id.0.clone(),
        TransitionEvent::RequestCreated,
        None,
        to.as_str(),
        None,
        requested_by,
        request.state_version,
        now,
    );

    Ok(RequestTransition { from: None, to, request, record })
}

/// pending → approved | rejected. The state check runs before input
/// validation so a second decision is always reported as a conflict.
pub fn apply_decision(
    current: &RepairRequest,
    input: &DecisionInput,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<RequestTransition, DomainError> {
    let from = current.status.kind();
    if current.status != RequestStatus::Pending || current.decision.is_some() {
        return Err(invalid_state(REQUEST, from.as_str(), "decide"));
    }

    let notes = normalize_text(input.notes.as_deref());
    if input.verdict == Verdict::Rejected && notes.is_none() {
        return Err(DomainError::Validation("notes are required when rejecting a request".into()));
    }

    let mut request = current.clone();
    request.status = match input.verdict {
        Verdict::Approved => RequestStatus::Approved { job: None },
        Verdict::Rejected => RequestStatus::Rejected,
    };
    request.decision = Some(BranchHeadDecision {
        verdict: input.verdict,
        notes,
        decided_by: actor.clone(),
        decided_at: now,
    });

    Ok(finish(current, request, TransitionEvent::RequestDecided, actor, now))
}

/// Merges an IT-unit job update into the request.
pub fn apply_job_update(
    current: &RepairRequest,
    update: &JobUpdate,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<RequestTransition, DomainError> {
    let from = current.status.kind();
    let in_progress = match current.status {
        RequestStatus::Approved { .. } => false,
        RequestStatus::InProgress { .. } => true,
        _ => return Err(invalid_state(REQUEST, from.as_str(), "update the job of")),
    };

    if update.repair_cost.is_some_and(|cost| cost < Decimal::ZERO) {
        return Err(DomainError::Validation("repair cost must not be negative".into()));
    }

    let job_status = update.job_status;
    let first_receipt = current.job.received_at.is_none() && job_status == JobStatus::Received;

    if job_status.is_terminal() && !in_progress {
        return Err(invalid_state(REQUEST, from.as_str(), "complete"));
    }

    let mut request = current.clone();
    let job = &mut request.job;
    job.assigned_to = Some(actor.clone());
    if first_receipt {
        job.received_at = Some(now);
    }
    if let Some(cost) = update.repair_cost {
        job.repair_cost = Some(cost);
    }
    if let Some(notes) = update.repair_notes.as_deref() {
        job.repair_notes = Some(notes.trim().to_owned());
    }
    if let Some(resolution) = update.resolution {
        job.resolution = Some(resolution);
    }

    request.status = if job_status.is_terminal() {
        job.completed_at = Some(now);
        RequestStatus::Completed { job: job_status }
    } else if in_progress || first_receipt {
        RequestStatus::InProgress { job: job_status }
    } else {
        RequestStatus::Approved { job: Some(job_status) }
    };

    Ok(finish(current, request, TransitionEvent::JobUpdated, actor, now))
}

pub fn file_assignment(
    user_id: UserId,
    branch_id: BranchId,
    requested_role: Role,
    now: DateTime<Utc>,
) -> Result<(UserBranchAssignment, TransitionRecord), DomainError> {
    if user_id.is_blank() {
        return Err(DomainError::Validation("user reference is required".into()));
    }
    if branch_id.0.trim().is_empty() {
        return Err(DomainError::Validation("branch reference is required".into()));
    }

    let assignment = UserBranchAssignment {
        id: AssignmentId::generate(),
        user_id: user_id.clone(),
        branch_id,
        requested_role,
        status: AssignmentStatus::Pending,
        approved_by: None,
        approved_at: None,
        notes: None,
        state_version: 1,
        created_at: now,
        updated_at: now,
    };
    let record = TransitionRecord::new(
        TransitionSubject::BranchAssignment,
        assignment.id.0.clone(),
        TransitionEvent::AssignmentFiled,
        None,
        assignment.status.as_str(),
        None,
        user_id,
        assignment.state_version,
        now,
    );

    Ok((assignment, record))
}

/// pending → approved | rejected. Approval yields the single grant that
/// replaces the user's role set.
pub fn apply_assignment_decision(
    current: &UserBranchAssignment,
    input: &AssignmentDecisionInput,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<AssignmentTransition, DomainError> {
    if current.status != AssignmentStatus::Pending {
        return Err(invalid_state(ASSIGNMENT, current.status.as_str(), "decide"));
    }

    let mut assignment = current.clone();
    assignment.status = match input.verdict {
        Verdict::Approved => AssignmentStatus::Approved,
        Verdict::Rejected => AssignmentStatus::Rejected,
    };
    assignment.approved_by = Some(actor.clone());
    assignment.approved_at = Some(now);
    assignment.notes = normalize_text(input.notes.as_deref());
    assignment.state_version = current.state_version + 1;
    assignment.updated_at = now;

    let grant = (assignment.status == AssignmentStatus::Approved).then(|| RoleGrant {
        user_id: assignment.user_id.clone(),
        role: assignment.requested_role,
        branch_id: Some(assignment.branch_id.clone()),
        granted_by: Some(actor.clone()),
        granted_at: now,
    });

    let record = TransitionRecord::new(
        TransitionSubject::BranchAssignment,
        assignment.id.0.clone(),
        TransitionEvent::AssignmentDecided,
        Some(current.status.as_str()),
        assignment.status.as_str(),
        None,
        actor.clone(),
        assignment.state_version,
        now,
    );

    Ok(AssignmentTransition { assignment, grant, record })
}

fn finish(
    current: &RepairRequest,
    mut request: RepairRequest,
    event: TransitionEvent,
    actor: &UserId,
    now: DateTime<Utc>,
) -> RequestTransition {
    request.state_version = current.state_version + 1;
    request.updated_at = now;

    let from = current.status.kind();
    let to = request.status.kind();
    let record = TransitionRecord::new(
        TransitionSubject::RepairRequest,
        request.id.0.clone(),
        event,
        Some(from.as_str()),
        to.as_str(),
        request.status.job_status(),
        actor.clone(),
        request.state_version,
        now,
    );

    RequestTransition { from: Some(from), to, request, record }
}

fn invalid_state(subject: &'static str, status: &str, operation: &'static str) -> DomainError {
    DomainError::InvalidState { subject, status: status.to_owned(), operation }
}

fn normalize_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{
        apply_assignment_decision, apply_decision, apply_job_update, file_assignment,
        open_request,
    };
    use crate::domain::assignment::AssignmentStatus;
    use crate::domain::branch::BranchId;
    use crate::domain::equipment::EquipmentId;
    use crate::domain::repair::{
        JobStatus, NewRepairRequest, RepairRequest, RepairRequestId, RequestStatus,
        RequestStatusKind, RequestType, Resolution, Verdict,
    };
    use crate::domain::role::{Role, UserId};
    use crate::errors::DomainError;
    use crate::workflow::states::{AssignmentDecisionInput, DecisionInput, JobUpdate};

    fn user(id: &str) -> UserId {
        UserId(id.to_owned())
    }

    fn pending() -> RepairRequest {
        open_request(
            RepairRequestId("R-1".to_owned()),
            user("officer-1"),
            NewRepairRequest {
                equipment_id: EquipmentId("E1".to_owned()),
                branch_id: BranchId("B1".to_owned()),
                request_type: RequestType::Malfunction,
                description: "Screen flickers intermittently".to_owned(),
            },
            Utc::now(),
        )
        .expect("open request")
        .request
    }

    fn approve(request: &RepairRequest) -> RepairRequest {
        apply_decision(
            request,
            &DecisionInput { verdict: Verdict::Approved, notes: None },
            &user("head-1"),
            Utc::now(),
        )
        .expect("approve")
        .request
    }

    fn job(request: &RepairRequest, update: JobUpdate) -> Result<RepairRequest, DomainError> {
        apply_job_update(request, &update, &user("tech-1"), Utc::now()).map(|t| t.request)
    }

    #[test]
    fn open_request_starts_pending_with_empty_decision_and_job() {
        let request = pending();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.decision.is_none());
        assert!(request.job.received_at.is_none());
        assert_eq!(request.state_version, 1);
    }

    #[test]
    fn open_request_rejects_short_description() {
        let error = open_request(
            RepairRequestId("R-2".to_owned()),
            user("officer-1"),
            NewRepairRequest {
                equipment_id: EquipmentId("E1".to_owned()),
                branch_id: BranchId("B1".to_owned()),
                request_type: RequestType::Damage,
                description: "broken".to_owned(),
            },
            Utc::now(),
        )
        .expect_err("too short");
        assert!(matches!(error, DomainError::Validation(_)));
    }

    #[test]
    fn full_lifecycle_walks_only_legal_edges() {
        let request = pending();
        let approved = approve(&request);
        assert_eq!(approved.status, RequestStatus::Approved { job: None });
        let decision = approved.decision.clone().expect("decision recorded");
        assert_eq!(decision.verdict, Verdict::Approved);
        assert_eq!(decision.decided_by, user("head-1"));

        let received = job(&approved, JobUpdate::status_only(JobStatus::Received)).expect("receive");
        assert_eq!(received.status, RequestStatus::InProgress { job: JobStatus::Received });
        assert!(received.job.received_at.is_some());
        assert_eq!(received.job.assigned_to, Some(user("tech-1")));

        let completed = job(
            &received,
            JobUpdate {
                job_status: JobStatus::Completed,
                repair_cost: Some(Decimal::new(1500, 0)),
                repair_notes: None,
                resolution: Some(Resolution::Repair),
            },
        )
        .expect("complete");
        assert_eq!(completed.status, RequestStatus::Completed { job: JobStatus::Completed });
        assert!(completed.job.completed_at.is_some());
        assert_eq!(completed.job.repair_cost, Some(Decimal::new(1500, 0)));
        assert_eq!(completed.state_version, 4);
    }

    #[test]
    fn rejection_requires_notes() {
        let error = apply_decision(
            &pending(),
            &DecisionInput { verdict: Verdict::Rejected, notes: Some("   ".to_owned()) },
            &user("head-1"),
            Utc::now(),
        )
        .expect_err("blank notes");
        assert!(matches!(error, DomainError::Validation(_)));
    }

    #[test]
    fn second_decision_is_a_state_conflict() {
        let rejected = apply_decision(
            &pending(),
            &DecisionInput {
                verdict: Verdict::Rejected,
                notes: Some("Out of warranty scope".to_owned()),
            },
            &user("head-1"),
            Utc::now(),
        )
        .expect("reject")
        .request;
        assert_eq!(rejected.status.kind(), RequestStatusKind::Rejected);

        for verdict in [Verdict::Approved, Verdict::Rejected] {
            let error = apply_decision(
                &rejected,
                &DecisionInput { verdict, notes: None },
                &user("head-2"),
                Utc::now(),
            )
            .expect_err("already decided");
            assert!(error.is_state_conflict());
        }
    }

    #[test]
    fn job_updates_need_an_approved_request() {
        let request = pending();
        let error = job(&request, JobUpdate::status_only(JobStatus::Received))
            .expect_err("pending request");
        assert!(error.is_state_conflict());

        let rejected = apply_decision(
            &request,
            &DecisionInput { verdict: Verdict::Rejected, notes: Some("No budget".to_owned()) },
            &user("head-1"),
            Utc::now(),
        )
        .expect("reject")
        .request;
        assert!(job(&rejected, JobUpdate::status_only(JobStatus::Diagnosing))
            .expect_err("rejected request")
            .is_state_conflict());
    }

    #[test]
    fn completed_requests_accept_no_further_job_updates() {
        let received =
            job(&approve(&pending()), JobUpdate::status_only(JobStatus::Received)).expect("receive");
        let replaced =
            job(&received, JobUpdate::status_only(JobStatus::Replaced)).expect("replace");
        assert_eq!(replaced.status.kind(), RequestStatusKind::Completed);

        assert!(job(&replaced, JobUpdate::status_only(JobStatus::Repairing))
            .expect_err("terminal")
            .is_state_conflict());
    }

    #[test]
    fn completion_before_receipt_is_refused() {
        let approved = approve(&pending());
        let error =
            job(&approved, JobUpdate::status_only(JobStatus::Completed)).expect_err("not received");
        assert_eq!(
            error,
            DomainError::InvalidState {
                subject: "repair request",
                status: "approved".to_owned(),
                operation: "complete",
            }
        );
    }

    #[test]
    fn working_update_before_receipt_keeps_request_approved() {
        let diagnosing = job(&approve(&pending()), JobUpdate::status_only(JobStatus::Diagnosing))
            .expect("diagnose");
        assert_eq!(diagnosing.status, RequestStatus::Approved { job: Some(JobStatus::Diagnosing) });
        assert!(diagnosing.job.received_at.is_none());

        let received =
            job(&diagnosing, JobUpdate::status_only(JobStatus::Received)).expect("receive");
        assert_eq!(received.status.kind(), RequestStatusKind::InProgress);
    }

    #[test]
    fn sparse_update_keeps_previous_job_fields() {
        let received =
            job(&approve(&pending()), JobUpdate::status_only(JobStatus::Received)).expect("receive");
        let received_at = received.job.received_at;
        let costed = job(
            &received,
            JobUpdate {
                job_status: JobStatus::Repairing,
                repair_cost: Some(Decimal::new(4250, 2)),
                repair_notes: Some("Replaced backlight cable".to_owned()),
                resolution: Some(Resolution::Repair),
            },
        )
        .expect("cost");

        let waiting = job(&costed, JobUpdate::status_only(JobStatus::WaitingParts)).expect("wait");
        assert_eq!(waiting.job.repair_cost, Some(Decimal::new(4250, 2)));
        assert_eq!(waiting.job.repair_notes.as_deref(), Some("Replaced backlight cable"));
        assert_eq!(waiting.job.resolution, Some(Resolution::Repair));
        assert_eq!(waiting.job.received_at, received_at);
    }

    #[test]
    fn negative_cost_is_invalid() {
        let received =
            job(&approve(&pending()), JobUpdate::status_only(JobStatus::Received)).expect("receive");
        let error = job(
            &received,
            JobUpdate {
                job_status: JobStatus::Repairing,
                repair_cost: Some(Decimal::new(-1, 0)),
                repair_notes: None,
                resolution: None,
            },
        )
        .expect_err("negative cost");
        assert!(matches!(error, DomainError::Validation(_)));
    }

    #[test]
    fn last_job_writer_becomes_assignee() {
        let received =
            job(&approve(&pending()), JobUpdate::status_only(JobStatus::Received)).expect("receive");
        let later = apply_job_update(
            &received,
            &JobUpdate::status_only(JobStatus::Repairing),
            &user("tech-2"),
            Utc::now() + Duration::minutes(5),
        )
        .expect("second tech")
        .request;
        assert_eq!(later.job.assigned_to, Some(user("tech-2")));
        assert_eq!(later.job.received_at, received.job.received_at);
    }

    #[test]
    fn transition_record_tracks_edge_and_version() {
        let request = pending();
        let transition = apply_decision(
            &request,
            &DecisionInput { verdict: Verdict::Approved, notes: Some("ok".to_owned()) },
            &user("head-1"),
            Utc::now(),
        )
        .expect("approve");

        assert_eq!(transition.from, Some(RequestStatusKind::Pending));
        assert_eq!(transition.to, RequestStatusKind::Approved);
        assert_eq!(transition.record.from_status.as_deref(), Some("pending"));
        assert_eq!(transition.record.to_status, "approved");
        assert_eq!(transition.record.state_version, 2);
    }

    #[test]
    fn assignment_approval_yields_single_grant() {
        let (assignment, _) =
            file_assignment(user("u-1"), BranchId("B1".to_owned()), Role::BranchHead, Utc::now())
                .expect("file");
        let transition = apply_assignment_decision(
            &assignment,
            &AssignmentDecisionInput { verdict: Verdict::Approved, notes: None },
            &user("admin-1"),
            Utc::now(),
        )
        .expect("approve");

        assert_eq!(transition.assignment.status, AssignmentStatus::Approved);
        let grant = transition.grant.expect("grant");
        assert_eq!(grant.role, Role::BranchHead);
        assert_eq!(grant.branch_id, Some(BranchId("B1".to_owned())));

        let error = apply_assignment_decision(
            &transition.assignment,
            &AssignmentDecisionInput { verdict: Verdict::Rejected, notes: None },
            &user("admin-1"),
            Utc::now(),
        )
        .expect_err("already decided");
        assert!(error.is_state_conflict());
    }

    #[test]
    fn assignment_rejection_yields_no_grant() {
        let (assignment, _) =
            file_assignment(user("u-1"), BranchId("B1".to_owned()), Role::ItUnit, Utc::now())
                .expect("file");
        let transition = apply_assignment_decision(
            &assignment,
            &AssignmentDecisionInput { verdict: Verdict::Rejected, notes: Some("no".to_owned()) },
            &user("admin-1"),
            Utc::now(),
        )
        .expect("reject");
        assert_eq!(transition.assignment.status, AssignmentStatus::Rejected);
        assert!(transition.grant.is_none());
    }
}
