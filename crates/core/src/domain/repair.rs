use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::branch::BranchId;
use crate::domain::equipment::EquipmentId;
use crate::domain::role::UserId;
use crate::errors::DomainError;

pub const DESCRIPTION_MIN_CHARS: usize = 10;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepairRequestId(pub String);

impl RepairRequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Damage,
    Malfunction,
    Repair,
    Replacement,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Damage => "damage",
            Self::Malfunction => "malfunction",
            Self::Repair => "repair",
            Self::Replacement => "replacement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "damage" => Some(Self::Damage),
            "malfunction" => Some(Self::Malfunction),
            "repair" => Some(Self::Repair),
            "replacement" => Some(Self::Replacement),
            _ => None,
        }
    }
}

/// Inner progress of IT-unit work. The four working values carry no ordering;
/// `Completed` and `Replaced` close the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Received,
    Diagnosing,
    Repairing,
    WaitingParts,
    Completed,
    Replaced,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Diagnosing => "diagnosing",
            Self::Repairing => "repairing",
            Self::WaitingParts => "waiting_parts",
            Self::Completed => "completed",
            Self::Replaced => "replaced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "received" => Some(Self::Received),
            "diagnosing" => Some(Self::Diagnosing),
            "repairing" => Some(Self::Repairing),
            "waiting_parts" => Some(Self::WaitingParts),
            "completed" => Some(Self::Completed),
            "replaced" => Some(Self::Replaced),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Replaced)
    }
}

/// What the IT unit decided to do with the equipment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Repair,
    Replace,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Replace => "replace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "repair" => Some(Self::Repair),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Flat status as stored and filtered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatusKind {
    Pending,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Cancelled)
    }

    /// Whether the IT unit queue shows requests in this state.
    pub fn is_past_approval(&self) -> bool {
        matches!(self, Self::Approved | Self::InProgress | Self::Completed)
    }
}

impl std::fmt::Display for RequestStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a request. Job progress only exists once the branch head
/// approved, so it travels inside the variants that allow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved { job: Option<JobStatus> },
    Rejected,
    InProgress { job: JobStatus },
    Completed { job: JobStatus },
    Cancelled,
}

impl RequestStatus {
    pub fn kind(&self) -> RequestStatusKind {
        match self {
            Self::Pending => RequestStatusKind::Pending,
            Self::Approved { .. } => RequestStatusKind::Approved,
            Self::Rejected => RequestStatusKind::Rejected,
            Self::InProgress { .. } => RequestStatusKind::InProgress,
            Self::Completed { .. } => RequestStatusKind::Completed,
            Self::Cancelled => RequestStatusKind::Cancelled,
        }
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            Self::Approved { job } => *job,
            Self::InProgress { job } | Self::Completed { job } => Some(*job),
            Self::Pending | Self::Rejected | Self::Cancelled => None,
        }
    }

    /// Rebuilds the variant from its stored columns, refusing combinations the
    /// lifecycle cannot produce.
    pub fn from_parts(
        kind: RequestStatusKind,
        job: Option<JobStatus>,
    ) -> Result<Self, DomainError> {
        let illegal = || {
            DomainError::Validation(format!(
                "job status `{}` cannot accompany request status `{kind}`",
                job.map(|job| job.as_str()).unwrap_or("none")
            ))
        };

        match (kind, job) {
            (RequestStatusKind::Pending, None) => Ok(Self::Pending),
            (RequestStatusKind::Rejected, None) => Ok(Self::Rejected),
            (RequestStatusKind::Cancelled, None) => Ok(Self::Cancelled),
            (RequestStatusKind::Approved, job) if !job.is_some_and(|job| job.is_terminal()) => {
                Ok(Self::Approved { job })
            }
            (RequestStatusKind::InProgress, Some(job)) if !job.is_terminal() => {
                Ok(Self::InProgress { job })
            }
            (RequestStatusKind::Completed, Some(job)) if job.is_terminal() => {
                Ok(Self::Completed { job })
            }
            _ => Err(illegal()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHeadDecision {
    pub verdict: Verdict,
    pub notes: Option<String>,
    pub decided_by: UserId,
    pub decided_at: DateTime<Utc>,
}

/// Fields written by the IT unit. Cost, notes and resolution are sparse: an
/// update that omits them keeps whatever an earlier update stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub assigned_to: Option<UserId>,
    pub received_at: Option<DateTime<Utc>>,
    pub repair_cost: Option<Decimal>,
    pub repair_notes: Option<String>,
    pub resolution: Option<Resolution>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub id: RepairRequestId,
    pub equipment_id: EquipmentId,
    pub requested_by: UserId,
    pub branch_id: BranchId,
    pub request_type: RequestType,
    pub description: String,
    pub status: RequestStatus,
    pub decision: Option<BranchHeadDecision>,
    pub job: JobRecord,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRepairRequest {
    pub equipment_id: EquipmentId,
    pub branch_id: BranchId,
    pub request_type: RequestType,
    pub description: String,
}

impl NewRepairRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.equipment_id.0.trim().is_empty() {
            return Err(DomainError::Validation("equipment reference is required".to_owned()));
        }
        if self.branch_id.0.trim().is_empty() {
            return Err(DomainError::Validation("branch reference is required".to_owned()));
        }
        validate_description(&self.description)
    }
}

pub fn validate_description(description: &str) -> Result<(), DomainError> {
    let length = description.trim().chars().count();
    if !(DESCRIPTION_MIN_CHARS..=DESCRIPTION_MAX_CHARS).contains(&length) {
        return Err(DomainError::Validation(format!(
            "description must be between {DESCRIPTION_MIN_CHARS} and {DESCRIPTION_MAX_CHARS} characters (got {length})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        validate_description, EquipmentId, JobStatus, NewRepairRequest, RequestStatus,
        RequestStatusKind, RequestType,
    };
    use crate::domain::branch::BranchId;
    use crate::errors::DomainError;

    fn input(description: &str) -> NewRepairRequest {
        NewRepairRequest {
            equipment_id: EquipmentId("E1".to_owned()),
            branch_id: BranchId("B1".to_owned()),
            request_type: RequestType::Malfunction,
            description: description.to_owned(),
        }
    }

    #[test]
    fn description_bounds_are_inclusive() {
        assert!(validate_description(&"x".repeat(10)).is_ok());
        assert!(validate_description(&"x".repeat(500)).is_ok());
        assert!(matches!(validate_description(&"x".repeat(9)), Err(DomainError::Validation(_))));
        assert!(matches!(validate_description(&"x".repeat(501)), Err(DomainError::Validation(_))));
    }

    #[test]
    fn description_length_ignores_surrounding_whitespace() {
        assert!(validate_description("   too short   ").is_err());
        assert!(validate_description("  Screen flickers  ").is_ok());
    }

    #[test]
    fn blank_references_are_rejected() {
        let mut missing_equipment = input("Screen flickers intermittently");
        missing_equipment.equipment_id = EquipmentId("  ".to_owned());
        assert!(matches!(missing_equipment.validate(), Err(DomainError::Validation(_))));

        let mut missing_branch = input("Screen flickers intermittently");
        missing_branch.branch_id = BranchId(String::new());
        assert!(matches!(missing_branch.validate(), Err(DomainError::Validation(_))));

        assert!(input("Screen flickers intermittently").validate().is_ok());
    }

    #[test]
    fn status_from_parts_rejects_job_progress_outside_approval() {
        assert!(RequestStatus::from_parts(RequestStatusKind::Pending, Some(JobStatus::Received))
            .is_err());
        assert!(RequestStatus::from_parts(RequestStatusKind::Rejected, Some(JobStatus::Repairing))
            .is_err());
        assert!(RequestStatus::from_parts(RequestStatusKind::InProgress, None).is_err());
        assert!(RequestStatus::from_parts(
            RequestStatusKind::InProgress,
            Some(JobStatus::Completed)
        )
        .is_err());
        assert!(RequestStatus::from_parts(RequestStatusKind::Completed, Some(JobStatus::Repairing))
            .is_err());
    }

    #[test]
    fn status_from_parts_accepts_lifecycle_shapes() {
        assert_eq!(
            RequestStatus::from_parts(RequestStatusKind::Approved, None).expect("approved"),
            RequestStatus::Approved { job: None }
        );
        assert_eq!(
            RequestStatus::from_parts(RequestStatusKind::InProgress, Some(JobStatus::WaitingParts))
                .expect("in progress"),
            RequestStatus::InProgress { job: JobStatus::WaitingParts }
        );
        let completed =
            RequestStatus::from_parts(RequestStatusKind::Completed, Some(JobStatus::Replaced))
                .expect("completed");
        assert_eq!(completed.kind(), RequestStatusKind::Completed);
        assert_eq!(completed.job_status(), Some(JobStatus::Replaced));
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(RequestStatus::InProgress { job: JobStatus::Diagnosing })
            .expect("serialize");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["job"], "diagnosing");
    }
}
