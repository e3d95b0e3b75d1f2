use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::assignment::UserBranchAssignment;
use crate::domain::repair::{JobStatus, RepairRequest, RequestStatusKind, Resolution, Verdict};
use crate::domain::role::RoleGrant;
use crate::domain::transition::TransitionRecord;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub verdict: Verdict,
    pub notes: Option<String>,
}

/// A job update from the IT unit. `None` fields leave the stored value alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_status: JobStatus,
    pub repair_cost: Option<Decimal>,
    pub repair_notes: Option<String>,
    pub resolution: Option<Resolution>,
}

impl JobUpdate {
    pub fn status_only(job_status: JobStatus) -> Self {
        Self { job_status, repair_cost: None, repair_notes: None, resolution: None }
    }
}

/// Named listing views. Results are always narrowed by the caller's visibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListScope {
    /// Requests the caller filed.
    #[default]
    My,
    /// Requests awaiting a branch-head decision.
    Branch,
    /// Requests past approval, the IT queue.
    Approved,
    All,
}

impl ListScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::My => "my",
            Self::Branch => "branch",
            Self::Approved => "approved",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "my" | "mine" => Some(Self::My),
            "branch" => Some(Self::Branch),
            "approved" => Some(Self::Approved),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn statuses(&self) -> &'static [RequestStatusKind] {
        match self {
            Self::Branch => &[RequestStatusKind::Pending],
            Self::Approved => &[
                RequestStatusKind::Approved,
                RequestStatusKind::InProgress,
                RequestStatusKind::Completed,
            ],
            Self::My | Self::All => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentDecisionInput {
    pub verdict: Verdict,
    pub notes: Option<String>,
}

/// Result of a request transition: the record to persist, the status it
/// must still be in when written, and the history entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTransition {
    pub from: Option<RequestStatusKind>,
    pub to: RequestStatusKind,
    pub request: RepairRequest,
    pub record: TransitionRecord,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignmentTransition {
    pub assignment: UserBranchAssignment,
    /// Present only on approval; replaces every grant the user holds.
    pub grant: Option<RoleGrant>,
    pub record: TransitionRecord,
}
