use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::repair::JobStatus;
use crate::domain::role::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSubject {
    RepairRequest,
    BranchAssignment,
}

impl TransitionSubject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepairRequest => "repair_request",
            Self::BranchAssignment => "branch_assignment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "repair_request" => Some(Self::RepairRequest),
            "branch_assignment" => Some(Self::BranchAssignment),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    RequestCreated,
    RequestDecided,
    JobUpdated,
    AssignmentFiled,
    AssignmentDecided,
}

impl TransitionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request.created",
            Self::RequestDecided => "request.decided",
            Self::JobUpdated => "request.job_updated",
            Self::AssignmentFiled => "assignment.filed",
            Self::AssignmentDecided => "assignment.decided",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "request.created" => Some(Self::RequestCreated),
            "request.decided" => Some(Self::RequestDecided),
            "request.job_updated" => Some(Self::JobUpdated),
            "assignment.filed" => Some(Self::AssignmentFiled),
            "assignment.decided" => Some(Self::AssignmentDecided),
            _ => None,
        }
    }
}

/// Append-only history entry written alongside every state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: TransitionId,
    pub subject: TransitionSubject,
    pub subject_id: String,
    pub event: TransitionEvent,
    pub from_status: Option<String>,
    pub to_status: String,
    pub job_status: Option<JobStatus>,
    pub actor: UserId,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subject: TransitionSubject,
        subject_id: impl Into<String>,
        event: TransitionEvent,
        from_status: Option<&str>,
        to_status: &str,
        job_status: Option<JobStatus>,
        actor: UserId,
        state_version: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransitionId(Uuid::new_v4().to_string()),
            subject,
            subject_id: subject_id.into(),
            event,
            from_status: from_status.map(str::to_owned),
            to_status: to_status.to_owned(),
            job_status,
            actor,
            state_version,
            occurred_at,
        }
    }
}
