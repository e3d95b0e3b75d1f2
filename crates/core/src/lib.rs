pub mod config;
pub mod domain;
pub mod errors;
pub mod policy;
pub mod workflow;

pub use chrono;
pub use rust_decimal;

pub use domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
pub use domain::branch::{Branch, BranchId};
pub use domain::equipment::{Equipment, EquipmentCondition, EquipmentId};
pub use domain::repair::{
    BranchHeadDecision, JobRecord, JobStatus, NewRepairRequest, RepairRequest, RepairRequestId,
    RequestStatus, RequestStatusKind, RequestType, Resolution, Verdict,
};
pub use domain::role::{Role, RoleGrant, UserId};
pub use domain::transition::{TransitionEvent, TransitionRecord, TransitionSubject};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use policy::{AccessDecision, AccessDenial, AccessPolicy, Action, Caller};
