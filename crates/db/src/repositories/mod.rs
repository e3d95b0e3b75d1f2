use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use fixtrack_core::domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
use fixtrack_core::domain::branch::{Branch, BranchId};
use fixtrack_core::domain::equipment::{Equipment, EquipmentId};
use fixtrack_core::domain::repair::{RepairRequest, RepairRequestId, RequestStatusKind};
use fixtrack_core::domain::role::{RoleGrant, UserId};
use fixtrack_core::domain::transition::{TransitionRecord, TransitionSubject};
use fixtrack_core::errors::{ApplicationError, DomainError};

use crate::DbPool;

pub mod access;
pub mod branch;
pub mod equipment;
pub mod memory;
pub mod repair_request;
pub mod transition;

pub use access::SqlAccessRepository;
pub use branch::SqlBranchRepository;
pub use equipment::SqlEquipmentRepository;
pub use memory::InMemoryWorkflowStore;
pub use repair_request::SqlRepairRequestRepository;
pub use transition::SqlTransitionLog;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("referenced record does not exist: {0}")]
    MissingReference(String),
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

impl RepositoryError {
    /// Sorts constraint failures out of generic database errors so callers
    /// can report them as bad input instead of outages.
    pub(crate) fn classify(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_foreign_key_violation() {
                return Self::MissingReference(db_error.message().to_owned());
            }
            if db_error.is_unique_violation() {
                return Self::Duplicate(db_error.message().to_owned());
            }
        }
        Self::Database(error)
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::MissingReference(message) | RepositoryError::Duplicate(message) => {
                ApplicationError::Domain(DomainError::Validation(message))
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Status and version a stored row must still carry for a conditional write
/// to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpectedState {
    pub status: RequestStatusKind,
    pub state_version: u32,
}

impl ExpectedState {
    pub fn of(request: &RepairRequest) -> Self {
        Self { status: request.status.kind(), state_version: request.state_version }
    }
}

/// Storage-level narrowing for request listings. Empty fields do not filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub requested_by: Option<UserId>,
    pub branch_id: Option<BranchId>,
    pub statuses: Vec<RequestStatusKind>,
}

impl RequestFilter {
    pub fn matches(&self, request: &RepairRequest) -> bool {
        self.requested_by.as_ref().map_or(true, |user| &request.requested_by == user)
            && self.branch_id.as_ref().map_or(true, |branch| &request.branch_id == branch)
            && (self.statuses.is_empty() || self.statuses.contains(&request.status.kind()))
    }
}

#[async_trait]
pub trait BranchRepository: Send + Sync {
    async fn find_by_id(&self, id: &BranchId) -> Result<Option<Branch>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Branch>, RepositoryError>;
    async fn save(&self, branch: Branch) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EquipmentRepository: Send + Sync {
    async fn find_by_id(&self, id: &EquipmentId) -> Result<Option<Equipment>, RepositoryError>;
    async fn find_by_serial(&self, serial: &str) -> Result<Option<Equipment>, RepositoryError>;
    async fn list_by_branch(&self, branch_id: &BranchId)
        -> Result<Vec<Equipment>, RepositoryError>;
    async fn save(&self, equipment: Equipment) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RepairRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &RepairRequestId,
    ) -> Result<Option<RepairRequest>, RepositoryError>;

    /// Newest first.
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<RepairRequest>, RepositoryError>;

    /// Stores a new request together with its creation record.
    async fn insert(
        &self,
        request: &RepairRequest,
        record: &TransitionRecord,
    ) -> Result<(), RepositoryError>;

    /// Writes `updated` and appends `record` only while the stored row still
    /// matches `expected`. Returns `false` when another writer got there first.
    async fn update_if_current(
        &self,
        expected: ExpectedState,
        updated: &RepairRequest,
        record: &TransitionRecord,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn grants_for(&self, user_id: &UserId) -> Result<Vec<RoleGrant>, RepositoryError>;

    /// Replaces every grant the user holds with `grant`.
    async fn set_role(&self, grant: &RoleGrant) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &AssignmentId,
    ) -> Result<Option<UserBranchAssignment>, RepositoryError>;

    /// Newest first.
    async fn list(
        &self,
        user_id: Option<&UserId>,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<UserBranchAssignment>, RepositoryError>;

    async fn insert(
        &self,
        assignment: &UserBranchAssignment,
        record: &TransitionRecord,
    ) -> Result<(), RepositoryError>;

    /// Records the decision while the stored row is still pending at
    /// `expected_version`. An approval grant replaces the user's roles in the
    /// same write. Returns `false` when the precondition no longer holds.
    async fn decide_if_pending(
        &self,
        expected_version: u32,
        decided: &UserBranchAssignment,
        grant: Option<&RoleGrant>,
        record: &TransitionRecord,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TransitionLog: Send + Sync {
    /// Oldest first.
    async fn list_for_subject(
        &self,
        subject: TransitionSubject,
        subject_id: &str,
    ) -> Result<Vec<TransitionRecord>, RepositoryError>;
}

/// Every store the workflow services need, behind trait objects so the SQL
/// and in-memory backends are interchangeable.
#[derive(Clone)]
pub struct Repositories {
    pub branches: Arc<dyn BranchRepository>,
    pub equipment: Arc<dyn EquipmentRepository>,
    pub requests: Arc<dyn RepairRequestRepository>,
    pub roles: Arc<dyn RoleDirectory>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub transitions: Arc<dyn TransitionLog>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        let access = Arc::new(SqlAccessRepository::new(pool.clone()));
        Self {
            branches: Arc::new(SqlBranchRepository::new(pool.clone())),
            equipment: Arc::new(SqlEquipmentRepository::new(pool.clone())),
            requests: Arc::new(SqlRepairRequestRepository::new(pool.clone())),
            roles: access.clone(),
            assignments: access,
            transitions: Arc::new(SqlTransitionLog::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryWorkflowStore::default());
        Self {
            branches: store.clone(),
            equipment: store.clone(),
            requests: store.clone(),
            roles: store.clone(),
            assignments: store.clone(),
            transitions: store,
        }
    }
}

pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| decode_timestamp(column, &raw)).transpose()
}

pub(crate) fn decode_enum<T>(
    column: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("{column}: unknown value `{value}`")))
}

pub(crate) fn decode_version(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: out of range value {value}")))
}

pub(crate) fn column_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use fixtrack_core::errors::{ApplicationError, DomainError};

    use super::{decode_timestamp, encode_timestamp, RepositoryError};

    #[test]
    fn timestamps_keep_full_precision_and_sort_lexically() {
        let earlier = Utc.timestamp_opt(1_760_000_000, 5).single().expect("ts");
        let later = Utc.timestamp_opt(1_760_000_000, 123_456_789).single().expect("ts");

        let (a, b) = (encode_timestamp(&earlier), encode_timestamp(&later));
        assert!(a < b);
        assert_eq!(decode_timestamp("created_at", &b).expect("decode"), later);
    }

    #[test]
    fn constraint_failures_surface_as_validation_errors() {
        let error = ApplicationError::from(RepositoryError::MissingReference(
            "FOREIGN KEY constraint failed".to_owned(),
        ));
        assert!(matches!(error, ApplicationError::Domain(DomainError::Validation(_))));

        let error = ApplicationError::from(RepositoryError::Decode("status".to_owned()));
        assert!(matches!(error, ApplicationError::Persistence(_)));
    }
}
