use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use fixtrack_core::domain::branch::BranchId;
use fixtrack_core::domain::equipment::EquipmentId;
use fixtrack_core::domain::repair::{
    BranchHeadDecision, JobRecord, JobStatus, RepairRequest, RepairRequestId, RequestStatus,
    RequestStatusKind, RequestType, Resolution, Verdict,
};
use fixtrack_core::domain::role::UserId;
use fixtrack_core::domain::transition::TransitionRecord;

use super::transition::append;
use super::{
    column_error, decode_enum, decode_optional_timestamp, decode_timestamp, decode_version,
    encode_timestamp, ExpectedState, RepairRequestRepository, RepositoryError, RequestFilter,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, equipment_id, requested_by, branch_id, request_type,
    description, status, job_status, branch_head_decision, branch_head_notes, decided_by,
    decided_at, it_assigned_to, it_received_at, repair_cost, repair_notes, resolution,
    completed_at, state_version, created_at, updated_at";

pub struct SqlRepairRequestRepository {
    pool: DbPool,
}

impl SqlRepairRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_request(row: &SqliteRow) -> Result<RepairRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(column_error)?;
    let request_type: String = row.try_get("request_type").map_err(column_error)?;
    let status: String = row.try_get("status").map_err(column_error)?;
    let job_status: Option<String> = row.try_get("job_status").map_err(column_error)?;
    let verdict: Option<String> = row.try_get("branch_head_decision").map_err(column_error)?;
    let decided_by: Option<String> = row.try_get("decided_by").map_err(column_error)?;
    let decided_at: Option<String> = row.try_get("decided_at").map_err(column_error)?;
    let assigned_to: Option<String> = row.try_get("it_assigned_to").map_err(column_error)?;
    let received_at: Option<String> = row.try_get("it_received_at").map_err(column_error)?;
    let repair_cost: Option<String> = row.try_get("repair_cost").map_err(column_error)?;
    let resolution: Option<String> = row.try_get("resolution").map_err(column_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(column_error)?;
    let state_version: i64 = row.try_get("state_version").map_err(column_error)?;
    let created_at: String = row.try_get("created_at").map_err(column_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(column_error)?;

    let kind = decode_enum("status", &status, RequestStatusKind::parse)?;
    let job = job_status.map(|raw| decode_enum("job_status", &raw, JobStatus::parse)).transpose()?;
    let status = RequestStatus::from_parts(kind, job)
        .map_err(|e| RepositoryError::Decode(format!("request `{id}`: {e}")))?;

    let decision = match (verdict, decided_by, decided_at) {
        (None, None, None) => None,
        (Some(verdict), Some(decided_by), Some(decided_at)) => Some(BranchHeadDecision {
            verdict: decode_enum("branch_head_decision", &verdict, Verdict::parse)?,
            notes: row.try_get("branch_head_notes").map_err(column_error)?,
            decided_by: UserId(decided_by),
            decided_at: decode_timestamp("decided_at", &decided_at)?,
        }),
        _ => {
            return Err(RepositoryError::Decode(format!(
                "request `{id}`: partial branch head decision"
            )))
        }
    };

    let repair_cost = repair_cost
        .map(|raw| {
            Decimal::from_str(&raw)
                .map_err(|e| RepositoryError::Decode(format!("repair_cost `{raw}`: {e}")))
        })
        .transpose()?;

    let job = JobRecord {
        assigned_to: assigned_to.map(UserId),
        received_at: decode_optional_timestamp("it_received_at", received_at)?,
        repair_cost,
        repair_notes: row.try_get("repair_notes").map_err(column_error)?,
        resolution: resolution
            .map(|raw| decode_enum("resolution", &raw, Resolution::parse))
            .transpose()?,
        completed_at: decode_optional_timestamp("completed_at", completed_at)?,
    };

    Ok(RepairRequest {
        id: RepairRequestId(id),
        equipment_id: EquipmentId(row.try_get("equipment_id").map_err(column_error)?),
        requested_by: UserId(row.try_get("requested_by").map_err(column_error)?),
        branch_id: BranchId(row.try_get("branch_id").map_err(column_error)?),
        request_type: decode_enum("request_type", &request_type, RequestType::parse)?,
        description: row.try_get("description").map_err(column_error)?,
        status,
        decision,
        job,
        state_version: decode_version("state_version", state_version)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl RepairRequestRepository for SqlRepairRequestRepository {
    async fn find_by_id(
        &self,
        id: &RepairRequestId,
    ) -> Result<Option<RepairRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM repair_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<RepairRequest>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM repair_request WHERE 1 = 1"));

        if let Some(requested_by) = &filter.requested_by {
            builder.push(" AND requested_by = ").push_bind(requested_by.0.clone());
        }
        if let Some(branch_id) = &filter.branch_id {
            builder.push(" AND branch_id = ").push_bind(branch_id.0.clone());
        }
        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut statuses = builder.separated(", ");
            for status in &filter.statuses {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn insert(
        &self,
        request: &RepairRequest,
        record: &TransitionRecord,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO repair_request (id, equipment_id, requested_by, branch_id, request_type,
                                         description, status, job_status, state_version,
                                         created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.equipment_id.0)
        .bind(&request.requested_by.0)
        .bind(&request.branch_id.0)
        .bind(request.request_type.as_str())
        .bind(&request.description)
        .bind(request.status.kind().as_str())
        .bind(request.status.job_status().map(|job| job.as_str()))
        .bind(i64::from(request.state_version))
        .bind(encode_timestamp(&request.created_at))
        .bind(encode_timestamp(&request.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::classify)?;

        append(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_if_current(
        &self,
        expected: ExpectedState,
        updated: &RepairRequest,
        record: &TransitionRecord,
    ) -> Result<bool, RepositoryError> {
        let decision = updated.decision.as_ref();
        let job = &updated.job;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE repair_request SET
                 status = ?,
                 job_status = ?,
                 branch_head_decision = ?,
                 branch_head_notes = ?,
                 decided_by = ?,
                 decided_at = ?,
                 it_assigned_to = ?,
                 it_received_at = ?,
                 repair_cost = ?,
                 repair_notes = ?,
                 resolution = ?,
                 completed_at = ?,
                 state_version = ?,
                 updated_at = ?
             WHERE id = ? AND status = ? AND state_version = ?",
        )
        .bind(updated.status.kind().as_str())
        .bind(updated.status.job_status().map(|status| status.as_str()))
        .bind(decision.map(|d| d.verdict.as_str()))
        .bind(decision.and_then(|d| d.notes.clone()))
        .bind(decision.map(|d| d.decided_by.0.clone()))
        .bind(decision.map(|d| encode_timestamp(&d.decided_at)))
        .bind(job.assigned_to.as_ref().map(|user| user.0.clone()))
        .bind(job.received_at.as_ref().map(encode_timestamp))
        .bind(job.repair_cost.map(|cost| cost.to_string()))
        .bind(job.repair_notes.clone())
        .bind(job.resolution.map(|resolution| resolution.as_str()))
        .bind(job.completed_at.as_ref().map(encode_timestamp))
        .bind(i64::from(updated.state_version))
        .bind(encode_timestamp(&updated.updated_at))
        .bind(&updated.id.0)
        .bind(expected.status.as_str())
        .bind(i64::from(expected.state_version))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::classify)?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        append(&mut tx, record).await?;
        tx.commit().await?;
        Ok(true)
    }
}
