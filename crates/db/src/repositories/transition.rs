use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use fixtrack_core::domain::repair::JobStatus;
use fixtrack_core::domain::role::UserId;
use fixtrack_core::domain::transition::{
    TransitionEvent, TransitionId, TransitionRecord, TransitionSubject,
};

use super::{
    column_error, decode_enum, decode_timestamp, decode_version, encode_timestamp,
    RepositoryError, TransitionLog,
};
use crate::DbPool;

pub struct SqlTransitionLog {
    pool: DbPool,
}

impl SqlTransitionLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Appends a record on the caller's connection so it commits with the state
/// change it describes.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    record: &TransitionRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO workflow_transition
            (id, subject, subject_id, event, from_status, to_status, job_status,
             actor, state_version, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id.0)
    .bind(record.subject.as_str())
    .bind(&record.subject_id)
    .bind(record.event.as_str())
    .bind(record.from_status.as_deref())
    .bind(&record.to_status)
    .bind(record.job_status.map(|job| job.as_str()))
    .bind(&record.actor.0)
    .bind(i64::from(record.state_version))
    .bind(encode_timestamp(&record.occurred_at))
    .execute(&mut *conn)
    .await
    .map_err(RepositoryError::classify)?;

    Ok(())
}

fn row_to_record(row: &SqliteRow) -> Result<TransitionRecord, RepositoryError> {
    let subject: String = row.try_get("subject").map_err(column_error)?;
    let event: String = row.try_get("event").map_err(column_error)?;
    let job_status: Option<String> = row.try_get("job_status").map_err(column_error)?;
    let state_version: i64 = row.try_get("state_version").map_err(column_error)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(column_error)?;

    Ok(TransitionRecord {
        id: TransitionId(row.try_get("id").map_err(column_error)?),
        subject: decode_enum("subject", &subject, TransitionSubject::parse)?,
        subject_id: row.try_get("subject_id").map_err(column_error)?,
        event: decode_enum("event", &event, TransitionEvent::parse)?,
        from_status: row.try_get("from_status").map_err(column_error)?,
        to_status: row.try_get("to_status").map_err(column_error)?,
        job_status: job_status
            .map(|raw| decode_enum("job_status", &raw, JobStatus::parse))
            .transpose()?,
        actor: UserId(row.try_get("actor").map_err(column_error)?),
        state_version: decode_version("state_version", state_version)?,
        occurred_at: decode_timestamp("occurred_at", &occurred_at)?,
    })
}

#[async_trait::async_trait]
impl TransitionLog for SqlTransitionLog {
    async fn list_for_subject(
        &self,
        subject: TransitionSubject,
        subject_id: &str,
    ) -> Result<Vec<TransitionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, subject, subject_id, event, from_status, to_status, job_status,
                    actor, state_version, occurred_at
             FROM workflow_transition
             WHERE subject = ? AND subject_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(subject.as_str())
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
