use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use fixtrack_core::domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
use fixtrack_core::domain::branch::BranchId;
use fixtrack_core::domain::role::{Role, RoleGrant, UserId};
use fixtrack_core::domain::transition::TransitionRecord;

use super::transition::append;
use super::{
    column_error, decode_enum, decode_optional_timestamp, decode_timestamp, decode_version,
    encode_timestamp, AssignmentRepository, RepositoryError, RoleDirectory,
};
use crate::DbPool;

const ASSIGNMENT_COLUMNS: &str = "id, user_id, branch_id, requested_role, status, approved_by,
    approved_at, notes, state_version, created_at, updated_at";

/// Role grants and branch assignments share one store so that approving an
/// assignment and replacing the user's roles commit together.
pub struct SqlAccessRepository {
    pool: DbPool,
}

impl SqlAccessRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn replace_roles(
    conn: &mut SqliteConnection,
    grant: &RoleGrant,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM user_role WHERE user_id = ?")
        .bind(&grant.user_id.0)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO user_role (user_id, role, branch_id, granted_by, granted_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&grant.user_id.0)
    .bind(grant.role.as_str())
    .bind(grant.branch_id.as_ref().map(|branch| branch.0.clone()))
    .bind(grant.granted_by.as_ref().map(|user| user.0.clone()))
    .bind(encode_timestamp(&grant.granted_at))
    .execute(&mut *conn)
    .await
    .map_err(RepositoryError::classify)?;

    Ok(())
}

fn row_to_grant(row: &SqliteRow) -> Result<RoleGrant, RepositoryError> {
    let role: String = row.try_get("role").map_err(column_error)?;
    let branch_id: Option<String> = row.try_get("branch_id").map_err(column_error)?;
    let granted_by: Option<String> = row.try_get("granted_by").map_err(column_error)?;
    let granted_at: String = row.try_get("granted_at").map_err(column_error)?;

    Ok(RoleGrant {
        user_id: UserId(row.try_get("user_id").map_err(column_error)?),
        role: decode_enum("role", &role, Role::parse)?,
        branch_id: branch_id.map(BranchId),
        granted_by: granted_by.map(UserId),
        granted_at: decode_timestamp("granted_at", &granted_at)?,
    })
}

fn row_to_assignment(row: &SqliteRow) -> Result<UserBranchAssignment, RepositoryError> {
    let requested_role: String = row.try_get("requested_role").map_err(column_error)?;
    let status: String = row.try_get("status").map_err(column_error)?;
    let approved_by: Option<String> = row.try_get("approved_by").map_err(column_error)?;
    let approved_at: Option<String> = row.try_get("approved_at").map_err(column_error)?;
    let state_version: i64 = row.try_get("state_version").map_err(column_error)?;
    let created_at: String = row.try_get("created_at").map_err(column_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(column_error)?;

    Ok(UserBranchAssignment {
        id: AssignmentId(row.try_get("id").map_err(column_error)?),
        user_id: UserId(row.try_get("user_id").map_err(column_error)?),
        branch_id: BranchId(row.try_get("branch_id").map_err(column_error)?),
        requested_role: decode_enum("requested_role", &requested_role, Role::parse)?,
        status: decode_enum("status", &status, AssignmentStatus::parse)?,
        approved_by: approved_by.map(UserId),
        approved_at: decode_optional_timestamp("approved_at", approved_at)?,
        notes: row.try_get("notes").map_err(column_error)?,
        state_version: decode_version("state_version", state_version)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl RoleDirectory for SqlAccessRepository {
    async fn grants_for(&self, user_id: &UserId) -> Result<Vec<RoleGrant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, role, branch_id, granted_by, granted_at
             FROM user_role WHERE user_id = ?
             ORDER BY granted_at ASC, id ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_grant).collect()
    }

    async fn set_role(&self, grant: &RoleGrant) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        replace_roles(&mut tx, grant).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for SqlAccessRepository {
    async fn find_by_id(
        &self,
        id: &AssignmentId,
    ) -> Result<Option<UserBranchAssignment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_branch_assignment WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_assignment).transpose()
    }

    async fn list(
        &self,
        user_id: Option<&UserId>,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<UserBranchAssignment>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_branch_assignment WHERE 1 = 1"
        ));
        if let Some(user_id) = user_id {
            builder.push(" AND user_id = ").push_bind(user_id.0.clone());
        }
        if let Some(status) = status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_assignment).collect()
    }

    async fn insert(
        &self,
        assignment: &UserBranchAssignment,
        record: &TransitionRecord,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO user_branch_assignment
                (id, user_id, branch_id, requested_role, status, approved_by, approved_at,
                 notes, state_version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&assignment.id.0)
        .bind(&assignment.user_id.0)
        .bind(&assignment.branch_id.0)
        .bind(assignment.requested_role.as_str())
        .bind(assignment.status.as_str())
        .bind(assignment.approved_by.as_ref().map(|user| user.0.clone()))
        .bind(assignment.approved_at.as_ref().map(encode_timestamp))
        .bind(assignment.notes.clone())
        .bind(i64::from(assignment.state_version))
        .bind(encode_timestamp(&assignment.created_at))
        .bind(encode_timestamp(&assignment.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::classify)?;

        append(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn decide_if_pending(
        &self,
        expected_version: u32,
        decided: &UserBranchAssignment,
        grant: Option<&RoleGrant>,
        record: &TransitionRecord,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE user_branch_assignment SET
                 status = ?,
                 approved_by = ?,
                 approved_at = ?,
                 notes = ?,
                 state_version = ?,
                 updated_at = ?
             WHERE id = ? AND status = 'pending' AND state_version = ?",
        )
        .bind(decided.status.as_str())
        .bind(decided.approved_by.as_ref().map(|user| user.0.clone()))
        .bind(decided.approved_at.as_ref().map(encode_timestamp))
        .bind(decided.notes.clone())
        .bind(i64::from(decided.state_version))
        .bind(encode_timestamp(&decided.updated_at))
        .bind(&decided.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(grant) = grant {
            replace_roles(&mut tx, grant).await?;
        }
        append(&mut tx, record).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use fixtrack_core::domain::assignment::AssignmentStatus;
    use fixtrack_core::domain::branch::{Branch, BranchId};
    use fixtrack_core::domain::repair::Verdict;
    use fixtrack_core::domain::role::{Role, RoleGrant, UserId};
    use fixtrack_core::workflow::{
        apply_assignment_decision, file_assignment, AssignmentDecisionInput,
    };

    use super::SqlAccessRepository;
    use crate::repositories::{
        AssignmentRepository, BranchRepository, RepositoryError, RoleDirectory,
        SqlBranchRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let branches = SqlBranchRepository::new(pool.clone());
        for (id, code) in [("br-1", "NORTH"), ("br-2", "SOUTH")] {
            branches
                .save(Branch {
                    id: BranchId(id.to_owned()),
                    code: code.to_owned(),
                    name: code.to_owned(),
                    created_at: Utc::now(),
                })
                .await
                .expect("branch");
        }
        pool
    }

    fn grant(user: &str, role: Role, branch: &str) -> RoleGrant {
        RoleGrant {
            user_id: UserId(user.to_owned()),
            role,
            branch_id: Some(BranchId(branch.to_owned())),
            granted_by: Some(UserId("admin-1".to_owned())),
            granted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn set_role_replaces_all_previous_grants() {
        let repo = SqlAccessRepository::new(setup().await);
        let user = UserId("u-1".to_owned());

        repo.set_role(&grant("u-1", Role::Officer, "br-1")).await.expect("first");
        let mut later = grant("u-1", Role::BranchHead, "br-2");
        later.granted_at = Utc::now() + Duration::seconds(1);
        repo.set_role(&later).await.expect("second");

        let grants = repo.grants_for(&user).await.expect("grants");
        assert_eq!(grants, vec![later]);
    }

    #[tokio::test]
    async fn approving_assignment_swaps_roles_in_one_write() {
        let repo = SqlAccessRepository::new(setup().await);
        repo.set_role(&grant("u-1", Role::Officer, "br-1")).await.expect("seed role");

        let (pending, filed) = file_assignment(
            UserId("u-1".to_owned()),
            BranchId("br-2".to_owned()),
            Role::ItUnit,
            Utc::now(),
        )
        .expect("file");
        repo.insert(&pending, &filed).await.expect("insert");

        let decision = apply_assignment_decision(
            &pending,
            &AssignmentDecisionInput { verdict: Verdict::Approved, notes: None },
            &UserId("admin-1".to_owned()),
            Utc::now(),
        )
        .expect("decide");
        let applied = repo
            .decide_if_pending(
                pending.state_version,
                &decision.assignment,
                decision.grant.as_ref(),
                &decision.record,
            )
            .await
            .expect("apply");
        assert!(applied);

        let grants = repo.grants_for(&UserId("u-1".to_owned())).await.expect("grants");
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].role, Role::ItUnit);
        assert_eq!(grants[0].branch_id, Some(BranchId("br-2".to_owned())));

        let replay = repo
            .decide_if_pending(
                pending.state_version,
                &decision.assignment,
                decision.grant.as_ref(),
                &decision.record,
            )
            .await
            .expect("replay");
        assert!(!replay, "a decided assignment must not be decided twice");
    }

    #[tokio::test]
    async fn only_one_pending_assignment_per_user() {
        let repo = SqlAccessRepository::new(setup().await);
        let user = UserId("u-2".to_owned());

        let (first, record) =
            file_assignment(user.clone(), BranchId("br-1".to_owned()), Role::Officer, Utc::now())
                .expect("file");
        repo.insert(&first, &record).await.expect("first");
        let (second, record) =
            file_assignment(user.clone(), BranchId("br-2".to_owned()), Role::Officer, Utc::now())
                .expect("file");

        let error = repo.insert(&second, &record).await.expect_err("second pending");
        assert!(matches!(error, RepositoryError::Duplicate(_)));

        let pending = repo.list(Some(&user), Some(AssignmentStatus::Pending)).await.expect("list");
        assert_eq!(pending, vec![first]);
    }
}
