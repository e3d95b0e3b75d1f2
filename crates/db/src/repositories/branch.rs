use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fixtrack_core::domain::branch::{Branch, BranchId};

use super::{column_error, decode_timestamp, encode_timestamp, BranchRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBranchRepository {
    pool: DbPool,
}

impl SqlBranchRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_branch(row: &SqliteRow) -> Result<Branch, RepositoryError> {
    let created_at: String = row.try_get("created_at").map_err(column_error)?;
    Ok(Branch {
        id: BranchId(row.try_get("id").map_err(column_error)?),
        code: row.try_get("code").map_err(column_error)?,
        name: row.try_get("name").map_err(column_error)?,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl BranchRepository for SqlBranchRepository {
    async fn find_by_id(&self, id: &BranchId) -> Result<Option<Branch>, RepositoryError> {
        let row = sqlx::query("SELECT id, code, name, created_at FROM branch WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_branch).transpose()
    }

    async fn list(&self) -> Result<Vec<Branch>, RepositoryError> {
        let rows = sqlx::query("SELECT id, code, name, created_at FROM branch ORDER BY code ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_branch).collect()
    }

    async fn save(&self, branch: Branch) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO branch (id, code, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 name = excluded.name",
        )
        .bind(&branch.id.0)
        .bind(&branch.code)
        .bind(&branch.name)
        .bind(encode_timestamp(&branch.created_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::classify)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use fixtrack_core::domain::branch::{Branch, BranchId};

    use super::SqlBranchRepository;
    use crate::repositories::{BranchRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    fn branch(id: &str, code: &str) -> Branch {
        Branch {
            id: BranchId(id.to_owned()),
            code: code.to_owned(),
            name: format!("{code} office"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_upserts_and_lists_by_code() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlBranchRepository::new(pool);

        repo.save(branch("br-2", "SOUTH")).await.expect("save south");
        repo.save(branch("br-1", "NORTH")).await.expect("save north");
        let mut renamed = branch("br-1", "NORTH");
        renamed.name = "Head office".to_owned();
        repo.save(renamed).await.expect("rename");

        let listed = repo.list().await.expect("list");
        assert_eq!(listed.iter().map(|b| b.code.as_str()).collect::<Vec<_>>(), ["NORTH", "SOUTH"]);
        let found = repo.find_by_id(&BranchId("br-1".to_owned())).await.expect("find");
        assert_eq!(found.map(|b| b.name), Some("Head office".to_owned()));
    }

    #[tokio::test]
    async fn duplicate_code_is_reported_as_duplicate() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlBranchRepository::new(pool);

        repo.save(branch("br-1", "NORTH")).await.expect("first");
        let error = repo.save(branch("br-9", "NORTH")).await.expect_err("duplicate code");

        assert!(matches!(error, RepositoryError::Duplicate(_)));
    }
}
