use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fixtrack_core::domain::branch::BranchId;
use fixtrack_core::domain::equipment::{Equipment, EquipmentCondition, EquipmentId};

use super::{
    column_error, decode_enum, decode_timestamp, encode_timestamp, EquipmentRepository,
    RepositoryError,
};
use crate::DbPool;

const EQUIPMENT_COLUMNS: &str = "id, serial_number, name, category, brand, model, condition,
                                 branch_id, created_at, updated_at";

pub struct SqlEquipmentRepository {
    pool: DbPool,
}

impl SqlEquipmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_equipment(row: &SqliteRow) -> Result<Equipment, RepositoryError> {
    let condition: String = row.try_get("condition").map_err(column_error)?;
    let created_at: String = row.try_get("created_at").map_err(column_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(column_error)?;

    Ok(Equipment {
        id: EquipmentId(row.try_get("id").map_err(column_error)?),
        serial_number: row.try_get("serial_number").map_err(column_error)?,
        name: row.try_get("name").map_err(column_error)?,
        category: row.try_get("category").map_err(column_error)?,
        brand: row.try_get("brand").map_err(column_error)?,
        model: row.try_get("model").map_err(column_error)?,
        condition: decode_enum("condition", &condition, EquipmentCondition::parse)?,
        branch_id: BranchId(row.try_get("branch_id").map_err(column_error)?),
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl EquipmentRepository for SqlEquipmentRepository {
    async fn find_by_id(&self, id: &EquipmentId) -> Result<Option<Equipment>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_equipment).transpose()
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Equipment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE serial_number = ?"
        ))
        .bind(serial.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_equipment).transpose()
    }

    async fn list_by_branch(
        &self,
        branch_id: &BranchId,
    ) -> Result<Vec<Equipment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE branch_id = ? ORDER BY serial_number"
        ))
        .bind(&branch_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_equipment).collect()
    }

    async fn save(&self, equipment: Equipment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO equipment (id, serial_number, name, category, brand, model, condition,
                                    branch_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 serial_number = excluded.serial_number,
                 name = excluded.name,
                 category = excluded.category,
                 brand = excluded.brand,
                 model = excluded.model,
                 condition = excluded.condition,
                 branch_id = excluded.branch_id,
                 updated_at = excluded.updated_at",
        )
        .bind(&equipment.id.0)
        .bind(equipment.serial_number.trim())
        .bind(&equipment.name)
        .bind(&equipment.category)
        .bind(&equipment.brand)
        .bind(&equipment.model)
        .bind(equipment.condition.as_str())
        .bind(&equipment.branch_id.0)
        .bind(encode_timestamp(&equipment.created_at))
        .bind(encode_timestamp(&equipment.updated_at))
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
    use fixtrack_core::domain::equipment::{Equipment, EquipmentCondition, EquipmentId};

    use super::SqlEquipmentRepository;
    use crate::repositories::{
        BranchRepository, EquipmentRepository, RepositoryError, SqlBranchRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlBranchRepository::new(pool.clone())
            .save(Branch {
                id: BranchId("br-1".to_owned()),
                code: "NORTH".to_owned(),
                name: "North office".to_owned(),
                created_at: Utc::now(),
            })
            .await
            .expect("seed branch");
        pool
    }

    fn laptop(id: &str, serial: &str, branch: &str) -> Equipment {
        let now = Utc::now();
        Equipment {
            id: EquipmentId(id.to_owned()),
            serial_number: serial.to_owned(),
            name: "Latitude 5440".to_owned(),
            category: "laptop".to_owned(),
            brand: Some("Dell".to_owned()),
            model: None,
            condition: EquipmentCondition::Good,
            branch_id: BranchId(branch.to_owned()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_then_find_by_id_and_serial() {
        let repo = SqlEquipmentRepository::new(setup().await);
        let item = laptop("eq-1", "SN-100", "br-1");

        repo.save(item.clone()).await.expect("save");

        let by_id = repo.find_by_id(&EquipmentId("eq-1".to_owned())).await.expect("find");
        assert_eq!(by_id, Some(item.clone()));
        let by_serial = repo.find_by_serial(" SN-100 ").await.expect("find serial");
        assert_eq!(by_serial.map(|e| e.id), Some(item.id));
        assert_eq!(
            repo.list_by_branch(&BranchId("br-1".to_owned())).await.expect("list").len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_branch_is_a_missing_reference() {
        let repo = SqlEquipmentRepository::new(setup().await);

        let error = repo.save(laptop("eq-2", "SN-200", "br-404")).await.expect_err("fk");

        assert!(matches!(error, RepositoryError::MissingReference(_)));
    }
}
