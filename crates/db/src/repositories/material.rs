use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use almox_core::domain::material::{Material, MaterialId};

use super::{encode_timestamp, MaterialRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMaterialRepository {
    pool: DbPool,
}

impl SqlMaterialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_material(row: &SqliteRow) -> Result<Material, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unit_of_measure: String =
        row.try_get("unit_of_measure").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unit_price: String =
        row.try_get("unit_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: bool = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let unit_price = Decimal::from_str(&unit_price).map_err(|e| {
        RepositoryError::Decode(format!("unit_price `{unit_price}` for material {id}: {e}"))
    })?;

    Ok(Material { id: MaterialId(id), name, unit_of_measure, unit_price, active })
}

#[async_trait::async_trait]
impl MaterialRepository for SqlMaterialRepository {
    async fn find_by_id(&self, id: &MaterialId) -> Result<Option<Material>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, unit_of_measure, unit_price, active FROM material WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_material).transpose()
    }

    async fn save(&self, material: Material) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO material (id, name, unit_of_measure, unit_price, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 unit_of_measure = excluded.unit_of_measure,
                 unit_price = excluded.unit_price,
                 active = excluded.active",
        )
        .bind(&material.id.0)
        .bind(&material.name)
        .bind(&material.unit_of_measure)
        .bind(material.unit_price.to_string())
        .bind(material.active)
        .bind(encode_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use almox_core::domain::material::{Material, MaterialId};

    use super::SqlMaterialRepository;
    use crate::repositories::MaterialRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn save_upserts_and_keeps_decimal_precision() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlMaterialRepository::new(pool);

        let mut material = Material {
            id: MaterialId("7".to_string()),
            name: "Nitrile gloves".to_string(),
            unit_of_measure: "box".to_string(),
            unit_price: Decimal::new(1250, 2),
            active: true,
        };
        repo.save(material.clone()).await.expect("save");
        assert_eq!(repo.find_by_id(&material.id).await.expect("find"), Some(material.clone()));

        material.active = false;
        repo.save(material.clone()).await.expect("retire");
        let stored = repo.find_by_id(&material.id).await.expect("find").expect("exists");
        assert!(!stored.active);
        assert_eq!(stored.unit_price.to_string(), "12.50");

        assert_eq!(repo.find_by_id(&MaterialId("404".to_string())).await.expect("find"), None);
    }
}
