use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use almox_core::domain::principal::{Principal, Role, UserId};

use super::{encode_timestamp, PrincipalDirectory, RepositoryError};
use crate::DbPool;

pub struct SqlPrincipalDirectory {
    pool: DbPool,
}

impl SqlPrincipalDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Roles are stored as a comma-separated list of canonical role names.
pub fn encode_roles(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(",")
}

pub fn decode_roles(raw: &str) -> Result<Vec<Role>, RepositoryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Role::parse(value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{value}`")))
        })
        .collect()
}

fn row_to_principal(row: &SqliteRow) -> Result<Principal, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let display_name: String =
        row.try_get("display_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let roles: String = row.try_get("roles").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: bool = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Principal { id: UserId(id), display_name, roles: decode_roles(&roles)?, active })
}

#[async_trait::async_trait]
impl PrincipalDirectory for SqlPrincipalDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<Principal>, RepositoryError> {
        let row = sqlx::query("SELECT id, display_name, roles, active FROM app_user WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_principal).transpose()
    }

    async fn save(&self, principal: Principal) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, display_name, roles, active, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 roles = excluded.roles,
                 active = excluded.active",
        )
        .bind(&principal.id.0)
        .bind(&principal.display_name)
        .bind(encode_roles(&principal.roles))
        .bind(principal.active)
        .bind(encode_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
