use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_USERS: &[SeedUser] = &[
    SeedUser { id: "u-admin", roles: "admin", active: true },
    SeedUser { id: "u-approver", roles: "approver", active: true },
    SeedUser { id: "u-gerente", roles: "fulfillment_manager", active: true },
    SeedUser { id: "u-requester", roles: "requester", active: true },
    SeedUser { id: "u-retired", roles: "approver", active: false },
];

const SEED_MATERIAL_IDS: &[&str] = &["7", "8", "9", "10", "99"];

pub const SEED_REQUEST_ID: &str = "REQ-SEED-0001";
const SEED_REQUEST_ITEM_IDS: &[&str] = &["ITM-SEED-0001", "ITM-SEED-0002"];
const SEED_AUDIT_EVENT_IDS: &[&str] = &["ae-seed-0001"];

/// Deterministic development dataset: one principal per role (plus an inactive one), a small
/// material catalog with one retired entry, and a pending request owned by `u-requester`.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            users: SEED_USERS.len(),
            materials: SEED_MATERIAL_IDS.len(),
            requests: vec![SEED_REQUEST_ID],
        })
    }

    /// Checks that the seed rows exist with the expected shape. Rows that workflows have since
    /// moved along (for example an approved seed request) still count as present.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for user in SEED_USERS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                     SELECT 1 FROM app_user WHERE id = ?1 AND roles = ?2 AND active = ?3
                 )",
            )
            .bind(user.id)
            .bind(user.roles)
            .bind(user.active)
            .fetch_one(pool)
            .await?;
            checks.push((user.id, exists == 1));
        }

        let quoted_materials = sql_array_from_ids(SEED_MATERIAL_IDS);
        let material_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM material WHERE id IN {quoted_materials}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("materials", material_count == SEED_MATERIAL_IDS.len() as i64));

        let request_exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM material_request WHERE id = ?1 AND requester_id = 'u-requester'
             )",
        )
        .bind(SEED_REQUEST_ID)
        .fetch_one(pool)
        .await?;
        checks.push((SEED_REQUEST_ID, request_exists == 1));

        let quoted_items = sql_array_from_ids(SEED_REQUEST_ITEM_IDS);
        let item_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM request_item WHERE request_id = ?1 AND id IN {quoted_items}"
        ))
        .bind(SEED_REQUEST_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("request-items", item_count == SEED_REQUEST_ITEM_IDS.len() as i64));

        let quoted_audits = sql_array_from_ids(SEED_AUDIT_EVENT_IDS);
        let audit_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM audit_event WHERE id IN {quoted_audits}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("audit-events", audit_count == SEED_AUDIT_EVENT_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seed request, its items and audit rows. Users and materials stay, since
    /// requests created after seeding may reference them.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_audits = sql_array_from_ids(SEED_AUDIT_EVENT_IDS);
        sqlx::query(&format!("DELETE FROM audit_event WHERE id IN {quoted_audits}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM request_item WHERE request_id = ?1")
            .bind(SEED_REQUEST_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM material_request WHERE id = ?1")
            .bind(SEED_REQUEST_ID)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedUser {
    id: &'static str,
    roles: &'static str,
    active: bool,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub users: usize,
    pub materials: usize,
    pub requests: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
