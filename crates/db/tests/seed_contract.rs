use almox_core::domain::material::MaterialId;
use almox_core::domain::principal::{Role, UserId};
use almox_core::domain::request::{RequestFilter, RequestId, RequestStatus};
use almox_db::repositories::{
    MaterialRepository, PrincipalDirectory, RequestRepository, SqlMaterialRepository,
    SqlPrincipalDirectory, SqlRequestRepository,
};
use almox_db::{connect_with_settings, migrations, DbPool, SeedDataset};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

async fn seeded_pool() -> SeedContractTestResult<DbPool> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    SeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;
    Ok(pool)
}

#[tokio::test]
async fn seeded_principals_cover_every_role() -> SeedContractTestResult {
    let directory = SqlPrincipalDirectory::new(seeded_pool().await?);

    let expectations = [
        ("u-admin", Some(Role::Admin)),
        ("u-approver", Some(Role::Approver)),
        ("u-gerente", Some(Role::FulfillmentManager)),
        ("u-requester", Some(Role::Requester)),
        ("u-retired", None),
    ];
    for (id, expected) in expectations {
        let principal = directory
            .find_by_id(&UserId(id.to_string()))
            .await
            .map_err(|error| format!("lookup {id}: {error}"))?
            .ok_or_else(|| format!("principal {id} should be seeded"))?;
        require!(
            principal.effective_role() == expected,
            "principal {id} resolved to {:?}, expected {expected:?}",
            principal.effective_role()
        );
    }
    Ok(())
}

#[tokio::test]
async fn seeded_catalog_has_material_seven_and_a_retired_entry() -> SeedContractTestResult {
    let materials = SqlMaterialRepository::new(seeded_pool().await?);

    let gloves = materials
        .find_by_id(&MaterialId("7".to_string()))
        .await
        .map_err(|error| format!("lookup 7: {error}"))?
        .ok_or("material 7 should be seeded")?;
    require!(gloves.active, "material 7 should be active");

    let retired = materials
        .find_by_id(&MaterialId("99".to_string()))
        .await
        .map_err(|error| format!("lookup 99: {error}"))?
        .ok_or("material 99 should be seeded")?;
    require!(!retired.active, "material 99 should be retired");
    Ok(())
}

#[tokio::test]
async fn seeded_request_is_pending_and_decodes_through_the_repository() -> SeedContractTestResult
{
    let requests = SqlRequestRepository::new(seeded_pool().await?);

    let request = requests
        .find_by_id(&RequestId("REQ-SEED-0001".to_string()))
        .await
        .map_err(|error| format!("lookup seed request: {error}"))?
        .ok_or("seed request should exist")?;
    require!(request.status == RequestStatus::Pending, "seed request should be pending");
    require!(request.items.len() == 2, "seed request should have two items");
    require!(
        request.items.iter().all(|item| item.fulfilled_quantity.is_none()),
        "seed items start without fulfilled quantities"
    );
    request.check_invariants().map_err(|error| format!("invariants: {error}"))?;

    let (pending, total) = requests
        .list(&RequestFilter { status: Some(RequestStatus::Pending), ..RequestFilter::default() })
        .await
        .map_err(|error| format!("list: {error}"))?;
    require!(total == 1 && pending.len() == 1, "exactly one pending request is seeded");
    Ok(())
}
