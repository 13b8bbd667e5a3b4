use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use almox_core::config::{AppConfig, LoadOptions};
use almox_core::domain::material::MaterialId;
use almox_core::domain::principal::{Role, UserId};
use almox_core::domain::request::{
    MaterialRequest, NewLineItem, RequestItemId, RequestStatus, UnitId,
};
use almox_core::errors::ApplicationError;
use almox_core::notifications::NotificationDispatcher;
use almox_db::repositories::{
    SqlAuditSink, SqlMaterialRepository, SqlPrincipalDirectory, SqlRequestRepository,
};
use almox_db::{connect_with_config, migrations, DbPool, SeedDataset};
use almox_workflow::{FulfillmentInput, RequestWorkflowService, ReviewDecision};
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::{CommandResult, EXIT_VERIFICATION};

const SCENARIO_CHECKS: [&str; 4] =
    ["request_lifecycle", "rejection_reason_required", "quantity_privilege", "fulfillment_lock"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

/// Runs the readiness checks, then walks one request through review, adjustment and
/// fulfillment against the configured database. Scenario requests are left in place.
pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(passed(
                "config_validation",
                elapsed_ms,
                "configuration loaded and validated",
            ));
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(failed("config_validation", elapsed_ms, error.to_string()));
            skip_remaining(
                &mut checks,
                &["db_connectivity", "migration_visibility", "seed_dataset"],
            );
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(failed(
                "db_connectivity",
                0,
                format!("failed to initialize async runtime: {error}"),
            ));
            skip_remaining(&mut checks, &["migration_visibility", "seed_dataset"]);
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            checks.push(passed(
                "db_connectivity",
                elapsed_since(db_started),
                format!("connected using `{}`", config.database.url),
            ));
            pool
        }
        Err(error) => {
            checks.push(failed(
                "db_connectivity",
                elapsed_since(db_started),
                format!("failed to connect: {error}"),
            ));
            skip_remaining(&mut checks, &["migration_visibility", "seed_dataset"]);
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let ready = prepare_database(&runtime, &pool, &mut checks);
    if ready {
        run_scenario(&runtime, &pool, &mut checks);
    } else {
        skip_remaining(&mut checks, &[]);
    }

    runtime.block_on(pool.close());
    finalize_report(checks, elapsed_since(started))
}

fn prepare_database(runtime: &Runtime, pool: &DbPool, checks: &mut Vec<SmokeCheck>) -> bool {
    let migration_started = Instant::now();
    match runtime.block_on(migrations::run_pending(pool)) {
        Ok(()) => checks.push(passed(
            "migration_visibility",
            elapsed_since(migration_started),
            "migrations are visible and executable",
        )),
        Err(error) => {
            checks.push(failed(
                "migration_visibility",
                elapsed_since(migration_started),
                format!("migration execution failed: {error}"),
            ));
            checks.push(skipped("seed_dataset"));
            return false;
        }
    }

    let seed_started = Instant::now();
    let seeded = runtime.block_on(async {
        SeedDataset::load(pool).await?;
        SeedDataset::verify(pool).await
    });
    match seeded {
        Ok(verification) if verification.all_present => {
            checks.push(passed(
                "seed_dataset",
                elapsed_since(seed_started),
                "seed dataset present",
            ));
            true
        }
        Ok(verification) => {
            let missing: Vec<&str> = verification
                .checks
                .iter()
                .filter(|(_, present)| !present)
                .map(|(name, _)| *name)
                .collect();
            checks.push(failed(
                "seed_dataset",
                elapsed_since(seed_started),
                format!("seed records missing: {}", missing.join(", ")),
            ));
            false
        }
        Err(error) => {
            checks.push(failed(
                "seed_dataset",
                elapsed_since(seed_started),
                format!("seed load failed: {error}"),
            ));
            false
        }
    }
}

fn run_scenario(runtime: &Runtime, pool: &DbPool, checks: &mut Vec<SmokeCheck>) {
    let service = RequestWorkflowService::new(
        Arc::new(SqlRequestRepository::new(pool.clone())),
        Arc::new(SqlMaterialRepository::new(pool.clone())),
        Arc::new(SqlPrincipalDirectory::new(pool.clone())),
        NotificationDispatcher::disabled(),
    )
    .with_audit_sink(Arc::new(SqlAuditSink::new(pool.clone())));

    let Some(approved) =
        scenario_step(runtime, "request_lifecycle", checks, request_lifecycle(&service))
    else {
        skip_remaining(checks, &[]);
        return;
    };
    scenario_step(runtime, "rejection_reason_required", checks, rejection_reason(&service));

    let Some(item_id) = approved.items.first().map(|item| item.id.clone()) else {
        skip_remaining(checks, &[]);
        return;
    };
    scenario_step(runtime, "quantity_privilege", checks, quantity_privilege(&service, &item_id));
    scenario_step(
        runtime,
        "fulfillment_lock",
        checks,
        fulfillment_lock(&service, &approved, &item_id),
    );
}

async fn request_lifecycle(
    service: &RequestWorkflowService,
) -> Result<(MaterialRequest, String), String> {
    let created = create_gloves_request(service).await?;
    if created.status != RequestStatus::Pending {
        return Err(format!("new request is {}, expected pending", created.status.as_str()));
    }

    let approved = service
        .approve_or_reject(&created.id, ReviewDecision::approve(), &user("u-approver"))
        .await
        .map_err(describe)?;
    match approved.items.first().and_then(|item| item.fulfilled_quantity) {
        Some(3) => {
            let message = format!("request `{}` created and approved", approved.id.0);
            Ok((approved, message))
        }
        other => Err(format!("approval should default fulfilled quantity to 3, got {other:?}")),
    }
}

async fn rejection_reason(service: &RequestWorkflowService) -> Result<((), String), String> {
    let pending = create_gloves_request(service).await?;
    let decision = ReviewDecision { status: RequestStatus::Rejected, rejection_reason: None };
    expect_kind(
        service.approve_or_reject(&pending.id, decision, &user("u-approver")).await,
        "validation_error",
    )?;

    let reloaded = service.get_request(&pending.id).await.map_err(describe)?;
    if reloaded.status != RequestStatus::Pending {
        return Err("request left pending status after a refused rejection".to_string());
    }
    Ok(((), "rejection without reason refused".to_string()))
}

async fn quantity_privilege(
    service: &RequestWorkflowService,
    item_id: &RequestItemId,
) -> Result<((), String), String> {
    expect_kind(
        service.adjust_fulfilled_quantity(item_id, 5, Role::FulfillmentManager).await,
        "privilege_violation",
    )?;

    let receipt = service
        .adjust_fulfilled_quantity(item_id, 2, Role::FulfillmentManager)
        .await
        .map_err(describe)?;
    if receipt.item.fulfilled_quantity != Some(2) {
        return Err(format!("decrease should store 2, got {:?}", receipt.item.fulfilled_quantity));
    }
    Ok(((), "restricted increase refused, decrease applied".to_string()))
}

async fn fulfillment_lock(
    service: &RequestWorkflowService,
    approved: &MaterialRequest,
    item_id: &RequestItemId,
) -> Result<((), String), String> {
    let fulfilled = service
        .fulfill(&approved.id, FulfillmentInput::default(), &user("u-gerente"))
        .await
        .map_err(describe)?;
    if fulfilled.status != RequestStatus::Fulfilled {
        return Err(format!("request is {}, expected fulfilled", fulfilled.status.as_str()));
    }

    expect_kind(
        service.adjust_fulfilled_quantity(item_id, 1, Role::Admin).await,
        "invalid_state_transition",
    )?;
    Ok(((), "fulfilled request refuses quantity edits".to_string()))
}

async fn create_gloves_request(
    service: &RequestWorkflowService,
) -> Result<MaterialRequest, String> {
    service
        .create_request(
            &user("u-requester"),
            UnitId("unit-smoke".to_string()),
            vec![NewLineItem { material_id: MaterialId("7".to_string()), quantity: 3 }],
            Some("smoke run".to_string()),
        )
        .await
        .map_err(describe)
}

fn user(id: &str) -> UserId {
    UserId(id.to_string())
}

fn scenario_step<T>(
    runtime: &Runtime,
    name: &'static str,
    checks: &mut Vec<SmokeCheck>,
    step: impl Future<Output = Result<(T, String), String>>,
) -> Option<T> {
    let step_started = Instant::now();
    match runtime.block_on(step) {
        Ok((value, message)) => {
            checks.push(passed(name, elapsed_since(step_started), message));
            Some(value)
        }
        Err(message) => {
            checks.push(failed(name, elapsed_since(step_started), message));
            None
        }
    }
}

fn expect_kind<T>(result: Result<T, ApplicationError>, kind: &str) -> Result<(), String> {
    match result {
        Err(error) if error.kind() == kind => Ok(()),
        Err(error) => Err(format!("expected {kind}, got {}: {error}", error.kind())),
        Ok(_) => Err(format!("expected {kind}, but the operation succeeded")),
    }
}

fn describe(error: ApplicationError) -> String {
    format!("{}: {error}", error.kind())
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn passed(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Pass, elapsed_ms, message: message.into() }
}

fn failed(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Fail, elapsed_ms, message: message.into() }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

/// Marks `names` as skipped, followed by every scenario check not yet recorded.
fn skip_remaining(checks: &mut Vec<SmokeCheck>, names: &[&'static str]) {
    for &name in names {
        checks.push(skipped(name));
    }
    for name in SCENARIO_CHECKS {
        if !checks.iter().any(|check| check.name == name) {
            checks.push(skipped(name));
        }
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\
             \"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult {
        exit_code: if failed { EXIT_VERIFICATION } else { 0 },
        output: format!("{human}\n{machine}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{finalize_report, skip_remaining, skipped, SmokeCheck, SmokeStatus};

    #[test]
    fn skip_remaining_marks_scenario_checks_once() {
        let mut checks = vec![skipped("request_lifecycle")];
        skip_remaining(&mut checks, &["seed_dataset"]);

        let names: Vec<&str> = checks.iter().map(|check| check.name).collect();
        assert_eq!(
            names,
            vec![
                "request_lifecycle",
                "seed_dataset",
                "rejection_reason_required",
                "quantity_privilege",
                "fulfillment_lock",
            ]
        );
    }

    #[test]
    fn any_failed_check_fails_the_report() {
        let result = finalize_report(
            vec![SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 1,
                message: "unreachable".to_string(),
            }],
            1,
        );

        assert_eq!(result.exit_code, 6);
        let machine = result.output.lines().last().expect("json line");
        let parsed: serde_json::Value = serde_json::from_str(machine).expect("valid json");
        assert_eq!(parsed["status"], "fail");
        assert_eq!(parsed["summary"], "smoke: 0/1 checks passed in 1ms");
    }
}
