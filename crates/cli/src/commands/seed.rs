use almox_db::{connect_with_config, migrations, SeedDataset, SeedResult};

use crate::commands::{
    current_thread_runtime, load_config, CommandResult, StepFailure, EXIT_DB_CONNECTIVITY,
    EXIT_MIGRATION, EXIT_VERIFICATION,
};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;

        let outcome = async {
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

            let seeded = SeedDataset::load(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;

            let verification = SeedDataset::verify(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), EXIT_VERIFICATION))?;
            if !verification.all_present {
                return Err((
                    "seed_verification",
                    failed_checks_message(&verification.checks),
                    EXIT_VERIFICATION,
                ));
            }
            Ok::<SeedResult, StepFailure>(seeded)
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "seed dataset loaded: {} users, {} materials, requests: {}",
        seeded.users,
        seeded.materials,
        seeded.requests.join(", ")
    )
}

fn failed_checks_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
