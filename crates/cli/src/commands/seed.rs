use fixtrack_db::{DemoSeedDataset, Repositories, SeedResult};

use crate::commands::{migrated_pool, prepare, CommandResult, EXIT_SEED, EXIT_VERIFICATION};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let repositories = Repositories::sql(pool.clone());

        let outcome = async {
            let seeded = DemoSeedDataset::load(&repositories)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), EXIT_SEED))?;
            let verification = DemoSeedDataset::verify(&repositories)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), EXIT_VERIFICATION))?;

            if verification.ok {
                Ok(seeded)
            } else {
                Err(("seed_verification", verification_message(&verification.missing), EXIT_VERIFICATION))
            }
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success_with("seed", summary(&seeded), Some(seeded)),
        Err(step) => CommandResult::from_step("seed", step),
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo data loaded: {} branch(es), {} equipment item(s), {} user role grant(s)",
        seeded.branches, seeded.equipment, seeded.users
    )
}

fn verification_message(missing: &[String]) -> String {
    if missing.is_empty() {
        "seed verification failed".to_string()
    } else {
        format!("seed verification failed, missing: {}", missing.join(", "))
    }
}
