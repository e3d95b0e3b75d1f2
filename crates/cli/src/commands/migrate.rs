use fixtrack_db::migrations;

use crate::commands::{migrated_pool, prepare, CommandResult, EXIT_MIGRATION};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION));
        pool.close().await;
        applied
    });

    match result {
        Ok(versions) => CommandResult::success_with(
            "migrate",
            format!("schema up to date ({} migration(s) applied)", versions.len()),
            Some(serde_json::json!({ "applied_versions": versions })),
        ),
        Err(step) => CommandResult::from_step("migrate", step),
    }
}
