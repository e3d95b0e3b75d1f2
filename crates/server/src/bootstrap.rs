use fixtrack_core::config::{AppConfig, ConfigError, LoadOptions};
use fixtrack_db::{
    connect_with_settings, migrations, BranchAssignmentService, DbPool, RepairWorkflowService,
    Repositories,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: RepairWorkflowService,
    pub assignments: BranchAssignmentService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let repositories = Repositories::sql(db_pool.clone());
    let policy = config.workflow.access_policy();
    info!(
        event_name = "system.bootstrap.policy_loaded",
        correlation_id = "bootstrap",
        it_unit_branch_scoped = policy.it_unit_branch_scoped,
        "access policy loaded"
    );

    Ok(Application {
        workflow: RepairWorkflowService::new(repositories.clone(), policy),
        assignments: BranchAssignmentService::new(repositories, policy),
        config,
        db_pool,
    })
}
