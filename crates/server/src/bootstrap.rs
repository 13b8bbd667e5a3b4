use std::sync::Arc;

use almox_core::config::{AppConfig, ConfigError, LoadOptions};
use almox_core::notifications::{
    DispatchStats, LogNotificationSender, NotificationDispatcher, NotificationError,
    NotificationSender,
};
use almox_db::repositories::{
    SqlAuditSink, SqlMaterialRepository, SqlPrincipalDirectory, SqlRequestRepository,
};
use almox_db::{connect_with_config, migrations, DbPool};
use almox_workflow::RequestWorkflowService;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::notifier::WebhookNotificationSender;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<RequestWorkflowService>,
    pub dispatch_stats: Arc<DispatchStats>,
    pub notification_worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification sender setup failed: {0}")]
    Notifications(#[source] NotificationError),
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

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let (dispatcher, notification_worker) = if config.notifications.enabled {
        let sender: Arc<dyn NotificationSender> =
            match WebhookNotificationSender::from_config(&config.notifications)
                .map_err(BootstrapError::Notifications)?
            {
                Some(webhook) => Arc::new(webhook),
                None => Arc::new(LogNotificationSender),
            };
        info!(
            event_name = "system.bootstrap.notifications",
            correlation_id = "bootstrap",
            sender = sender.name(),
            queue_capacity = config.notifications.queue_capacity,
            "notification worker starting"
        );
        let (dispatcher, worker) =
            NotificationDispatcher::spawn(sender, config.notifications.queue_capacity);
        (dispatcher, Some(worker))
    } else {
        info!(
            event_name = "system.bootstrap.notifications",
            correlation_id = "bootstrap",
            sender = "disabled",
            "notifications disabled by configuration"
        );
        (NotificationDispatcher::disabled(), None)
    };
    let dispatch_stats = dispatcher.stats();

    let workflow = RequestWorkflowService::new(
        Arc::new(SqlRequestRepository::new(db_pool.clone())),
        Arc::new(SqlMaterialRepository::new(db_pool.clone())),
        Arc::new(SqlPrincipalDirectory::new(db_pool.clone())),
        dispatcher,
    )
    .with_audit_sink(Arc::new(SqlAuditSink::new(db_pool.clone())));

    Ok(Application {
        config,
        db_pool,
        workflow: Arc::new(workflow),
        dispatch_stats,
        notification_worker,
    })
}
