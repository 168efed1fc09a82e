//! Notification worker process.
//!
//! Consumes the `notifications` queue and produces into `emails`.

use std::sync::Arc;

use tracing::{error, info};

use testplanit_workers::queue::QueueRegistry;
use testplanit_workers::runtime::bootstrap;
use testplanit_workers::shutdown::install_shutdown_handler;
use testplanit_workers::tenant::{PostgresConnector, TenantClientManager};
use testplanit_workers::workers::{NotificationHandler, WorkerPool};

#[tokio::main]
async fn main() {
    let config = bootstrap("notification-worker");

    let registry = Arc::new(QueueRegistry::connect(&config.broker).await);
    let Some(queue) = registry.notifications() else {
        error!("Notifications queue is not available, exiting");
        std::process::exit(1);
    };

    let clients = Arc::new(TenantClientManager::from_config(
        PostgresConnector::new(config.db_max_connections),
        &config,
    ));
    let handler = Arc::new(NotificationHandler::new(clients.clone(), registry.clone()));

    let shutdown = install_shutdown_handler();
    let stats = WorkerPool::new(
        queue,
        handler,
        NotificationHandler::<PostgresConnector>::pool_config(),
    )
    .run(shutdown)
    .await;

    registry.close().await;
    let disconnected = clients.disconnect_all().await;

    info!(
        completed = stats.completed,
        failed = stats.failed,
        disconnected,
        "Notification worker stopped"
    );
}
