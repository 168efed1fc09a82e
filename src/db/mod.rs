//! Database module providing connection management, migrations, and queries.
//!
//! Query methods live next to the store trait they implement:
//! `forecast.rs` for the forecast tables, `notifications.rs` for users,
//! preferences and notifications.

pub mod forecast;
pub mod notifications;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::migration::Migrator;

pub use forecast::ForecastStore;
pub use notifications::NotificationStore;

/// Database connection pool wrapper around a SeaORM connection.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Connect to PostgreSQL with a bounded pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        debug!(max_connections, "Database pool opened");

        Ok(DbPool { conn })
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply every pending schema migration.
    pub async fn run_migrations(&self) -> AppResult<()> {
        Migrator::up(self.connection(), None)
            .await
            .map_err(|e| AppError::Database(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations applied");
        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) -> AppResult<()> {
        self.conn
            .clone()
            .close()
            .await
            .map_err(|e| AppError::Database(format!("Failed to close database: {}", e)))
    }
}
