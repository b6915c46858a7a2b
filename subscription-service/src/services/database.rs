//! PostgreSQL pool and schema migrations.

use crate::config::DatabaseConfig;
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool described by `config`. The URL is never logged.
    #[instrument(skip(config), fields(max = config.max_connections, min = config.min_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to open subscription database: {}", e))
            })?;

        info!("Subscription database pool ready");
        Ok(Self { pool })
    }

    /// Wrap an existing pool, e.g. one scoped to a test schema.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;
        timer.observe_duration();

        result
            .map(|_| ())
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Database ping failed: {}", e)))
    }

    /// Apply pending migrations from `migrations/`.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Subscription schema migration failed: {}", e))
        })?;
        info!(migrations = MIGRATOR.iter().count(), "Subscription schema up to date");
        Ok(())
    }
}
