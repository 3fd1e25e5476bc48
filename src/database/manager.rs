use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::info;

use super::binder::{NO_TENANT, TENANT_SETTING};
use crate::config::DatabaseConfig;

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Builds the shared connection pool used by every tenant
pub struct DatabaseManager;

impl DatabaseManager {
    /// Connect the shared pool.
    ///
    /// Connections re-entering the pool have the tenant setting reset by the
    /// `after_release` hook; if the reset fails the connection is closed
    /// instead of being reused.
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let url = config
            .url
            .as_deref()
            .ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    match sqlx::query("SELECT set_config($1, $2, false)")
                        .bind(TENANT_SETTING)
                        .bind(NO_TENANT)
                        .execute(&mut *conn)
                        .await
                    {
                        Ok(_) => Ok(true),
                        Err(e) => {
                            tracing::warn!("Closing connection after failed tenant reset: {}", e);
                            Ok(false)
                        }
                    }
                })
            })
            .connect(url)
            .await?;

        info!(
            "Created database pool (max_connections={})",
            config.max_connections
        );
        Ok(pool)
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }
}
