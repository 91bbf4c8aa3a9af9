//! Pool creation through the `sqlx::any` driver.
//!
//! One pool per connector, sized by `ConnectionConfig::max_connections`.
//! Connecting eagerly opens a first connection so that an unreachable source
//! fails in `connect` and not halfway through a search. With
//! `ConnectionConfig::read_only` set, every pooled connection is switched to
//! read-only mode before first use.

use super::SqlDialect;
use crate::Result;
use crate::connectors::ConnectionConfig;
use crate::error::RecordScoutError;
use crate::security::safe_target;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Once;

static INSTALL_DRIVERS: Once = Once::new();

/// Registers every compiled-in driver with `sqlx::any`.
pub fn install_drivers() {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
}

/// Opens a pool and verifies it with a trivial query.
///
/// # Errors
/// Returns a connection error (credentials sanitized) if the database cannot
/// be reached within the connect timeout
pub async fn create_pool(
    url: &str,
    dialect: SqlDialect,
    config: &ConnectionConfig,
) -> Result<AnyPool> {
    config.validate()?;
    install_drivers();

    let target = safe_target(url);
    let read_only = config.read_only;
    let pool = AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if read_only {
                    sqlx::query(dialect.read_only_sql())
                        .execute(&mut *conn)
                        .await?;
                }
                Ok(())
            })
        })
        .connect(url)
        .await
        .map_err(|e| {
            RecordScoutError::connection_failed(format!("Failed to connect to {}", target), e)
        })?;

    let ping = tokio::time::timeout(
        config.connect_timeout,
        sqlx::query("SELECT 1").execute(&pool),
    )
    .await;
    match ping {
        Ok(Ok(_)) => Ok(pool),
        Ok(Err(e)) => {
            pool.close().await;
            Err(RecordScoutError::connection_failed(
                format!("Connectivity check against {} failed", target),
                e,
            ))
        }
        Err(_) => {
            pool.close().await;
            Err(RecordScoutError::timeout(
                format!("connectivity check against {}", target),
                config.connect_timeout.as_secs(),
            ))
        }
    }
}
