use std::{str::FromStr, time::Duration};

use deadpool_postgres::{BuildError, Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio_postgres::NoTls;

pub type PgPool = Pool;

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("invalid database url: {0}")]
    InvalidUrl(#[source] tokio_postgres::Error),
    #[error("failed to build database pool: {0}")]
    Build(#[from] BuildError),
}

/// Pool sizing for the scorer. A scoring run issues one statement at a
/// time, so the pool stays small.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub max_size: usize,
    /// How long a caller waits for a free connection (`None` waits forever).
    pub wait_timeout: Option<Duration>,
    pub application_name: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 4,
            wait_timeout: Some(Duration::from_secs(30)),
            application_name: "dr-scorer".to_string(),
        }
    }
}

impl PoolSettings {
    /// Reads `DR_DB_POOL_SIZE` and `DR_DB_WAIT_TIMEOUT_SECS` (0 disables the
    /// timeout).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: std::env::var("DR_DB_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_size),
            wait_timeout: match std::env::var("DR_DB_WAIT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.wait_timeout,
            },
            ..defaults
        }
    }

    /// Parses `db_url` and builds a pool that connects on first use.
    pub fn build(&self, db_url: &str) -> Result<PgPool, DbPoolError> {
        let mut pg_config =
            tokio_postgres::Config::from_str(db_url).map_err(DbPoolError::InvalidUrl)?;
        if pg_config.get_application_name().is_none() {
            pg_config.application_name(&self.application_name);
        }

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Ok(Pool::builder(manager)
            .max_size(self.max_size)
            .wait_timeout(self.wait_timeout)
            .runtime(Runtime::Tokio1)
            .build()?)
    }
}

/// Pool with `PoolSettings::from_env()`.
pub fn create_pool_from_url(db_url: &str) -> Result<PgPool, DbPoolError> {
    PoolSettings::from_env().build(db_url)
}
