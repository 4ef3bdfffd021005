//! PostgreSQL connection pool setup and occupancy reporting.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use takeoff_core::{defaults, Error, Result};

const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a query waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Connections older than this are recycled; `None` keeps them.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(defaults::DB_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::DB_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(DEFAULT_MAX_LIFETIME),
        }
    }
}

impl PoolConfig {
    /// Defaults overridden from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAKEOFF_DB_MAX_CONNECTIONS` | `10` | Pool size upper bound |
    /// | `TAKEOFF_DB_CONNECT_TIMEOUT_SECS` | `30` | Acquire timeout |
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().overridden_by(|name| std::env::var(name).ok())
    }

    fn overridden_by(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(n) = var("TAKEOFF_DB_MAX_CONNECTIONS").and_then(|v| v.parse::<u32>().ok()) {
            self = self.with_max_connections(n);
        }
        if let Some(secs) =
            var("TAKEOFF_DB_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            self.acquire_timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Upper bound on open connections, at least one. Lowers
    /// `min_connections` when it would exceed the new bound.
    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }
}

/// Open a pool against `database_url`.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    debug!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Opening connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Connection pool ready"
    );
    Ok(pool)
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealth {
    pub size: u32,
    pub idle: usize,
}

impl PoolHealth {
    pub fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle(),
        }
    }

    pub fn in_use(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }

    /// Every open connection is checked out.
    pub fn is_saturated(&self) -> bool {
        self.size > 0 && self.idle == 0
    }

    /// Debug line per snapshot; warn when saturated.
    pub fn log(&self) {
        if self.is_saturated() {
            warn!(
                subsystem = "db",
                component = "pool",
                pool_size = self.size,
                "Connection pool saturated, queries are queueing"
            );
        } else {
            debug!(
                subsystem = "db",
                component = "pool",
                op = "health",
                pool_size = self.size,
                pool_idle = self.idle,
                pool_in_use = self.in_use(),
                "Connection pool health"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_defaults() {
        let config = PoolConfig::default().overridden_by(|name| match name {
            "TAKEOFF_DB_MAX_CONNECTIONS" => Some("25".to_string()),
            "TAKEOFF_DB_CONNECT_TIMEOUT_SECS" => Some("5".to_string()),
            _ => None,
        });
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_unparseable_env_keeps_defaults() {
        let config = PoolConfig::default().overridden_by(|_| Some("lots".to_string()));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_zero_max_connections_keeps_one() {
        let config = PoolConfig::default().with_max_connections(0);
        assert_eq!(config.max_connections, 1);
        assert!(config.min_connections <= config.max_connections);
    }

    #[test]
    fn test_saturation() {
        let busy = PoolHealth { size: 4, idle: 0 };
        assert!(busy.is_saturated());
        assert_eq!(busy.in_use(), 4);

        let empty = PoolHealth { size: 0, idle: 0 };
        assert!(!empty.is_saturated());

        let quiet = PoolHealth { size: 4, idle: 3 };
        assert!(!quiet.is_saturated());
        assert_eq!(quiet.in_use(), 1);
    }
}
