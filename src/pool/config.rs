use std::time::Duration;

use crate::{Config, Result};

use super::Pool;

/// Periodic idle connection probing.
#[derive(Clone, Debug)]
pub struct KeepAlive {
    /// How long a connection may sit idle before it is probed.
    pub(crate) frequency: Duration,
    /// Statement to run as the probe; `None` just drains the wire.
    pub(crate) sql: Option<String>,
}

impl KeepAlive {
    pub fn new(frequency: Duration) -> Self {
        Self { frequency, sql: None }
    }

    /// Probe with a statement, e.g. `SELECT 1`.
    pub fn query(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Pool configuration builder.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub(crate) conn: Config,
    /// Connections kept open even when idle.
    pub(crate) min_conn: usize,
    /// Preferred upper bound, new connections spawn below it.
    pub(crate) max_conn: usize,
    /// Absolute upper bound, reached only while waiters queue.
    pub(crate) hard_limit: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) keep_alive: Option<KeepAlive>,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_cap: Duration,
}

impl PoolConfig {
    pub fn from_env() -> PoolConfig {
        Self::new(Config::from_env())
    }

    pub fn new(conn: Config) -> PoolConfig {
        Self {
            conn,
            min_conn: 0,
            max_conn: 10,
            hard_limit: 10,
            idle_timeout: Duration::from_secs(600),
            keep_alive: Some(KeepAlive::default()),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
        }
    }

    /// Get the connection config.
    pub fn connection(&self) -> &Config {
        &self.conn
    }

    /// Connections kept open even when idle; the worker replaces evicted
    /// ones to stay at this floor.
    pub fn min_connection(mut self, value: usize) -> Self {
        self.min_conn = value;
        self
    }

    /// Set the soft max connection value.
    ///
    /// Also raises the hard limit when it is below `value`.
    pub fn max_connection(mut self, value: usize) -> Self {
        self.max_conn = value;
        self.hard_limit = self.hard_limit.max(value);
        self
    }

    /// Absolute connection cap; between the soft and hard limits new
    /// connections spawn only while callers are waiting.
    pub fn max_connection_hard_limit(mut self, value: usize) -> Self {
        self.hard_limit = value;
        self
    }

    /// Idle connections beyond [`min_connection`][Self::min_connection]
    /// close after this long.
    pub fn idle_timeout(mut self, value: Duration) -> Self {
        self.idle_timeout = value;
        self
    }

    /// Configure idle probing, `None` disables it.
    pub fn keep_alive(mut self, value: Option<KeepAlive>) -> Self {
        self.keep_alive = value;
        self
    }

    /// Reconnect backoff parameters: `min(cap, base * 2^attempt)` plus a
    /// jitter of up to `base`.
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }
}

impl PoolConfig {
    pub async fn connect(mut self, url: &str) -> Result<Pool> {
        self.conn = Config::parse(url)?;
        Pool::connect_with(self).await
    }

    pub fn connect_lazy(mut self, url: &str) -> Result<Pool> {
        self.conn = Config::parse(url)?;
        Ok(Pool::connect_lazy_with(self))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn soft_limit_raises_hard_limit() {
        let config = PoolConfig::new(Config::parse("postgres://u:p@h:1/d").unwrap())
            .max_connection(32);
        assert_eq!(config.max_conn, 32);
        assert_eq!(config.hard_limit, 32);
    }

    #[test]
    fn hard_limit_above_soft() {
        let config = PoolConfig::new(Config::parse("postgres://u:p@h:1/d").unwrap())
            .max_connection(4)
            .max_connection_hard_limit(8);
        assert_eq!(config.max_conn, 4);
        assert_eq!(config.hard_limit, 8);
    }
}
