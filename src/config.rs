//! Pool and server configuration.
//!
//! Defaults follow the production deployment: 1024 slots, a ping every 30
//! seconds and one minute for both the write and the read deadline.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of connection slots.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default depth of each dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default keepalive period in milliseconds.
pub const DEFAULT_PING_PERIOD_MS: u64 = 30_000;

/// Default write deadline in milliseconds.
pub const DEFAULT_WRITE_WAIT_MS: u64 = 60_000;

/// Default read deadline in milliseconds.
pub const DEFAULT_READ_WAIT_MS: u64 = 60_000;

/// Default upgrade read/write buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Configuration for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections.
    pub capacity: usize,

    /// Depth of the unicast and broadcast queues.
    pub queue_capacity: usize,

    /// Keepalive ping period in milliseconds.
    pub ping_period_ms: u64,

    /// Per-write deadline in milliseconds.
    pub write_wait_ms: u64,

    /// Read deadline in milliseconds, extended by any inbound frame.
    pub read_wait_ms: u64,

    /// Upgrade read buffer size in bytes.
    pub read_buffer_size: usize,

    /// Upgrade write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ping_period_ms: DEFAULT_PING_PERIOD_MS,
            write_wait_ms: DEFAULT_WRITE_WAIT_MS,
            read_wait_ms: DEFAULT_READ_WAIT_MS,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Sets the dispatch queue depth.
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the keepalive period.
    #[must_use]
    pub fn with_ping_period(mut self, period: Duration) -> Self {
        self.ping_period_ms = duration_ms(period);
        self
    }

    /// Sets the write deadline.
    #[must_use]
    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait_ms = duration_ms(wait);
        self
    }

    /// Sets the read deadline.
    #[must_use]
    pub fn with_read_wait(mut self, wait: Duration) -> Self {
        self.read_wait_ms = duration_ms(wait);
        self
    }

    /// Sets the maximum inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Returns the keepalive period.
    #[must_use]
    pub const fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    /// Returns the write deadline.
    #[must_use]
    pub const fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Returns the read deadline.
    #[must_use]
    pub const fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }

    /// Loads the configuration from `WSPOOL_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            capacity: env_or("WSPOOL_CAPACITY", defaults.capacity)?,
            queue_capacity: env_or("WSPOOL_QUEUE_CAPACITY", defaults.queue_capacity)?,
            ping_period_ms: env_or("WSPOOL_PING_PERIOD_MS", defaults.ping_period_ms)?,
            write_wait_ms: env_or("WSPOOL_WRITE_WAIT_MS", defaults.write_wait_ms)?,
            read_wait_ms: env_or("WSPOOL_READ_WAIT_MS", defaults.read_wait_ms)?,
            max_message_size: env_or("WSPOOL_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        if self.write_wait_ms == 0 {
            return Err(ConfigError::InvalidWriteWait);
        }

        // Peers answer pings with pongs; the read deadline must outlast a period.
        if self.ping_period_ms == 0 || self.ping_period_ms >= self.read_wait_ms {
            return Err(ConfigError::InvalidPingPeriod);
        }

        Ok(())
    }
}

/// Address the HTTP server binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Creates a server configuration.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loads `WSPOOL_HOST` and `WSPOOL_PORT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_or("WSPOOL_HOST", defaults.host)?,
            port: env_or("WSPOOL_PORT", defaults.port)?,
        })
    }

    /// Returns the `host:port` bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid capacity.
    #[error("capacity must be > 0")]
    InvalidCapacity,

    /// Invalid queue capacity.
    #[error("queue_capacity must be > 0")]
    InvalidQueueCapacity,

    /// Invalid write deadline.
    #[error("write_wait_ms must be > 0")]
    InvalidWriteWait,

    /// Invalid keepalive period.
    #[error("ping_period_ms must be > 0 and < read_wait_ms")]
    InvalidPingPeriod,

    /// Unparseable environment variable.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
    },
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.ping_period(), Duration::from_secs(30));
        assert_eq!(config.write_wait(), Duration::from_secs(60));
        assert_eq!(config.read_wait(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::with_capacity(2)
            .with_queue_capacity(8)
            .with_ping_period(Duration::from_millis(100))
            .with_write_wait(Duration::from_millis(200))
            .with_read_wait(Duration::from_millis(300))
            .with_max_message_size(512);

        assert_eq!(config.capacity, 2);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.ping_period_ms, 100);
        assert_eq!(config.write_wait_ms, 200);
        assert_eq!(config.read_wait_ms, 300);
        assert_eq!(config.max_message_size, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_capacity() {
        let config = PoolConfig::with_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidCapacity));
    }

    #[test]
    fn test_config_validate_invalid_queue_capacity() {
        let config = PoolConfig::default().with_queue_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueCapacity));
    }

    #[test]
    fn test_config_validate_ping_not_shorter_than_read_wait() {
        let config = PoolConfig::default()
            .with_ping_period(Duration::from_secs(60))
            .with_read_wait(Duration::from_secs(60));
        assert_eq!(config.validate(), Err(ConfigError::InvalidPingPeriod));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"capacity": 10}"#).expect("deserialize");
        assert_eq!(config.capacity, 10);
        assert_eq!(config.ping_period_ms, DEFAULT_PING_PERIOD_MS);
    }

    #[test]
    fn test_env_or() {
        env::set_var("WSPOOL_TEST_ENV_OR_VALID", " 42 ");
        env::set_var("WSPOOL_TEST_ENV_OR_INVALID", "forty-two");

        assert_eq!(env_or("WSPOOL_TEST_ENV_OR_VALID", 0usize), Ok(42));
        assert_eq!(env_or("WSPOOL_TEST_ENV_OR_UNSET", 7usize), Ok(7));
        assert!(matches!(
            env_or("WSPOOL_TEST_ENV_OR_INVALID", 0usize),
            Err(ConfigError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn test_server_config_addr() {
        let config = ServerConfig::new("127.0.0.1", 9000);
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(ServerConfig::default().addr(), "0.0.0.0:8080");
    }
}
