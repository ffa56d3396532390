//! Redis connection pool shared by the remote caches
//!
//! A single multiplexed connection is shared by every cache command, with a
//! semaphore bounding how many commands are in flight at once. Commands are
//! retried with exponential backoff on transient failures, and the connection
//! is re-established when it drops.
//!
//! # Example
//!
//! ```rust,no_run
//! use datafile_bank::redis::{RedisConfig, RedisPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = RedisPool::new(RedisConfig::with_url("redis://127.0.0.1:6379")).await?;
//! let pong: String = pool
//!     .execute(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::CacheError;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use super::util::safe_redis_error;

/// Configuration for the Redis connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of commands in flight
    /// Default: 32
    pub pool_size: u32,

    /// Timeout for establishing the connection
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for individual commands
    /// Default: 2 seconds
    pub command_timeout: Duration,

    /// Retry policy for failed commands
    pub retry_policy: RetryPolicy,

    /// Enable TLS for connections
    /// Default: false
    pub tls_enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 32,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            retry_policy: RetryPolicy::default(),
            tls_enabled: false,
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    ///
    /// TLS is enabled when the URL uses the `rediss://` scheme.
    pub fn with_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            tls_enabled: url.starts_with("rediss://"),
            url,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size cannot exceed 1000".to_string());
        }

        #[cfg(not(feature = "redis-tls"))]
        if self.tls_enabled {
            return Err(
                "TLS is enabled but the 'redis-tls' feature is not compiled. \
                 Enable it with: cargo build --features redis-tls"
                    .to_string(),
            );
        }

        if self.tls_enabled != self.url.starts_with("rediss://") {
            return Err("TLS setting does not match URL scheme; \
                 use 'rediss://host:port' for TLS and 'redis://host:port' otherwise"
                .to_string());
        }

        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 2
    pub max_retries: u32,

    /// Initial delay between retries
    /// Default: 50ms
    pub initial_delay: Duration,

    /// Maximum delay between retries
    /// Default: 1 second
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);

        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // up to 25% jitter
            delay_ms * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Check if we should retry after the given attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Redis connection pool
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisConfig,
    semaphore: Arc<Semaphore>,
}

impl RedisPool {
    /// Connect to the configured Redis service
    pub async fn new(config: RedisConfig) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::ConnectionError)?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::ConnectionError(safe_redis_error(&config.url, &e)))?;

        let pool = Self {
            client,
            connection: RwLock::new(None),
            semaphore: Arc::new(Semaphore::new(config.pool_size as usize)),
            config,
        };

        pool.connect().await?;

        debug!("Redis cache pool initialized");
        Ok(pool)
    }

    /// Establish or re-establish the connection
    async fn connect(&self) -> Result<MultiplexedConnection, CacheError> {
        let start = Instant::now();

        let conn = tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::ConnectionError("Connection timeout".to_string()))?
        .map_err(|e| CacheError::ConnectionError(safe_redis_error(&self.config.url, &e)))?;

        let previous = self.connection.write().await.replace(conn.clone());
        if previous.is_some() {
            warn!("Redis connection re-established");
        }

        debug!("Redis connection established in {:?}", start.elapsed());
        Ok(conn)
    }

    async fn current(&self) -> Result<MultiplexedConnection, CacheError> {
        let conn = self.connection.read().await.clone();
        match conn {
            Some(c) => Ok(c),
            None => self.connect().await,
        }
    }

    /// Execute a command with retry logic
    ///
    /// `f` receives a clone of the multiplexed connection for each attempt.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, CacheError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CacheError::ConnectionError("Semaphore closed".to_string()))?;

        let mut attempt = 0;

        loop {
            let conn = self.current().await?;
            let result = tokio::time::timeout(self.config.command_timeout, f(conn)).await;

            let retriable = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if !(is_retriable_error(&e) && self.config.retry_policy.should_retry(attempt))
                    {
                        return Err(CacheError::CommandError(safe_redis_error(
                            &self.config.url,
                            &e,
                        )));
                    }
                    if is_connection_error(&e) {
                        let _ = self.connect().await;
                    }
                    e.to_string()
                },
                Err(_) => {
                    if !self.config.retry_policy.should_retry(attempt) {
                        return Err(CacheError::CommandError("Command timeout".to_string()));
                    }
                    "timeout".to_string()
                },
            };

            let delay = self.config.retry_policy.delay_for_attempt(attempt);
            warn!(
                "Redis command failed (attempt {}), retrying in {:?}: {}",
                attempt + 1,
                delay,
                retriable
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Send a PING, returning the round-trip latency
    pub async fn ping(&self) -> Result<Duration, CacheError> {
        let start = Instant::now();
        self.execute(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await?;
        Ok(start.elapsed())
    }
}

/// Check if an error is retriable
fn is_retriable_error(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}

/// Check if an error requires reconnection
fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.pool_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = RedisConfig::with_url("");
        assert!(config.validate().is_err());

        let mut config = RedisConfig::with_url("redis://localhost");
        for (size, valid) in [(0, false), (1001, false), (16, true)] {
            config.pool_size = size;
            assert_eq!(config.validate().is_ok(), valid, "pool_size {}", size);
        }
    }

    #[test]
    fn test_tls_follows_scheme() {
        assert!(RedisConfig::with_url("rediss://secure:6380").tls_enabled);
        assert!(!RedisConfig::with_url("redis://plain:6379").tls_enabled);
    }

    #[cfg(not(feature = "redis-tls"))]
    #[test]
    fn test_tls_requires_feature() {
        let result = RedisConfig::with_url("rediss://secure:6380").validate();
        assert!(result.unwrap_err().contains("redis-tls"));
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_construction() {
        // port 1 is never a Redis server
        let mut config = RedisConfig::with_url("redis://127.0.0.1:1");
        config.connection_timeout = Duration::from_millis(500);

        let result = RedisPool::new(config).await;
        assert!(matches!(result, Err(CacheError::ConnectionError(_))));
    }
}
