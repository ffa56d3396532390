//! Redis plumbing for the remote caches
//!
//! The listing and content caches in [`crate::cache::remote`] share one
//! [`RedisPool`]. Keys of the two caches live in separate namespaces of the
//! same database:
//!
//! ```text
//! 0:{directory or prefix}   → SET of children (listing cache)
//! 1:{record identifier}     → STRING of raw file content (content cache)
//! ```

pub mod connection;
pub mod util;

pub use connection::{RedisConfig, RedisPool, RetryPolicy};
pub use util::sanitize_url;
