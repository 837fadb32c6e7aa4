//! Connection provider.
//!
//! Hands out catalog sessions from a bounded pool. Acquisition waits at most
//! `acquire_timeout` and then fails with [`Error::PoolExhausted`]; opening a
//! session retries transient failures with exponential backoff and jitter.
//! Every connection is returned on every exit path by the
//! [`PooledConnection`] guard.
//!
//! [`Error::PoolExhausted`]: crate::Error::PoolExhausted

mod connection;
mod provider;
mod retry;

pub use connection::{CatalogConnection, Connector, Row};
pub use provider::{ConnectionPool, PoolConfig, PoolEvent, PoolStatus, PooledConnection};
pub use retry::{retry_transient, RetryPolicy};
