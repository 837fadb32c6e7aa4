//! Crate-wide error taxonomy.
//!
//! Only two kinds of failure are meant to reach the agent-facing layer:
//! exhausted connectivity retries and an exhausted connection pool. Privilege
//! and not-found conditions are absorbed by the catalog reader and refresh
//! coordinator and turned into degraded results.

use std::time::Duration;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Dictionary error code raised when the principal lacks a privilege.
pub const ORA_INSUFFICIENT_PRIVILEGES: &str = "ORA-01031";

/// Worker error code for the same condition on non-Oracle drivers.
pub const INSUFFICIENT_PRIVILEGE_CODE: &str = "INSUFFICIENT_PRIVILEGE";

/// Errors produced by the schema context.
///
/// `Clone` so a single in-flight refresh can hand the same failure to every
/// waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Network or authentication failure that survived every retry.
    #[error("database unreachable after {attempts} attempt(s): {message}")]
    TransientConnectivity { attempts: u32, message: String },

    /// The principal may not read the requested dictionary view.
    #[error("insufficient privilege ({code}): {message}")]
    InsufficientPrivilege { code: String, message: String },

    /// Object does not exist (or is invisible at every tier).
    #[error("object not found: {0}")]
    NotFound(String),

    /// Persisted snapshot could not be decoded.
    #[error("persisted schema cache is unusable: {0}")]
    CorruptPersistedState(String),

    /// No pooled connection became available in time.
    #[error("connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// A catalog statement exceeded the statement timeout.
    #[error("catalog statement timed out after {0:?}")]
    StatementTimeout(Duration),

    /// Any other dictionary error; not retried.
    #[error("database error {code}: {message}")]
    Database { code: String, message: String },

    /// Writing the persisted snapshot failed.
    #[error("failed to persist schema cache: {0}")]
    Persistence(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task died unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an error from a raw dictionary/worker error code, classifying
    /// privilege failures by their stable code.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if is_privilege_code(&code) {
            Self::InsufficientPrivilege { code, message }
        } else {
            Self::Database { code, message }
        }
    }

    /// Whether the retry loop should try again.
    ///
    /// Statement timeouts are surfaced, not retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConnectivity { .. })
    }

    /// Whether this failure should trigger a tier fallback.
    pub fn is_insufficient_privilege(&self) -> bool {
        matches!(self, Self::InsufficientPrivilege { .. })
    }

    /// Whether the caller may retry later (surfaced failures only).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_) | Self::TransientConnectivity { .. } | Self::StatementTimeout(_)
        )
    }
}

fn is_privilege_code(code: &str) -> bool {
    let code = code.trim();
    if code.eq_ignore_ascii_case(ORA_INSUFFICIENT_PRIVILEGES)
        || code.eq_ignore_ascii_case(INSUFFICIENT_PRIVILEGE_CODE)
    {
        return true;
    }
    // Drivers sometimes report the bare numeric code.
    code.trim_start_matches('0') == "1031"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_codes_are_classified() {
        assert!(Error::from_code("ORA-01031", "insufficient privileges").is_insufficient_privilege());
        assert!(Error::from_code("01031", "x").is_insufficient_privilege());
        assert!(Error::from_code("INSUFFICIENT_PRIVILEGE", "x").is_insufficient_privilege());
    }

    #[test]
    fn test_other_codes_are_database_errors() {
        let err = Error::from_code("ORA-00942", "table or view does not exist");
        assert!(!err.is_insufficient_privilege());
        assert!(matches!(err, Error::Database { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::PoolExhausted(Duration::from_secs(1)).is_retryable());
        assert!(!Error::PoolExhausted(Duration::from_secs(1)).is_transient());
        assert!(Error::StatementTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!Error::StatementTimeout(Duration::from_secs(1)).is_transient());
        assert!(!Error::NotFound("HR.X".into()).is_retryable());
    }
}
