//! Hashing for persisted cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, ensuring deterministic output.
/// Returns a 64-character lowercase hexadecimal string.
///
/// # Errors
/// Returns an error if the value cannot be serialized to JSON.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Serialize)]
struct ConnectionIdentity<'a> {
    driver: &'a str,
    connection_string: &'a str,
}

/// Persisted-snapshot key for one schema of one database.
///
/// The connection string is hashed so credentials never land in the cache
/// file. `owner` is the configured target schema, or `*` for "whoever
/// connects".
pub fn snapshot_key(
    driver: &str,
    connection_string: &str,
    owner: Option<&str>,
) -> Result<String, serde_json::Error> {
    let hash = compute_hash(&ConnectionIdentity {
        driver,
        connection_string,
    })?;
    Ok(format!("{}:{}", &hash[..16], owner.unwrap_or("*")))
}
