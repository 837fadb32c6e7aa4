//! SQLite-backed snapshot persistence.
//!
//! One record per known schema, keyed by connection fingerprint and owner:
//!
//! ```text
//! snapshots(key, format, version, tier, built_at, saved_at, payload)
//! ```
//!
//! `payload` is the JSON object list. A record whose `format` tag is not
//! [`SNAPSHOT_FORMAT`] is treated as absent, never as an error.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::snapshot::SchemaSnapshot;
use crate::metadata::{AccessTier, CatalogObject};

/// Tag written with every record. Bump when the payload shape changes.
pub const SNAPSHOT_FORMAT: &str = "v2";

/// Current store layout version, kept in the `meta` table.
const STORE_VERSION: i32 = 1;

/// Errors that can occur during persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Persistence(err.to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct Payload {
    objects: Vec<CatalogObject>,
}

/// Header of a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    pub format: String,
    pub version: u64,
    pub tier: String,
    pub built_at: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
}

/// What a warm-start read found.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(SchemaSnapshot),
    Missing,
    Expired { saved_at: DateTime<Utc> },
    UnknownFormat(String),
    Corrupt(String),
}

/// Durable snapshot records.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// Open or create the store at `path`.
    ///
    /// A file that is not a usable database is moved aside to
    /// `<path>.corrupt` and replaced. The second value carries the reason
    /// when that happened.
    pub fn open(path: &Path) -> CacheResult<(Self, Option<String>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open_at(path) {
            Ok(store) => Ok((store, None)),
            Err(CacheError::Sqlite(err)) => {
                let reason = err.to_string();
                let aside = path.with_extension("db.corrupt");
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %reason,
                    "schema cache file unreadable, starting fresh"
                );
                std::fs::rename(path, &aside)?;
                Ok((Self::open_at(path)?, Some(reason)))
            }
            Err(err) => Err(err),
        }
    }

    fn open_at(path: &Path) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create tables and drop records written by an incompatible layout.
    fn init(&self) -> CacheResult<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                format TEXT NOT NULL,
                version INTEGER NOT NULL,
                tier TEXT NOT NULL,
                built_at TEXT,
                saved_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(STORE_VERSION) {
            if stored_version.is_some() {
                conn.execute("DELETE FROM snapshots", [])?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                params![STORE_VERSION.to_string()],
            )?;
        }
        Ok(())
    }

    /// Header of the record under `key`, if any.
    pub fn record_info(&self, key: &str) -> CacheResult<Option<RecordInfo>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT format, version, tier, built_at, saved_at FROM snapshots WHERE key = ?",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(format, version, tier, built_at, saved_at)| RecordInfo {
            format,
            version: u64::try_from(version).unwrap_or(0),
            tier,
            built_at: built_at.as_deref().and_then(parse_time),
            saved_at: parse_time(&saved_at).unwrap_or_default(),
        }))
    }

    /// Read the record under `key` for a warm start.
    ///
    /// Never fails: unreadable state is reported through the outcome.
    pub fn load(&self, key: &str, max_age: chrono::Duration, now: DateTime<Utc>) -> LoadOutcome {
        let row = {
            let conn = self.conn();
            conn.query_row(
                "SELECT format, version, tier, built_at, saved_at, payload FROM snapshots WHERE key = ?",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
        };

        let (format, version, tier, built_at, saved_at, payload) = match row {
            Ok(Some(row)) => row,
            Ok(None) => return LoadOutcome::Missing,
            Err(err) => return LoadOutcome::Corrupt(err.to_string()),
        };

        if format != SNAPSHOT_FORMAT {
            return LoadOutcome::UnknownFormat(format);
        }
        let Some(saved_at) = parse_time(&saved_at) else {
            return LoadOutcome::Corrupt(format!("bad saved_at timestamp {saved_at:?}"));
        };
        if now.signed_duration_since(saved_at) > max_age {
            return LoadOutcome::Expired { saved_at };
        }
        let Some(tier) = parse_tier(&tier) else {
            return LoadOutcome::Corrupt(format!("unknown access tier {tier:?}"));
        };
        let Ok(version) = u64::try_from(version) else {
            return LoadOutcome::Corrupt(format!("negative version {version}"));
        };
        let payload: Payload = match serde_json::from_str(&payload) {
            Ok(payload) => payload,
            Err(err) => return LoadOutcome::Corrupt(err.to_string()),
        };

        LoadOutcome::Loaded(SchemaSnapshot::build(
            version,
            tier,
            built_at.as_deref().and_then(parse_time),
            payload.objects,
            std::iter::empty(),
        ))
    }

    /// Write `snapshot` under `key` unless a newer version is already stored.
    ///
    /// Returns whether the record was written.
    pub fn save(&self, key: &str, snapshot: &SchemaSnapshot, now: DateTime<Utc>) -> CacheResult<bool> {
        let payload = serde_json::to_string(&Payload {
            objects: snapshot.objects().map(|o| CatalogObject::clone(o)).collect(),
        })?;
        let version = i64::try_from(snapshot.version()).unwrap_or(i64::MAX);

        let conn = self.conn();
        let rows = conn.execute(
            "INSERT INTO snapshots (key, format, version, tier, built_at, saved_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                format = excluded.format,
                version = excluded.version,
                tier = excluded.tier,
                built_at = excluded.built_at,
                saved_at = excluded.saved_at,
                payload = excluded.payload
             WHERE excluded.version > snapshots.version OR snapshots.format <> excluded.format",
            params![
                key,
                SNAPSHOT_FORMAT,
                version,
                snapshot.tier().as_str(),
                snapshot.built_at().map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
                payload
            ],
        )?;
        Ok(rows > 0)
    }

    /// Delete the record under `key`.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM snapshots WHERE key = ?", params![key])?;
        Ok(rows > 0)
    }
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_tier(text: &str) -> Option<AccessTier> {
    match text {
        "FULL" => Some(AccessTier::Full),
        "OWN" => Some(AccessTier::Own),
        "NONE" => Some(AccessTier::None),
        _ => None,
    }
}
