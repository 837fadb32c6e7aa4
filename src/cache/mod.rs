//! Schema cache store.
//!
//! Holds the current [`SchemaSnapshot`] generation behind an atomic pointer.
//! Readers load the pointer and work against one immutable generation;
//! writers build the next generation and swap it in. Persisted state lives in
//! a SQLite file (`~/.dbcontext/schema_cache.db` by default).
//!
//! # Key Format
//!
//! ```text
//! {conn_hash}:{owner}   -> one snapshot record
//! {conn_hash}:*         -> snapshot for "whoever connects"
//! ```

mod hash;
mod persist;
mod similarity;
mod snapshot;

pub use hash::{compute_hash, snapshot_key};
pub use persist::{CacheError, CacheResult, LoadOutcome, RecordInfo, SnapshotStore, SNAPSHOT_FORMAT};
pub use similarity::{fold, score, score_folded, similarity, MatchTier};
pub use snapshot::{SchemaSnapshot, SimilarityMatch, SnapshotDelta, SnapshotStats};

use std::path::Path;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::metadata::{AccessTier, CatalogObject, ObjectIdentity, RelationshipInfo};

/// Why the process started without a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColdStartReason {
    /// Persistence is turned off.
    Disabled,
    /// Nothing stored for this schema yet.
    NoPersistedState,
    /// The stored record is older than the warm-start limit.
    Expired { saved_at: DateTime<Utc> },
    /// The stored record has a format tag this build does not read.
    UnknownFormat(String),
    /// The stored record or file could not be read.
    Corrupt(String),
}

impl ColdStartReason {
    /// Whether the caller should be warned about this cold start.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::UnknownFormat(_) | Self::Corrupt(_))
    }
}

/// How the store came up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmStart {
    Warm { version: u64 },
    Cold { reason: ColdStartReason },
}

/// Result of a point lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Complete(Arc<CatalogObject>),
    Stub(Arc<CatalogObject>),
    Miss,
}

impl Lookup {
    pub fn object(&self) -> Option<&Arc<CatalogObject>> {
        match self {
            Self::Complete(obj) | Self::Stub(obj) => Some(obj),
            Self::Miss => None,
        }
    }
}

struct Persistence {
    store: Arc<SnapshotStore>,
    key: String,
}

/// In-memory snapshot plus optional durable copy.
pub struct SchemaCacheStore {
    current: ArcSwap<SchemaSnapshot>,
    // Serializes generation builds so concurrent deltas are not lost
    writer: Mutex<()>,
    persistence: Option<Persistence>,
    warm_start: WarmStart,
}

impl SchemaCacheStore {
    /// A store without persistence, starting empty.
    pub fn in_memory() -> Self {
        Self::with_snapshot(SchemaSnapshot::empty())
    }

    /// A store without persistence, starting from `snapshot`.
    pub fn with_snapshot(snapshot: SchemaSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
            persistence: None,
            warm_start: WarmStart::Cold {
                reason: ColdStartReason::Disabled,
            },
        }
    }

    /// Open a persisted store and warm-start from its record under `key`.
    ///
    /// Never fails: unusable persisted state means a cold start, reported by
    /// [`warm_start`](Self::warm_start).
    pub fn open(path: &Path, key: impl Into<String>, max_age: chrono::Duration) -> Self {
        let key = key.into();
        let (store, recovered) = match SnapshotStore::open(path) {
            Ok(opened) => opened,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "schema cache unavailable, running without persistence");
                let mut cold = Self::in_memory();
                cold.warm_start = WarmStart::Cold {
                    reason: ColdStartReason::Corrupt(err.to_string()),
                };
                return cold;
            }
        };

        let (snapshot, warm_start) = match recovered {
            Some(reason) => (
                SchemaSnapshot::empty(),
                WarmStart::Cold {
                    reason: ColdStartReason::Corrupt(reason),
                },
            ),
            None => Self::warm(&store, &key, max_age),
        };

        match &warm_start {
            WarmStart::Warm { version } => {
                tracing::info!(key = %key, version, objects = snapshot.len(), "warm start from persisted schema cache");
            }
            WarmStart::Cold { reason } if reason.is_degraded() => {
                tracing::warn!(key = %key, ?reason, "persisted schema cache ignored, starting cold");
            }
            WarmStart::Cold { reason } => {
                tracing::info!(key = %key, ?reason, "starting with a cold schema cache");
            }
        }

        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
            persistence: Some(Persistence {
                store: Arc::new(store),
                key,
            }),
            warm_start,
        }
    }

    fn warm(store: &SnapshotStore, key: &str, max_age: chrono::Duration) -> (SchemaSnapshot, WarmStart) {
        let cold = |snapshot: SchemaSnapshot, reason: ColdStartReason| {
            (snapshot, WarmStart::Cold { reason })
        };
        match store.load(key, max_age, Utc::now()) {
            LoadOutcome::Loaded(snapshot) => {
                let version = snapshot.version();
                (snapshot, WarmStart::Warm { version })
            }
            LoadOutcome::Missing => cold(SchemaSnapshot::empty(), ColdStartReason::NoPersistedState),
            LoadOutcome::Expired { saved_at } => cold(
                Self::after_record(store, key),
                ColdStartReason::Expired { saved_at },
            ),
            LoadOutcome::UnknownFormat(tag) => {
                cold(SchemaSnapshot::empty(), ColdStartReason::UnknownFormat(tag))
            }
            LoadOutcome::Corrupt(reason) => {
                let empty = Self::after_record(store, key);
                if let Err(err) = store.delete(key) {
                    tracing::warn!(key, error = %err, "could not drop unreadable schema cache record");
                }
                cold(empty, ColdStartReason::Corrupt(reason))
            }
        }
    }

    /// An empty generation numbered after the record stored under `key`, so
    /// the next save replaces it.
    fn after_record(store: &SnapshotStore, key: &str) -> SchemaSnapshot {
        let version = store
            .record_info(key)
            .ok()
            .flatten()
            .map_or(0, |info| info.version);
        SchemaSnapshot::build(version, AccessTier::None, None, Vec::new(), Vec::new())
    }

    pub fn warm_start(&self) -> &WarmStart {
        &self.warm_start
    }

    /// The current generation. Hold on to it to read consistently.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.current.load_full()
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Lookup {
        match self.current.load().get(identity) {
            Some(obj) if obj.is_complete() => Lookup::Complete(obj.clone()),
            Some(obj) => Lookup::Stub(obj.clone()),
            None => Lookup::Miss,
        }
    }

    pub fn lookup(&self, name: &str) -> Vec<Arc<CatalogObject>> {
        self.current.load().lookup(name)
    }

    pub fn search(&self, term: &str, limit: usize) -> Vec<Arc<CatalogObject>> {
        self.current.load().search(term, limit)
    }

    pub fn similarity_search(&self, term: &str, threshold: f64, limit: usize) -> Vec<SimilarityMatch> {
        self.current.load().similarity_search(term, threshold, limit)
    }

    fn writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `delta` as a new generation and return it.
    pub fn put(&self, delta: SnapshotDelta) -> Arc<SchemaSnapshot> {
        let _guard = self.writer();
        let next = Arc::new(self.current.load().apply(delta));
        self.current.store(next.clone());
        tracing::debug!(version = next.version(), objects = next.len(), "committed snapshot delta");
        next
    }

    /// Replace the whole model with a freshly built generation.
    pub fn replace(
        &self,
        tier: AccessTier,
        built_at: DateTime<Utc>,
        objects: Vec<CatalogObject>,
        relationships: Vec<RelationshipInfo>,
    ) -> Arc<SchemaSnapshot> {
        let _guard = self.writer();
        let version = self.current.load().version() + 1;
        let next = Arc::new(SchemaSnapshot::build(
            version,
            tier,
            Some(built_at),
            objects,
            relationships,
        ));
        self.current.store(next.clone());
        tracing::info!(version, tier = %tier, objects = next.len(), "swapped in new snapshot generation");
        next
    }

    /// Write `snapshot` to disk. Best effort: failures are logged, and an
    /// older generation never overwrites a newer record.
    pub async fn persist(&self, snapshot: &Arc<SchemaSnapshot>) -> bool {
        let Some(persistence) = &self.persistence else {
            return false;
        };
        let store = persistence.store.clone();
        let key = persistence.key.clone();
        let snapshot = snapshot.clone();
        let version = snapshot.version();

        let result =
            tokio::task::spawn_blocking(move || store.save(&key, &snapshot, Utc::now())).await;
        match result {
            Ok(Ok(written)) => {
                if !written {
                    tracing::debug!(version, "newer snapshot already persisted");
                }
                written
            }
            Ok(Err(err)) => {
                tracing::warn!(version, error = %err, "failed to persist schema cache");
                false
            }
            Err(err) => {
                tracing::warn!(version, error = %err, "schema cache write task failed");
                false
            }
        }
    }

    /// Header of the persisted record, when persistence is on.
    pub fn persisted_record(&self) -> Option<RecordInfo> {
        let persistence = self.persistence.as_ref()?;
        persistence.store.record_info(&persistence.key).ok().flatten()
    }
}
