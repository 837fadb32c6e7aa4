//! Facade consumed by the agent tool surface.
//!
//! [`DatabaseContext`] wires the worker, pool, tiered reader, cache store and
//! refresh coordinator from [`Settings`] and answers the questions tools ask:
//! what exists, what does it look like, what relates to it. Every answer
//! carries the degraded conditions that applied when it was produced.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::{snapshot_key, ColdStartReason, MatchTier, SchemaCacheStore, SnapshotStats, WarmStart};
use crate::catalog::{ReaderConfig, TieredCatalogReader};
use crate::config::Settings;
use crate::metadata::{
    AccessTier, CatalogObject, CatalogSource, ColumnInfo, Completeness, DatabaseInfo,
    ObjectIdentity, ObjectType, RelationshipInfo,
};
use crate::pool::{ConnectionPool, PoolConfig, PoolStatus};
use crate::refresh::{DegradedStatus, RefreshCoordinator, RefreshPolicy, RefreshReport};
use crate::worker::{WorkerClient, WorkerConnector};
use crate::{Error, Result};

/// Similarity cut-off used when the caller gives none.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.65;

/// Result limit used when the caller gives none.
pub const DEFAULT_LIMIT: usize = 20;

/// Data plus the degraded conditions it was produced under.
#[derive(Debug, Clone, Serialize)]
pub struct Answer<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedStatus>,
}

/// Name-level view of a cached object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSummary {
    pub owner: String,
    pub name: String,
    pub object_type: ObjectType,
    pub completeness: Completeness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl From<&CatalogObject> for ObjectSummary {
    fn from(object: &CatalogObject) -> Self {
        Self {
            owner: object.identity.owner.clone(),
            name: object.identity.name.clone(),
            object_type: object.identity.object_type,
            completeness: object.completeness,
            comment: object.comment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    #[serde(flatten)]
    pub object: ObjectSummary,
    pub score: f64,
    pub tier: MatchTier,
}

/// Foreign-key neighbours of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedTables {
    pub object: ObjectIdentity,
    /// Edges from this table to the tables it references.
    pub referenced: Vec<RelationshipInfo>,
    /// Edges from other tables into this one.
    pub referencing: Vec<RelationshipInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMatches {
    pub object: ObjectIdentity,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub owner: String,
    pub tier: AccessTier,
    pub objects: Vec<ObjectIdentity>,
}

/// Cache, access and pool state.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub version: u64,
    pub tier: AccessTier,
    pub built_at: Option<DateTime<Utc>>,
    pub stats: SnapshotStats,
    pub warm_start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_tier: Option<AccessTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<RefreshReport>,
    pub degraded: Vec<DegradedStatus>,
}

/// Schema knowledge for one database connection.
pub struct DatabaseContext {
    coordinator: RefreshCoordinator,
    reader: Option<Arc<TieredCatalogReader>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseContext {
    /// Start the worker and wire every layer from `settings`.
    ///
    /// Connects lazily: no session is opened until the first catalog read.
    pub async fn connect(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let worker_path = settings
            .worker_path()
            .ok_or_else(|| Error::Config("database worker binary not found".to_string()))?;
        let connection_string = settings.connection.resolved_connection_string()?;

        let client = WorkerClient::spawn_with_timeout(
            &worker_path,
            &[],
            std::time::Duration::from_secs(settings.worker.request_timeout_secs),
        )
        .await?;
        let connector = WorkerConnector::new(
            Arc::new(client),
            settings.connection.driver.clone(),
            connection_string.clone(),
        );
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(connector),
            PoolConfig::from(&settings.pool),
        ));
        let reader = Arc::new(TieredCatalogReader::new(pool, ReaderConfig::from(&settings)));

        let store = if settings.cache.persist {
            let path = settings.cache.resolved_path()?;
            let owner = settings.connection.target_owner();
            let key = snapshot_key(&settings.connection.driver, &connection_string, owner.as_deref())
                .map_err(|err| Error::Internal(format!("snapshot key: {err}")))?;
            let max_age = chrono::Duration::seconds(
                i64::try_from(settings.cache.max_age_secs).unwrap_or(i64::MAX),
            );
            tokio::task::spawn_blocking(move || SchemaCacheStore::open(&path, key, max_age))
                .await
                .map_err(|err| Error::Internal(format!("cache open task: {err}")))?
        } else {
            SchemaCacheStore::in_memory()
        };

        let coordinator = RefreshCoordinator::new(
            reader.clone(),
            Arc::new(store),
            RefreshPolicy::from(&settings),
        );
        let scheduler = coordinator.spawn_scheduler();

        Ok(Self {
            coordinator,
            reader: Some(reader),
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Build a context over an arbitrary source, without worker or pool.
    pub fn from_parts(
        source: Arc<dyn CatalogSource>,
        store: Arc<SchemaCacheStore>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            coordinator: RefreshCoordinator::new(source, store, policy),
            reader: None,
            scheduler: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<SchemaCacheStore> {
        self.coordinator.store()
    }

    fn answer<T>(&self, data: T) -> Answer<T> {
        Answer {
            data,
            degraded: self.coordinator.degraded_status(),
        }
    }

    /// Objects visible to the principal, straight from the dictionary.
    pub async fn discover(&self, owner: Option<&str>) -> Result<Answer<DiscoveryReport>> {
        let discovery = self.coordinator.source().discover_objects(owner).await?;
        let mut degraded = self.coordinator.degraded_status();
        if discovery.tier.is_degraded()
            && !degraded.iter().any(|d| matches!(d, DegradedStatus::TierDegraded { .. }))
        {
            degraded.push(DegradedStatus::TierDegraded {
                tier: discovery.tier,
                detail: crate::refresh::tier_detail(discovery.tier).to_string(),
            });
        }
        Ok(Answer {
            data: DiscoveryReport {
                owner: discovery.owner,
                tier: discovery.tier,
                objects: discovery.objects,
            },
            degraded,
        })
    }

    /// Full detail of every object named `name` (`NAME` or `OWNER.NAME`).
    pub async fn describe(&self, name: &str) -> Result<Answer<Vec<CatalogObject>>> {
        self.coordinator.refresh_if_expired().await?;
        let mut described = Vec::new();
        for object in self.coordinator.resolve(name).await? {
            if let Some(loaded) = self.coordinator.ensure_loaded(&object.identity).await? {
                described.push(CatalogObject::clone(&loaded));
            }
        }
        Ok(self.answer(described))
    }

    /// Ranked name search over the cached snapshot.
    pub async fn search(&self, term: &str, limit: Option<usize>) -> Result<Answer<Vec<ObjectSummary>>> {
        self.coordinator.refresh_if_expired().await?;
        let found = self
            .store()
            .search(term, limit.unwrap_or(DEFAULT_LIMIT))
            .iter()
            .map(|object| ObjectSummary::from(object.as_ref()))
            .collect();
        Ok(self.answer(found))
    }

    /// Fuzzy name search; substring matches rank ahead of edit-distance ones.
    pub async fn similarity_search(
        &self,
        term: &str,
        threshold: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Answer<Vec<SimilarityHit>>> {
        self.coordinator.refresh_if_expired().await?;
        let hits = self
            .store()
            .similarity_search(
                term,
                threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
                limit.unwrap_or(DEFAULT_LIMIT),
            )
            .into_iter()
            .map(|hit| SimilarityHit {
                object: ObjectSummary::from(hit.object.as_ref()),
                score: hit.score,
                tier: hit.tier,
            })
            .collect();
        Ok(self.answer(hits))
    }

    /// Tables `name` references and tables referencing it.
    pub async fn related_tables(&self, name: &str) -> Result<Answer<Vec<RelatedTables>>> {
        self.coordinator.refresh_if_expired().await?;
        let mut related = Vec::new();
        for object in self.coordinator.resolve(name).await? {
            if !object.identity.is_table() {
                continue;
            }
            let Some(loaded) = self.coordinator.ensure_loaded(&object.identity).await? else {
                continue;
            };
            let snapshot = self.store().snapshot();
            related.push(RelatedTables {
                object: loaded.identity.clone(),
                referenced: loaded.relationships.clone(),
                referencing: snapshot.incoming(&loaded.identity),
            });
        }
        Ok(self.answer(related))
    }

    /// Columns of `tables` whose name contains `term`, case-insensitively.
    /// A blank term matches every column.
    pub async fn search_columns(&self, tables: &[String], term: &str) -> Result<Answer<Vec<ColumnMatches>>> {
        self.coordinator.refresh_if_expired().await?;
        let needle = term.trim().to_uppercase();
        let mut matches = Vec::new();
        for table in tables {
            for object in self.coordinator.resolve(table).await? {
                let Some(loaded) = self.coordinator.ensure_loaded(&object.identity).await? else {
                    continue;
                };
                let columns: Vec<ColumnInfo> = loaded
                    .columns
                    .iter()
                    .filter(|c| c.name.to_uppercase().contains(&needle))
                    .cloned()
                    .collect();
                if !columns.is_empty() {
                    matches.push(ColumnMatches {
                        object: loaded.identity.clone(),
                        columns,
                    });
                }
            }
        }
        Ok(self.answer(matches))
    }

    /// Whether any object is named `name`.
    pub async fn object_exists(&self, name: &str) -> Result<bool> {
        Ok(!self.coordinator.resolve(name).await?.is_empty())
    }

    /// Rebuild the snapshot now.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        self.coordinator.refresh_all().await
    }

    /// Forget learned access tiers so the next reads start from the top tier.
    pub fn reprobe(&self) {
        if let Some(reader) = &self.reader {
            reader.reprobe();
        }
    }

    pub async fn database_info(&self) -> DatabaseInfo {
        self.coordinator.source().database_info().await
    }

    pub fn status(&self) -> ContextStatus {
        let snapshot = self.store().snapshot();
        ContextStatus {
            version: snapshot.version(),
            tier: snapshot.tier(),
            built_at: snapshot.built_at(),
            stats: snapshot.stats(),
            warm_start: describe_warm_start(self.store().warm_start()),
            observed_tier: self.reader.as_ref().and_then(|r| r.observed_tier()),
            pool: self.reader.as_ref().map(|r| r.pool().status()),
            last_refresh: self.coordinator.last_report(),
            degraded: self.coordinator.degraded_status(),
        }
    }

    /// Stop the scheduler and close pooled sessions.
    pub async fn shutdown(&self) {
        self.stop_scheduler();
        if let Some(reader) = &self.reader {
            reader.pool().close().await;
        }
    }

    fn stop_scheduler(&self) {
        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for DatabaseContext {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}

fn describe_warm_start(warm_start: &WarmStart) -> String {
    match warm_start {
        WarmStart::Warm { version } => format!("warm (version {version})"),
        WarmStart::Cold { reason } => match reason {
            ColdStartReason::Disabled => "cold (persistence disabled)".to_string(),
            ColdStartReason::NoPersistedState => "cold (nothing persisted)".to_string(),
            ColdStartReason::Expired { saved_at } => format!("cold (record from {saved_at} expired)"),
            ColdStartReason::UnknownFormat(tag) => format!("cold (unknown record format {tag})"),
            ColdStartReason::Corrupt(reason) => format!("cold (unreadable cache: {reason})"),
        },
    }
}
