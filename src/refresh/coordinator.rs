//! Refresh coordinator.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;

use super::policy::{RefreshCadence, RefreshPolicy};
use super::single_flight::SingleFlight;
use super::status::{tier_detail, DegradedStatus, RefreshReport};
use crate::cache::{Lookup, SchemaCacheStore, SnapshotDelta, WarmStart};
use crate::metadata::normalizer::merge;
use crate::metadata::{CatalogObject, CatalogSource, ObjectIdentity, RelationshipInfo};
use crate::{Error, Result};

/// Decides when and what to load, and commits results to the cache.
///
/// Per-object loads and full refreshes are each single-flight: concurrent
/// requests for the same identity (or for a full refresh) share one
/// underlying load. Work runs on its own task, so it still commits when the
/// caller that triggered it gives up.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn CatalogSource>,
    store: Arc<SchemaCacheStore>,
    policy: RefreshPolicy,
    objects: SingleFlight<ObjectIdentity, Option<Arc<CatalogObject>>>,
    full: SingleFlight<(), RefreshReport>,
    last_miss_refresh: Mutex<Option<tokio::time::Instant>>,
    last_report: Mutex<Option<RefreshReport>>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        store: Arc<SchemaCacheStore>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                policy,
                objects: SingleFlight::new(),
                full: SingleFlight::new(),
                last_miss_refresh: Mutex::new(None),
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<SchemaCacheStore> {
        &self.inner.store
    }

    pub fn source(&self) -> &Arc<dyn CatalogSource> {
        &self.inner.source
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.policy
    }

    /// Report of the most recent successful full refresh.
    pub fn last_report(&self) -> Option<RefreshReport> {
        lock(&self.inner.last_report).clone()
    }

    /// Return `identity` with full detail, loading it if it is a stub or
    /// missing.
    ///
    /// `Ok(None)` means the object does not exist. An object whose detail
    /// could not be read comes back as a stub.
    pub async fn ensure_loaded(&self, identity: &ObjectIdentity) -> Result<Option<Arc<CatalogObject>>> {
        if let Lookup::Complete(object) = self.inner.store.get(identity) {
            return Ok(Some(object));
        }
        self.refresh_one(identity).await
    }

    /// Reload one object and its relationships regardless of cache state.
    pub async fn refresh_one(&self, identity: &ObjectIdentity) -> Result<Option<Arc<CatalogObject>>> {
        let inner = self.inner.clone();
        let id = identity.clone();
        self.inner
            .objects
            .run(identity.clone(), move || async move { inner.load_object(id).await })
            .await
    }

    /// Rebuild the whole snapshot from a fresh discovery pass.
    ///
    /// Detail failures leave the affected objects as stubs; only
    /// connectivity or pool exhaustion during discovery fails the call.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let inner = self.inner.clone();
        self.inner
            .full
            .run((), move || async move { inner.rebuild().await })
            .await
    }

    /// Run a full refresh when the snapshot has expired.
    ///
    /// An empty snapshot is refreshed inline; otherwise the stale generation
    /// keeps serving while a background refresh runs.
    pub async fn refresh_if_expired(&self) -> Result<Option<RefreshReport>> {
        let snapshot = self.inner.store.snapshot();
        if !snapshot.is_expired(self.inner.policy.ttl_chrono(), Utc::now()) {
            return Ok(None);
        }
        if snapshot.is_empty() {
            tracing::info!("schema cache is empty, running full refresh");
            return self.refresh_all().await.map(Some);
        }
        if !self.inner.full.is_running(&()) {
            tracing::info!(version = snapshot.version(), "schema cache expired, refreshing in background");
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.refresh_all().await {
                    tracing::warn!(error = %err, "background refresh failed");
                }
            });
        }
        Ok(None)
    }

    /// Resolve `name` against the cache, running one full refresh when
    /// nothing matches (rate-limited by `miss_cooldown`).
    pub async fn resolve(&self, name: &str) -> Result<Vec<Arc<CatalogObject>>> {
        let found = self.inner.store.lookup(name);
        if !found.is_empty() || !self.inner.policy.refresh_on_miss {
            return Ok(found);
        }
        if !self.claim_miss_refresh() {
            tracing::debug!(name, "name miss within cooldown, not refreshing");
            return Ok(found);
        }
        tracing::info!(name, "name not in cache, refreshing");
        self.refresh_all().await?;
        Ok(self.inner.store.lookup(name))
    }

    fn claim_miss_refresh(&self) -> bool {
        let mut last = lock(&self.inner.last_miss_refresh);
        let now = tokio::time::Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < self.inner.policy.miss_cooldown) {
            return false;
        }
        *last = Some(now);
        true
    }

    /// Start the interval scheduler, if the cadence asks for one.
    pub fn spawn_scheduler(&self) -> Option<JoinHandle<()>> {
        let RefreshCadence::Interval(period) = self.inner.policy.cadence else {
            return None;
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.refresh_all().await {
                    Ok(report) => {
                        tracing::info!(version = report.version, objects = report.objects, "scheduled refresh finished")
                    }
                    Err(err) => tracing::warn!(error = %err, "scheduled refresh failed"),
                }
            }
        }))
    }

    /// Current degraded conditions, for reporting next to data.
    ///
    /// A rejected persisted cache is reported until the first full refresh
    /// replaces it.
    pub fn degraded_status(&self) -> Vec<DegradedStatus> {
        if let Some(report) = self.last_report() {
            return report.degraded();
        }
        let mut status = Vec::new();
        if let WarmStart::Cold { reason } = self.inner.store.warm_start() {
            if reason.is_degraded() {
                status.push(DegradedStatus::cold_start(reason));
            }
        }
        let snapshot = self.inner.store.snapshot();
        if !snapshot.is_empty() && snapshot.tier().is_degraded() {
            status.push(DegradedStatus::TierDegraded {
                tier: snapshot.tier(),
                detail: tier_detail(snapshot.tier()).to_string(),
            });
        }
        status
    }
}

impl Inner {
    async fn load_object(&self, identity: ObjectIdentity) -> Result<Option<Arc<CatalogObject>>> {
        let detail = match self.source.load_details(&identity).await {
            Ok(detail) => detail,
            Err(Error::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        let Some(detail) = detail else {
            if self.store.snapshot().contains(&identity) {
                tracing::info!(object = %identity, "object no longer exists, dropping it");
                let snapshot = self.store.put(SnapshotDelta {
                    removed: vec![identity],
                    ..Default::default()
                });
                self.store.persist(&snapshot).await;
            }
            return Ok(None);
        };

        let tier = detail.tier;
        let mut removed = Vec::new();
        let identity = match detail.object_type {
            Some(actual) if actual != identity.object_type => {
                removed.push(identity.clone());
                ObjectIdentity::new(identity.owner, identity.name, actual)
            }
            _ => identity,
        };
        let object = merge(&identity, Some(detail), Utc::now());
        if !object.is_complete() {
            tracing::warn!(object = %identity, "no column detail available, keeping stub");
        }

        let relationships = if object.is_complete() && identity.is_table() {
            match self.source.find_relationships(std::slice::from_ref(&identity)).await {
                Ok(scan) => Some(scan.relationships),
                Err(err) => {
                    tracing::warn!(object = %identity, error = %err, "relationship lookup failed, keeping previous edges");
                    None
                }
            }
        } else {
            None
        };

        let snapshot = self.store.put(SnapshotDelta {
            objects: vec![object],
            relationships,
            removed,
            tier,
        });
        self.store.persist(&snapshot).await;
        Ok(snapshot.get(&identity).cloned())
    }

    async fn rebuild(&self) -> Result<RefreshReport> {
        let started = Instant::now();
        let discovery = self.source.discover_objects(None).await?;
        let now = Utc::now();
        tracing::info!(
            owner = %discovery.owner,
            tier = %discovery.tier,
            objects = discovery.objects.len(),
            "full refresh started"
        );

        let mut objects: Vec<CatalogObject> = Vec::with_capacity(discovery.objects.len());
        let mut failed: Vec<ObjectIdentity> = Vec::new();

        if self.policy.eager_details {
            let loads = stream::iter(discovery.objects.iter().cloned())
                .map(|id| {
                    let source = self.source.clone();
                    async move {
                        let result = source.load_details(&id).await;
                        (id, result)
                    }
                })
                .buffer_unordered(self.policy.detail_concurrency)
                .collect::<Vec<_>>()
                .await;

            for (id, result) in loads {
                match result {
                    Ok(Some(detail)) => objects.push(merge(&id, Some(detail), now)),
                    Ok(None) | Err(Error::NotFound(_)) => {
                        tracing::debug!(object = %id, "object vanished during refresh");
                    }
                    Err(err) => {
                        tracing::warn!(object = %id, error = %err, "detail load failed, keeping stub");
                        failed.push(id.clone());
                        objects.push(CatalogObject::stub(id, now));
                    }
                }
            }
        } else {
            // Names only; complete detail from the latest generation carries over
            let current = self.store.snapshot();
            for id in &discovery.objects {
                match current.get(id) {
                    Some(existing) if existing.is_complete() => {
                        objects.push(CatalogObject::clone(existing))
                    }
                    _ => objects.push(CatalogObject::stub(id.clone(), now)),
                }
            }
        }

        let tables: Vec<ObjectIdentity> = objects
            .iter()
            .filter(|o| o.identity.is_table())
            .map(|o| o.identity.clone())
            .collect();
        let (relationships, relationship_tier): (Vec<RelationshipInfo>, _) = if tables.is_empty() {
            (Vec::new(), Some(discovery.tier))
        } else {
            match self.source.find_relationships(&tables).await {
                Ok(scan) => {
                    // Fresh edges supersede any carried over with old detail
                    for object in &mut objects {
                        object.relationships.clear();
                    }
                    (scan.relationships, Some(scan.tier))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "relationship scan failed, committing without new edges");
                    (Vec::new(), None)
                }
            }
        };

        failed.sort();
        let snapshot = self
            .store
            .replace(discovery.tier, now, objects, relationships);
        let persisted = self.store.persist(&snapshot).await;
        let stats = snapshot.stats();

        let report = RefreshReport {
            version: snapshot.version(),
            tier: discovery.tier,
            owner: discovery.owner,
            objects: stats.objects,
            complete: stats.complete,
            stubs: stats.stubs,
            failed,
            relationships: stats.relationships,
            relationship_tier,
            pruned_edges: snapshot.pruned_edges(),
            persisted,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            version = report.version,
            complete = report.complete,
            stubs = report.stubs,
            failed = report.failed.len(),
            relationships = report.relationships,
            elapsed_ms = report.elapsed_ms,
            "full refresh committed"
        );
        *lock(&self.last_report) = Some(report.clone());
        Ok(report)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::metadata::{AccessTier, DetailRows, Discovery, ObjectType, RawColumnRow, RelationshipScan};

    #[derive(Default)]
    struct FakeSource {
        details: Mutex<BTreeMap<ObjectIdentity, DetailRows>>,
        failing: Mutex<HashSet<ObjectIdentity>>,
        discover_calls: AtomicUsize,
        detail_calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeSource {
        fn with(objects: &[ObjectIdentity]) -> Self {
            let source = Self::default();
            for id in objects {
                source.insert(id.clone(), &["ID", "NAME"]);
            }
            source
        }

        fn insert(&self, id: ObjectIdentity, columns: &[&str]) {
            let detail = DetailRows {
                object_type: Some(id.object_type),
                columns: columns
                    .iter()
                    .enumerate()
                    .map(|(i, name)| RawColumnRow {
                        name: name.to_string(),
                        data_type: "NUMBER".to_string(),
                        nullable: "N".to_string(),
                        column_id: Some(i as i64 + 1),
                        ..Default::default()
                    })
                    .collect(),
                tier: Some(AccessTier::Full),
                ..Default::default()
            };
            self.details.lock().unwrap().insert(id, detail);
        }
    }

    #[async_trait]
    impl CatalogSource for FakeSource {
        async fn discover_objects(&self, _owner: Option<&str>) -> Result<Discovery> {
            self.discover_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Discovery {
                objects: self.details.lock().unwrap().keys().cloned().collect(),
                tier: AccessTier::Full,
                owner: "HR".to_string(),
            })
        }

        async fn load_details(&self, identity: &ObjectIdentity) -> Result<Option<DetailRows>> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(identity) {
                return Err(Error::TransientConnectivity {
                    attempts: 3,
                    message: "ORA-03113".to_string(),
                });
            }
            Ok(self.details.lock().unwrap().get(identity).cloned())
        }

        async fn find_relationships(&self, _tables: &[ObjectIdentity]) -> Result<RelationshipScan> {
            Ok(RelationshipScan {
                relationships: Vec::new(),
                tier: AccessTier::Full,
            })
        }
    }

    fn coordinator(source: Arc<FakeSource>, policy: RefreshPolicy) -> RefreshCoordinator {
        RefreshCoordinator::new(source, Arc::new(SchemaCacheStore::in_memory()), policy)
    }

    fn employees() -> ObjectIdentity {
        ObjectIdentity::table("HR", "EMPLOYEES")
    }

    #[tokio::test]
    async fn test_ensure_loaded_serves_complete_hits_from_cache() {
        let source = Arc::new(FakeSource::with(&[employees()]));
        let coordinator = coordinator(source.clone(), RefreshPolicy::default());

        let first = coordinator.ensure_loaded(&employees()).await.unwrap().unwrap();
        assert!(first.is_complete());
        assert_eq!(first.columns.len(), 2);
        coordinator.ensure_loaded(&employees()).await.unwrap().unwrap();
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_loaded_shares_one_load() {
        let source = Arc::new(FakeSource {
            delay: Some(Duration::from_millis(20)),
            ..FakeSource::default()
        });
        source.insert(employees(), &["ID"]);
        let coordinator = coordinator(source.clone(), RefreshPolicy::default());

        let calls = (0..6).map(|_| {
            let c = coordinator.clone();
            async move { c.ensure_loaded(&employees()).await }
        });
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|r| matches!(r, Ok(Some(o)) if o.is_complete())));
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vanished_object_is_dropped() {
        let source = Arc::new(FakeSource::with(&[employees()]));
        let coordinator = coordinator(source.clone(), RefreshPolicy::default());
        coordinator.refresh_all().await.unwrap();
        assert!(coordinator.store().snapshot().contains(&employees()));

        source.details.lock().unwrap().clear();
        assert!(coordinator.refresh_one(&employees()).await.unwrap().is_none());
        assert!(!coordinator.store().snapshot().contains(&employees()));
    }

    #[tokio::test]
    async fn test_type_change_replaces_identity() {
        let source = Arc::new(FakeSource::default());
        let as_view = ObjectIdentity::view("HR", "EMP_V");
        let as_mview = ObjectIdentity::new("HR", "EMP_V", ObjectType::MaterializedView);
        source.insert(as_view.clone(), &["ID"]);
        let coordinator = coordinator(source.clone(), RefreshPolicy::default());
        coordinator.refresh_all().await.unwrap();

        let mut detail = source.details.lock().unwrap().remove(&as_view).unwrap();
        detail.object_type = Some(ObjectType::MaterializedView);
        source.details.lock().unwrap().insert(as_view.clone(), detail);

        let loaded = coordinator.refresh_one(&as_view).await.unwrap().unwrap();
        assert_eq!(loaded.identity, as_mview);
        let snapshot = coordinator.store().snapshot();
        assert!(!snapshot.contains(&as_view));
        assert!(snapshot.contains(&as_mview));
    }

    #[tokio::test]
    async fn test_failed_detail_loads_leave_stubs() {
        let ids: Vec<_> = ["A", "B", "C"].iter().map(|n| ObjectIdentity::table("HR", *n)).collect();
        let source = Arc::new(FakeSource::with(&ids));
        source.failing.lock().unwrap().insert(ids[1].clone());
        let coordinator = coordinator(source, RefreshPolicy::default());

        let report = coordinator.refresh_all().await.unwrap();
        assert_eq!(report.objects, 3);
        assert_eq!(report.complete, 2);
        assert_eq!(report.stubs, 1);
        assert_eq!(report.failed, vec![ids[1].clone()]);
        assert!(matches!(
            coordinator.degraded_status().as_slice(),
            [DegradedStatus::PartialRefresh { .. }]
        ));
    }

    #[tokio::test]
    async fn test_lazy_refresh_carries_complete_detail_forward() {
        let source = Arc::new(FakeSource::with(&[employees()]));
        let policy = RefreshPolicy {
            eager_details: false,
            ..RefreshPolicy::default()
        };
        let coordinator = coordinator(source.clone(), policy);

        coordinator.refresh_all().await.unwrap();
        assert!(!coordinator.store().snapshot().get(&employees()).unwrap().is_complete());

        coordinator.ensure_loaded(&employees()).await.unwrap();
        let report = coordinator.refresh_all().await.unwrap();
        assert_eq!(report.complete, 1);
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_miss_refresh_respects_cooldown() {
        let source = Arc::new(FakeSource::default());
        let policy = RefreshPolicy {
            refresh_on_miss: true,
            miss_cooldown: Duration::from_secs(30),
            ..RefreshPolicy::default()
        };
        let coordinator = coordinator(source.clone(), policy);

        assert!(coordinator.resolve("EMPLOYEES").await.unwrap().is_empty());
        assert!(coordinator.resolve("EMPLOYEES").await.unwrap().is_empty());
        assert_eq!(source.discover_calls.load(Ordering::SeqCst), 1);

        source.insert(employees(), &["ID"]);
        tokio::time::advance(Duration::from_secs(31)).await;
        let found = coordinator.resolve("employees").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(source.discover_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_cache_refreshes_inline_when_expired() {
        let source = Arc::new(FakeSource::with(&[employees()]));
        let coordinator = coordinator(source, RefreshPolicy::default());

        let report = coordinator.refresh_if_expired().await.unwrap();
        assert_eq!(report.map(|r| r.objects), Some(1));
        assert!(coordinator.refresh_if_expired().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_cadence_refreshes_on_schedule() {
        let source = Arc::new(FakeSource::with(&[employees()]));
        let on_demand = coordinator(source.clone(), RefreshPolicy::default());
        assert!(on_demand.spawn_scheduler().is_none());

        let policy = RefreshPolicy {
            cadence: RefreshCadence::Interval(Duration::from_secs(60)),
            ..RefreshPolicy::default()
        };
        let scheduled = coordinator(source.clone(), policy);
        let handle = scheduled.spawn_scheduler().unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(source.discover_calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduled.last_report().map(|r| r.objects), Some(1));
        handle.abort();
    }
}
