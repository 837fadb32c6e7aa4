//! Immutable snapshot generations.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::similarity::{fold, score_folded, MatchTier};
use crate::metadata::normalizer::canonical_name;
use crate::metadata::{AccessTier, CatalogObject, ObjectIdentity, RelationshipInfo};

/// One object matched by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub object: Arc<CatalogObject>,
    pub score: f64,
    pub tier: MatchTier,
}

/// Changes to apply on top of the current generation.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDelta {
    /// Objects to insert or replace.
    pub objects: Vec<CatalogObject>,
    /// Edges for the objects above. `None` keeps their existing edges.
    pub relationships: Option<Vec<RelationshipInfo>>,
    /// Objects that no longer exist.
    pub removed: Vec<ObjectIdentity>,
    /// Tier the delta was read under.
    pub tier: Option<AccessTier>,
}

impl SnapshotDelta {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.removed.is_empty() && self.relationships.is_none()
    }
}

/// Counts of what a generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct SnapshotStats {
    pub objects: usize,
    pub complete: usize,
    pub stubs: usize,
    pub relationships: usize,
}

/// One complete, internally consistent generation of the schema model.
///
/// Never mutated after construction; a new generation is built for every
/// change. Relationship edges only ever reference objects of the same
/// generation.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    version: u64,
    tier: AccessTier,
    /// Time of the last full build; `None` until one has happened.
    built_at: Option<DateTime<Utc>>,
    objects: BTreeMap<ObjectIdentity, Arc<CatalogObject>>,
    /// Dictionary name -> identities carrying it.
    names: BTreeMap<String, Vec<ObjectIdentity>>,
    /// Folded (upper-cased) name -> identities; the key set for name and
    /// similarity search.
    folded: BTreeMap<String, Vec<ObjectIdentity>>,
    pruned_edges: usize,
}

impl SchemaSnapshot {
    /// The generation a cold process starts with.
    pub fn empty() -> Self {
        Self {
            version: 0,
            tier: AccessTier::None,
            built_at: None,
            objects: BTreeMap::new(),
            names: BTreeMap::new(),
            folded: BTreeMap::new(),
            pruned_edges: 0,
        }
    }

    /// Build a generation from loose objects and edges.
    ///
    /// `relationships` are attached to their source objects alongside any
    /// edges the objects already carry. Edges whose source or target is not
    /// among `objects` are dropped.
    pub fn build(
        version: u64,
        tier: AccessTier,
        built_at: Option<DateTime<Utc>>,
        objects: impl IntoIterator<Item = CatalogObject>,
        relationships: impl IntoIterator<Item = RelationshipInfo>,
    ) -> Self {
        let mut map: BTreeMap<ObjectIdentity, CatalogObject> = objects
            .into_iter()
            .map(|obj| (obj.identity.clone(), obj))
            .collect();
        for edge in relationships {
            if let Some(source) = map.get_mut(&edge.source) {
                source.relationships.push(edge);
            }
        }
        let map = map.into_iter().map(|(id, obj)| (id, Arc::new(obj))).collect();
        Self::from_objects(version, tier, built_at, map)
    }

    fn from_objects(
        version: u64,
        tier: AccessTier,
        built_at: Option<DateTime<Utc>>,
        mut objects: BTreeMap<ObjectIdentity, Arc<CatalogObject>>,
    ) -> Self {
        let present: BTreeSet<ObjectIdentity> = objects.keys().cloned().collect();
        let mut pruned_edges = 0;
        for object in objects.values_mut() {
            if edges_are_clean(object, &present) {
                continue;
            }
            let object = Arc::make_mut(object);
            let identity = object.identity.clone();
            let before = object.relationships.len();
            let mut seen = BTreeSet::new();
            object.relationships.retain(|edge| {
                edge.source == identity
                    && present.contains(&edge.target)
                    && seen.insert(edge.key())
            });
            object.relationships.sort_by_key(RelationshipInfo::key);
            pruned_edges += before - object.relationships.len();
        }
        if pruned_edges > 0 {
            tracing::debug!(version, pruned_edges, "pruned dangling relationship edges");
        }

        let mut names: BTreeMap<String, Vec<ObjectIdentity>> = BTreeMap::new();
        let mut folded: BTreeMap<String, Vec<ObjectIdentity>> = BTreeMap::new();
        for identity in objects.keys() {
            names
                .entry(identity.name.clone())
                .or_default()
                .push(identity.clone());
            folded
                .entry(fold(&identity.name))
                .or_default()
                .push(identity.clone());
        }

        Self {
            version,
            tier,
            built_at,
            objects,
            names,
            folded,
            pruned_edges,
        }
    }

    /// Next generation with `delta` applied.
    ///
    /// Unchanged objects are shared with this generation, not copied.
    pub fn apply(&self, delta: SnapshotDelta) -> Self {
        let mut objects = self.objects.clone();

        for identity in &delta.removed {
            objects.remove(identity);
        }

        let touched: BTreeSet<ObjectIdentity> =
            delta.objects.iter().map(|o| o.identity.clone()).collect();
        for mut object in delta.objects {
            if delta.relationships.is_none() {
                if let Some(previous) = objects.get(&object.identity) {
                    object.relationships = previous.relationships.clone();
                }
            }
            objects.insert(object.identity.clone(), Arc::new(object));
        }

        if let Some(edges) = delta.relationships {
            let touches = |edge: &RelationshipInfo| {
                touched.contains(&edge.source) || touched.contains(&edge.target)
            };
            for object in objects.values_mut() {
                if object.relationships.iter().any(touches) {
                    Arc::make_mut(object).relationships.retain(|e| !touches(e));
                }
            }
            for edge in edges {
                if let Some(source) = objects.get_mut(&edge.source) {
                    Arc::make_mut(source).relationships.push(edge);
                }
            }
        }

        let tier = match delta.tier {
            Some(tier) if self.objects.is_empty() => tier,
            Some(tier) => tier.min(self.tier),
            None => self.tier,
        };
        Self::from_objects(self.version + 1, tier, self.built_at, objects)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn tier(&self) -> AccessTier {
        self.tier
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Edges dropped while building this generation.
    pub fn pruned_edges(&self) -> usize {
        self.pruned_edges
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<&Arc<CatalogObject>> {
        self.objects.get(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.objects.contains_key(identity)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<CatalogObject>> {
        self.objects.values()
    }

    pub fn identities(&self) -> impl Iterator<Item = &ObjectIdentity> {
        self.objects.keys()
    }

    /// Objects named `name`, accepting `NAME` or `OWNER.NAME`.
    ///
    /// The name is resolved the way the database would first (unquoted means
    /// upper-case). When that finds nothing, a case-insensitive match is
    /// tried so quoted mixed-case objects can be named without quotes.
    pub fn lookup(&self, name: &str) -> Vec<Arc<CatalogObject>> {
        let (owner, name) = match name.trim().split_once('.') {
            Some((owner, name)) => (Some(canonical_name(owner)), name),
            None => (None, name),
        };
        let owned = |id: &&ObjectIdentity| owner.as_ref().is_none_or(|o| &id.owner == o);

        let exact: Vec<Arc<CatalogObject>> = self
            .names
            .get(&canonical_name(name))
            .into_iter()
            .flatten()
            .filter(owned)
            .filter_map(|id| self.objects.get(id).cloned())
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        self.folded
            .get(&fold(name.trim_matches('"')))
            .into_iter()
            .flatten()
            .filter(owned)
            .filter_map(|id| self.objects.get(id).cloned())
            .collect()
    }

    /// Name search: exact matches, then prefix matches, then substring
    /// matches, each group ordered by name. Case-insensitive.
    pub fn search(&self, term: &str, limit: usize) -> Vec<Arc<CatalogObject>> {
        let term = fold(term);
        let exact = self.folded.get(term.as_str()).into_iter().flatten();
        let prefix = self
            .folded
            .range::<str, _>((Bound::Excluded(term.as_str()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(term.as_str()))
            .flat_map(|(_, ids)| ids);
        let substring = self
            .folded
            .iter()
            .filter(|(key, _)| !key.starts_with(term.as_str()) && key.contains(term.as_str()))
            .flat_map(|(_, ids)| ids);

        exact
            .chain(prefix)
            .chain(substring)
            .filter_map(|id| self.objects.get(id).cloned())
            .take(limit)
            .collect()
    }

    /// Similarity search over cached names.
    ///
    /// Substring matches (score `1.0`) come first, then ratio matches by
    /// descending score; ties break on name, then identity.
    pub fn similarity_search(&self, term: &str, threshold: f64, limit: usize) -> Vec<SimilarityMatch> {
        let term = fold(term);
        let mut matches: Vec<SimilarityMatch> = Vec::new();
        for (key, ids) in &self.folded {
            let Some((tier, score)) = score_folded(&term, key, threshold) else {
                continue;
            };
            for id in ids {
                if let Some(object) = self.objects.get(id) {
                    matches.push(SimilarityMatch {
                        object: object.clone(),
                        score,
                        tier,
                    });
                }
            }
        }

        matches.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.object.identity.name.cmp(&b.object.identity.name))
                .then_with(|| a.object.identity.cmp(&b.object.identity))
        });
        matches.truncate(limit);
        matches
    }

    /// Edges whose target is `identity`.
    pub fn incoming(&self, identity: &ObjectIdentity) -> Vec<RelationshipInfo> {
        self.objects
            .values()
            .flat_map(|obj| obj.relationships.iter())
            .filter(|edge| &edge.target == identity)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SnapshotStats {
        let complete = self.objects.values().filter(|o| o.is_complete()).count();
        SnapshotStats {
            objects: self.objects.len(),
            complete,
            stubs: self.objects.len() - complete,
            relationships: self.objects.values().map(|o| o.relationships.len()).sum(),
        }
    }

    /// Whether the last full build is older than `ttl` (or never happened).
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.built_at {
            Some(built) => now.signed_duration_since(built) >= ttl,
            None => true,
        }
    }
}

impl PartialEq for SchemaSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.tier == other.tier
            && self.built_at == other.built_at
            && self.objects == other.objects
    }
}

/// Edges all originate here, resolve within `present`, and are sorted and
/// unique by key.
fn edges_are_clean(object: &CatalogObject, present: &BTreeSet<ObjectIdentity>) -> bool {
    let edges = &object.relationships;
    edges
        .iter()
        .all(|e| e.source == object.identity && present.contains(&e.target))
        && edges.windows(2).all(|w| w[0].key() < w[1].key())
}
