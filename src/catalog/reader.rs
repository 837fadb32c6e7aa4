//! Permission-degrading dictionary reader.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use super::tier::{fallback_chain, CatalogQuery, TierStep};
use crate::config::Settings;
use crate::metadata::normalizer::{canonical_name, normalize_discovery, normalize_relationships, parse_allow_list};
use crate::metadata::{
    AccessTier, CatalogSource, DatabaseInfo, DetailRows, Discovery, ObjectIdentity, ObjectType,
    RawColumnRow, RawConstraintRow, RawIndexRow, RawRelationshipRow, RelationshipInfo,
    RelationshipScan,
};
use crate::pool::{ConnectionPool, Row};
use crate::{Error, Result};

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Per-statement timeout.
    pub statement_timeout: Duration,
    /// Schema to describe; the session user when unset.
    pub target_owner: Option<String>,
    /// Objects substituted for discovery when no dictionary view is readable.
    pub allow_list: Vec<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(30),
            target_owner: None,
            allow_list: Vec::new(),
        }
    }
}

impl From<&Settings> for ReaderConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            statement_timeout: settings.statement_timeout(),
            target_owner: settings.connection.target_owner(),
            allow_list: settings.catalog.allow_list.clone(),
        }
    }
}

/// Principal identity resolved from the first session.
#[derive(Debug, Clone)]
struct Principal {
    username: String,
    effective_owner: String,
}

/// Catalog reader that walks the tier fallback table.
///
/// Privilege failures never escape: a query whose every tier is refused
/// returns no rows at [`AccessTier::None`]. The lowest tier each logical
/// query settled on is remembered per owner until [`reprobe`](Self::reprobe),
/// so a refused view is not retried on every call. Owners are kept apart
/// because `OWN` statements can only ever answer for the session user.
pub struct TieredCatalogReader {
    pool: Arc<ConnectionPool>,
    config: ReaderConfig,
    principal: OnceCell<Principal>,
    learned: DashMap<(CatalogQuery, String), AccessTier>,
}

impl TieredCatalogReader {
    pub fn new(pool: Arc<ConnectionPool>, config: ReaderConfig) -> Self {
        Self {
            pool,
            config,
            principal: OnceCell::new(),
            learned: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Forget learned tiers; the next queries start from `FULL` again.
    pub fn reprobe(&self) {
        self.learned.clear();
        tracing::info!("catalog access tiers will be re-probed");
    }

    /// Lowest tier observed so far for the effective owner's queries, if
    /// any ran.
    pub fn observed_tier(&self) -> Option<AccessTier> {
        let owner = self.principal.get().map(|p| p.effective_owner.as_str());
        self.learned
            .iter()
            .filter(|entry| owner.is_none_or(|owner| entry.key().1 == owner))
            .map(|entry| *entry.value())
            .min()
    }

    /// Owner that discovery is scoped to: the configured target schema, else
    /// the connecting user, upper-cased.
    pub async fn effective_owner(&self) -> Result<String> {
        Ok(self.principal().await?.effective_owner.clone())
    }

    async fn principal(&self) -> Result<&Principal> {
        self.principal
            .get_or_try_init(|| async {
                let username = self
                    .pool
                    .with_retry("resolve_principal", |conn| async move {
                        Ok(conn.username().to_uppercase())
                    })
                    .await?;
                let effective_owner = self
                    .config
                    .target_owner
                    .clone()
                    .unwrap_or_else(|| username.clone());
                tracing::info!(user = %username, owner = %effective_owner, "resolved catalog principal");
                Ok(Principal {
                    username,
                    effective_owner,
                })
            })
            .await
    }

    async fn run_step(&self, step: &TierStep, owner: &str, name: Option<&str>) -> Result<Vec<Row>> {
        let mut binds: Vec<(&'static str, String)> = Vec::new();
        if step.uses_bind("owner") {
            binds.push(("owner", owner.to_string()));
        }
        if let Some(name) = name.filter(|_| step.uses_bind("name")) {
            binds.push(("name", name.to_string()));
        }
        let timeout = self.config.statement_timeout;
        let binds = &binds;
        self.pool
            .with_retry("catalog_query", |conn| async move {
                let binds: Vec<(&str, &str)> =
                    binds.iter().map(|(k, v)| (*k, v.as_str())).collect();
                match tokio::time::timeout(timeout, conn.query(step.sql, &binds, Some(timeout)))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::StatementTimeout(timeout)),
                }
            })
            .await
    }

    /// Run `query` down its fallback chain.
    ///
    /// `OWN` statements only see the session user's schema, so they are
    /// skipped when `owner` is someone else.
    async fn run_tiered(
        &self,
        query: CatalogQuery,
        owner: &str,
        name: Option<&str>,
    ) -> Result<(Vec<Row>, AccessTier)> {
        let principal = self.principal().await?;
        let floor = self.learned.get(&(query, owner.to_string())).map(|t| *t);

        for step in fallback_chain(query) {
            if floor.is_some_and(|floor| step.tier > floor) {
                continue;
            }
            if step.tier == AccessTier::Own && owner != principal.username {
                tracing::debug!(query = query.label(), owner, "own-schema view cannot answer for another owner");
                continue;
            }
            match self.run_step(step, owner, name).await {
                Ok(rows) => {
                    self.learn(query, owner, step.tier);
                    return Ok((rows, step.tier));
                }
                Err(err) if err.is_insufficient_privilege() => {
                    tracing::warn!(
                        query = query.label(),
                        tier = %step.tier,
                        error = %err,
                        "insufficient privilege, falling back"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        self.learn(query, owner, AccessTier::None);
        tracing::warn!(query = query.label(), owner, "no readable dictionary view");
        Ok((Vec::new(), AccessTier::None))
    }

    fn learn(&self, query: CatalogQuery, owner: &str, tier: AccessTier) {
        let previous = self.learned.insert((query, owner.to_string()), tier);
        if previous.is_some_and(|p| p != tier) || (previous.is_none() && tier.is_degraded()) {
            tracing::info!(query = query.label(), owner, tier = %tier, "catalog access tier settled");
        }
    }

    fn allow_listed(&self, owner: &str) -> Vec<ObjectIdentity> {
        let (identities, rejected) = parse_allow_list(&self.config.allow_list, owner);
        for entry in rejected {
            tracing::warn!(entry = %entry, "ignoring invalid allow-list entry");
        }
        identities
    }

    async fn relationships_for(
        &self,
        query: CatalogQuery,
        owner: &str,
        name: Option<&str>,
    ) -> Result<(Vec<RelationshipInfo>, AccessTier)> {
        let (rows, tier) = self.run_tiered(query, owner, name).await?;
        let raw: Vec<RawRelationshipRow> = rows.iter().map(relationship_row).collect();
        Ok((normalize_relationships(&raw), tier))
    }
}

fn column_row(row: &Row) -> RawColumnRow {
    RawColumnRow {
        name: row.text_or_empty(0),
        data_type: row.text_or_empty(1),
        data_length: row.int(2),
        data_precision: row.int(3),
        data_scale: row.int(4),
        nullable: row.text_or_empty(5),
        column_id: row.int(6),
        data_default: row.text(7),
    }
}

fn constraint_row(row: &Row) -> RawConstraintRow {
    RawConstraintRow {
        constraint_name: row.text_or_empty(0),
        constraint_type: row.text_or_empty(1),
        column_name: row.text(2),
        position: row.int(3),
        search_condition: row.text(4),
        status: row.text(5),
    }
}

fn index_row(row: &Row) -> RawIndexRow {
    RawIndexRow {
        index_name: row.text_or_empty(0),
        uniqueness: row.text_or_empty(1),
        column_name: row.text_or_empty(2),
        position: row.int(3).unwrap_or(0),
        status: row.text(4),
        tablespace: row.text(5),
    }
}

fn relationship_row(row: &Row) -> RawRelationshipRow {
    RawRelationshipRow {
        constraint_name: row.text_or_empty(0),
        owner: row.text_or_empty(1),
        table_name: row.text_or_empty(2),
        column_name: row.text_or_empty(3),
        position: row.int(4).unwrap_or(0),
        r_owner: row.text_or_empty(5),
        r_table_name: row.text_or_empty(6),
        r_column_name: row.text_or_empty(7),
    }
}

/// Pick the dictionary type for `identity` among the reported ones.
fn resolve_type(identity: &ObjectIdentity, reported: &[ObjectType]) -> Option<ObjectType> {
    if reported.contains(&identity.object_type) {
        return Some(identity.object_type);
    }
    [ObjectType::MaterializedView, ObjectType::View, ObjectType::Table]
        .into_iter()
        .find(|ty| reported.contains(ty))
}

#[async_trait]
impl CatalogSource for TieredCatalogReader {
    async fn discover_objects(&self, owner: Option<&str>) -> Result<Discovery> {
        let owner = match owner {
            Some(owner) => canonical_name(owner),
            None => self.effective_owner().await?,
        };
        let (rows, tier) = self.run_tiered(CatalogQuery::Discover, &owner, None).await?;

        let objects = if tier == AccessTier::None {
            let substitute = self.allow_listed(&owner);
            tracing::warn!(
                owner = %owner,
                objects = substitute.len(),
                "dictionary discovery unavailable, using configured allow-list"
            );
            substitute
        } else {
            normalize_discovery(
                rows.iter()
                    .map(|r| (r.text_or_empty(0), r.text_or_empty(1), r.text_or_empty(2))),
            )
        };

        tracing::debug!(owner = %owner, tier = %tier, objects = objects.len(), "discovered objects");
        Ok(Discovery {
            objects,
            tier,
            owner,
        })
    }

    async fn load_details(&self, identity: &ObjectIdentity) -> Result<Option<DetailRows>> {
        let owner = identity.owner.as_str();
        let name = Some(identity.name.as_str());

        let (type_rows, type_tier) = self
            .run_tiered(CatalogQuery::ObjectType, owner, name)
            .await?;
        let reported: Vec<ObjectType> = type_rows
            .iter()
            .filter_map(|r| r.text(0))
            .filter_map(|t| ObjectType::from_dictionary(&t))
            .collect();
        if type_tier != AccessTier::None && reported.is_empty() {
            tracing::debug!(object = %identity, "object not found in dictionary");
            return Ok(None);
        }

        let (column_rows, column_tier) = self.run_tiered(CatalogQuery::Columns, owner, name).await?;
        let (comment_rows, comment_tier) = self
            .run_tiered(CatalogQuery::TableComment, owner, name)
            .await?;
        let (col_comment_rows, col_comment_tier) = self
            .run_tiered(CatalogQuery::ColumnComments, owner, name)
            .await?;

        let mut tiers = vec![type_tier, column_tier, comment_tier, col_comment_tier];

        let object_type = resolve_type(identity, &reported);
        let kind = object_type.unwrap_or(identity.object_type);
        let mut constraints = Vec::new();
        if kind.has_constraints() {
            let (rows, tier) = self.run_tiered(CatalogQuery::Constraints, owner, name).await?;
            constraints = rows.iter().map(constraint_row).collect();
            tiers.push(tier);
        }
        let mut indexes = Vec::new();
        if kind.has_indexes() {
            let (rows, tier) = self.run_tiered(CatalogQuery::Indexes, owner, name).await?;
            indexes = rows.iter().map(index_row).collect();
            tiers.push(tier);
        }

        let tier = tiers.into_iter().min().unwrap_or(AccessTier::None);

        Ok(Some(DetailRows {
            object_type,
            columns: column_rows.iter().map(column_row).collect(),
            table_comment: comment_rows.first().and_then(|r| r.text(0)),
            column_comments: col_comment_rows
                .iter()
                .filter_map(|r| Some((r.text(0)?, r.text(1)?)))
                .collect(),
            constraints,
            indexes,
            tier: Some(tier),
        }))
    }

    async fn find_relationships(&self, tables: &[ObjectIdentity]) -> Result<RelationshipScan> {
        let requested: BTreeSet<&ObjectIdentity> = tables
            .iter()
            .filter(|id| {
                if !id.is_table() {
                    tracing::warn!(object = %id, "skipping non-table in relationship lookup");
                }
                id.is_table()
            })
            .collect();

        let mut found: Vec<RelationshipInfo> = Vec::new();
        let mut tier = AccessTier::Full;

        if let [only] = requested.iter().copied().collect::<Vec<_>>().as_slice() {
            let name = Some(only.name.as_str());
            let (outgoing, out_tier) = self
                .relationships_for(CatalogQuery::OutgoingRelationships, &only.owner, name)
                .await?;
            let (incoming, in_tier) = self
                .relationships_for(CatalogQuery::IncomingRelationships, &only.owner, name)
                .await?;
            found.extend(outgoing);
            found.extend(incoming);
            tier = out_tier.min(in_tier);
        } else {
            let owners: BTreeSet<&str> = requested.iter().map(|id| id.owner.as_str()).collect();
            for owner in owners {
                let (edges, owner_tier) = self
                    .relationships_for(CatalogQuery::OwnerRelationships, owner, None)
                    .await?;
                found.extend(edges);
                tier = tier.min(owner_tier);
            }
        }

        let mut unique = BTreeMap::new();
        for edge in found {
            if requested.iter().any(|id| edge.touches(id)) {
                unique.entry(edge.key()).or_insert(edge);
            }
        }

        Ok(RelationshipScan {
            relationships: unique.into_values().collect(),
            tier,
        })
    }

    async fn database_info(&self) -> DatabaseInfo {
        let schema = self.effective_owner().await.unwrap_or_default();
        let owner = schema.clone();
        match self.run_tiered(CatalogQuery::DatabaseVersion, &owner, None).await {
            Ok((rows, tier)) if tier != AccessTier::None && !rows.is_empty() => {
                let mut banners = rows.iter().filter_map(|r| r.text(0));
                let version = banners.next().unwrap_or_else(|| "unknown".to_string());
                let vendor = if version.contains("Oracle") {
                    "Oracle"
                } else {
                    "unknown"
                };
                DatabaseInfo {
                    vendor: vendor.to_string(),
                    version,
                    schema,
                    additional_info: banners.collect(),
                    error: None,
                }
            }
            Ok(_) => DatabaseInfo {
                vendor: "unknown".to_string(),
                version: "unknown".to_string(),
                schema,
                additional_info: Vec::new(),
                error: Some("version views are not readable".to_string()),
            },
            Err(err) => DatabaseInfo {
                vendor: "unknown".to_string(),
                version: "unknown".to_string(),
                schema,
                additional_info: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }
}
