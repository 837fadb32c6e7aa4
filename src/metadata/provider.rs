//! CatalogSource trait definition.
//!
//! The CatalogSource trait abstracts over where raw catalog rows come from.
//! The primary implementation is the [`TieredCatalogReader`], which queries
//! the data dictionary through pooled worker connections. The refresh
//! coordinator only ever talks to this trait, so it can be driven by
//! in-memory sources in tests.
//!
//! [`TieredCatalogReader`]: crate::catalog::TieredCatalogReader

use async_trait::async_trait;

use super::types::*;
use crate::Result;

/// Trait for fetching raw catalog data.
///
/// Implementations never fail on missing privileges: they degrade to a
/// lower [`AccessTier`] instead. Only connectivity and pool exhaustion are
/// reported as errors.
///
/// # Example
///
/// ```ignore
/// use dbcontext::metadata::CatalogSource;
///
/// async fn example(source: &impl CatalogSource) -> dbcontext::Result<()> {
///     let discovery = source.discover_objects(None).await?;
///     for identity in &discovery.objects {
///         let detail = source.load_details(identity).await?;
///         println!("{identity}: {:?}", detail.map(|d| d.columns.len()));
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// List tables, views and materialized views visible to the principal.
    ///
    /// `owner` defaults to the effective schema.
    async fn discover_objects(&self, owner: Option<&str>) -> Result<Discovery>;

    /// Load column and comment rows for one object.
    ///
    /// Returns `Ok(None)` when the object does not exist.
    async fn load_details(&self, identity: &ObjectIdentity) -> Result<Option<DetailRows>>;

    /// Find foreign-key edges touching the given tables.
    ///
    /// Callers pass only identities of type [`ObjectType::Table`].
    async fn find_relationships(&self, tables: &[ObjectIdentity]) -> Result<RelationshipScan>;

    /// Product/version banner. Never fails; errors are folded into the result.
    async fn database_info(&self) -> DatabaseInfo {
        DatabaseInfo {
            vendor: "unknown".to_string(),
            version: "unknown".to_string(),
            schema: String::new(),
            additional_info: Vec::new(),
            error: None,
        }
    }
}
