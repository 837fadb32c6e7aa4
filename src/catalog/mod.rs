//! Tiered catalog reader.
//!
//! Issues dictionary queries through the connection pool, degrading from
//! the global `ALL_*` views to the self-owned `USER_*` views on an
//! insufficient-privilege failure, and finally to an empty result at
//! [`AccessTier::None`]. The reader caches nothing but the tier each query
//! settled on.
//!
//! [`AccessTier::None`]: crate::metadata::AccessTier::None

pub mod queries;
mod reader;
mod tier;

pub use reader::{ReaderConfig, TieredCatalogReader};
pub use tier::{fallback_chain, CatalogQuery, TierStep};
