//! Schema metadata module.
//!
//! This module holds the canonical entity model, the [`CatalogSource`]
//! abstraction over raw dictionary access, and the pure normalizer that turns
//! raw rows into cacheable [`CatalogObject`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐    raw rows    ┌──────────────────────────┐
//! │ CatalogSource            │ ─────────────▶ │ normalizer (pure)        │
//! │  - discover_objects()    │                │  - normalize_discovery() │
//! │  - load_details()        │                │  - merge()               │
//! │  - find_relationships()  │                │  - normalize_relationships│
//! └──────────────────────────┘                └──────────────────────────┘
//!                                                          │
//!                                                          ▼
//!                                               CatalogObject / RelationshipInfo
//! ```

pub mod normalizer;
mod provider;
mod types;

pub use provider::CatalogSource;
pub use types::*;
