//! # dbcontext
//!
//! Permission-aware schema knowledge for database agents.
//!
//! ## Architecture
//!
//! dbcontext keeps an in-memory, versioned model of a database schema and
//! fills it from the data dictionary at whatever privilege level the
//! connecting principal actually has:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              DatabaseContext (tool surface)              │
//! │   describe / search / similar / related / columns        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [refresh]
//! ┌─────────────────────────────────────────────────────────┐
//! │   RefreshCoordinator: single-flight loads, policy        │
//! └─────────────────────────────────────────────────────────┘
//!            │                                 │
//!            ▼ [catalog]                       ▼ [cache]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ TieredCatalogReader      │   │ SchemaCacheStore         │
//! │  FULL → OWN → NONE       │   │  snapshot generations    │
//! └──────────────────────────┘   │  + SQLite persistence    │
//!            │                   └──────────────────────────┘
//!            ▼ [pool]
//! ┌─────────────────────────────────────────────────────────┐
//! │   ConnectionPool over worker sessions (NDJSON)           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod metadata;
pub mod pool;
pub mod refresh;
pub mod worker;

pub use context::DatabaseContext;
pub use error::{Error, Result};
