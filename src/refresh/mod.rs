//! Refresh coordination.
//!
//! The [`RefreshCoordinator`] sits between a [`CatalogSource`] and the
//! [`SchemaCacheStore`]. It decides when the cache is refreshed (explicit
//! request, expiry, name miss, optional timer), deduplicates concurrent loads
//! and commits whatever it could read as a new snapshot generation.
//!
//! ```text
//!   ensure_loaded(id) ──▶ SingleFlight<id>  ──▶ load_details ─┐
//!                                                             ├─▶ store.put / replace ─▶ persist
//!   refresh_all()     ──▶ SingleFlight<()>  ──▶ discover ─────┘
//!                                               + details (bounded)
//!                                               + relationships
//! ```
//!
//! [`CatalogSource`]: crate::metadata::CatalogSource
//! [`SchemaCacheStore`]: crate::cache::SchemaCacheStore

mod coordinator;
mod policy;
mod single_flight;
mod status;

pub use coordinator::RefreshCoordinator;
pub use policy::{RefreshCadence, RefreshPolicy};
pub use single_flight::SingleFlight;
pub use status::{DegradedStatus, RefreshReport};
pub(crate) use status::tier_detail;
