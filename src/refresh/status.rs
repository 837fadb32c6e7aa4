//! Structured refresh outcomes.

use serde::Serialize;

use crate::cache::ColdStartReason;
use crate::metadata::{AccessTier, ObjectIdentity};

/// Summary of one full refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub version: u64,
    /// Tier discovery ran under.
    pub tier: AccessTier,
    pub owner: String,
    pub objects: usize,
    pub complete: usize,
    pub stubs: usize,
    /// Objects whose detail load failed.
    pub failed: Vec<ObjectIdentity>,
    pub relationships: usize,
    /// `None` when the relationship scan could not run.
    pub relationship_tier: Option<AccessTier>,
    pub pruned_edges: usize,
    pub persisted: bool,
    pub elapsed_ms: u64,
}

impl RefreshReport {
    /// Degraded conditions this refresh ran into.
    pub fn degraded(&self) -> Vec<DegradedStatus> {
        let mut status = Vec::new();
        if self.tier.is_degraded() {
            status.push(DegradedStatus::TierDegraded {
                tier: self.tier,
                detail: tier_detail(self.tier).to_string(),
            });
        }
        if !self.failed.is_empty() {
            status.push(DegradedStatus::PartialRefresh {
                failed: self.failed.clone(),
            });
        }
        match self.relationship_tier {
            None if self.complete > 0 => status.push(DegradedStatus::RelationshipsUnavailable {
                detail: "relationship discovery failed".to_string(),
            }),
            Some(tier) if tier.is_degraded() => {
                status.push(DegradedStatus::RelationshipsUnavailable {
                    detail: format!("relationship discovery limited to tier {tier}"),
                })
            }
            _ => {}
        }
        status
    }
}

/// A degraded outcome reported alongside data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedStatus {
    /// Dictionary visibility below `FULL`.
    TierDegraded { tier: AccessTier, detail: String },
    /// Some objects are listed by name only.
    PartialRefresh { failed: Vec<ObjectIdentity> },
    /// Persisted state was unusable.
    ColdStart { reason: String },
    /// Relationship edges are missing or limited.
    RelationshipsUnavailable { detail: String },
}

impl DegradedStatus {
    pub fn cold_start(reason: &ColdStartReason) -> Self {
        let reason = match reason {
            ColdStartReason::UnknownFormat(tag) => {
                format!("persisted schema cache has unknown format {tag:?}")
            }
            ColdStartReason::Corrupt(err) => format!("persisted schema cache is unreadable: {err}"),
            ColdStartReason::Expired { saved_at } => {
                format!("persisted schema cache from {saved_at} is too old")
            }
            ColdStartReason::NoPersistedState => "no persisted schema cache".to_string(),
            ColdStartReason::Disabled => "schema cache persistence disabled".to_string(),
        };
        Self::ColdStart { reason }
    }

    /// One-line text for the tool surface.
    pub fn message(&self) -> String {
        match self {
            Self::TierDegraded { detail, .. } => detail.clone(),
            Self::PartialRefresh { failed } => {
                format!("{} object(s) could not be fully loaded", failed.len())
            }
            Self::ColdStart { reason } => reason.clone(),
            Self::RelationshipsUnavailable { detail } => detail.clone(),
        }
    }
}

pub(crate) fn tier_detail(tier: AccessTier) -> &'static str {
    match tier {
        AccessTier::Full => "full dictionary access",
        AccessTier::Own => "discovery limited to objects owned by the connecting user",
        AccessTier::None => "no dictionary access; using the configured allow-list",
    }
}
