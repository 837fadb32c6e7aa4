//! Ordered tier fallback table.
//!
//! Each logical catalog query maps to the statements to try, broadest
//! visibility first. The reader walks a chain only on an
//! insufficient-privilege failure; exhausting it means [`AccessTier::None`].

use super::queries::*;
use crate::metadata::AccessTier;

/// Logical dictionary queries the reader can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CatalogQuery {
    Discover,
    ObjectType,
    Columns,
    TableComment,
    ColumnComments,
    Constraints,
    Indexes,
    OutgoingRelationships,
    IncomingRelationships,
    OwnerRelationships,
    DatabaseVersion,
}

impl CatalogQuery {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::ObjectType => "object_type",
            Self::Columns => "columns",
            Self::TableComment => "table_comment",
            Self::ColumnComments => "column_comments",
            Self::Constraints => "constraints",
            Self::Indexes => "indexes",
            Self::OutgoingRelationships => "outgoing_relationships",
            Self::IncomingRelationships => "incoming_relationships",
            Self::OwnerRelationships => "owner_relationships",
            Self::DatabaseVersion => "database_version",
        }
    }
}

/// One statement in a fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStep {
    pub tier: AccessTier,
    pub sql: &'static str,
}

impl TierStep {
    const fn full(sql: &'static str) -> Self {
        Self {
            tier: AccessTier::Full,
            sql,
        }
    }

    const fn own(sql: &'static str) -> Self {
        Self {
            tier: AccessTier::Own,
            sql,
        }
    }

    /// Whether the statement references the named bind (`owner` for `:owner`).
    pub fn uses_bind(&self, name: &str) -> bool {
        self.sql
            .match_indices(':')
            .any(|(idx, _)| self.sql[idx + 1..].starts_with(name))
    }
}

const DISCOVER: &[TierStep] = &[TierStep::full(DISCOVER_ALL), TierStep::own(DISCOVER_USER)];
const OBJECT_TYPE: &[TierStep] = &[
    TierStep::full(OBJECT_TYPE_ALL),
    TierStep::own(OBJECT_TYPE_USER),
];
const COLUMNS: &[TierStep] = &[TierStep::full(COLUMNS_ALL), TierStep::own(COLUMNS_USER)];
const TABLE_COMMENT: &[TierStep] = &[
    TierStep::full(TABLE_COMMENT_ALL),
    TierStep::own(TABLE_COMMENT_USER),
];
const COLUMN_COMMENTS: &[TierStep] = &[
    TierStep::full(COLUMN_COMMENTS_ALL),
    TierStep::own(COLUMN_COMMENTS_USER),
];
const CONSTRAINTS: &[TierStep] = &[
    TierStep::full(CONSTRAINTS_ALL),
    TierStep::own(CONSTRAINTS_USER),
];
const INDEXES: &[TierStep] = &[TierStep::full(INDEXES_ALL), TierStep::own(INDEXES_USER)];
const OUTGOING: &[TierStep] = &[
    TierStep::full(OUTGOING_FKS_ALL),
    TierStep::own(OUTGOING_FKS_USER),
];
const INCOMING: &[TierStep] = &[
    TierStep::full(INCOMING_FKS_ALL),
    TierStep::own(INCOMING_FKS_USER),
];
const OWNER_FKS: &[TierStep] = &[TierStep::full(OWNER_FKS_ALL), TierStep::own(OWNER_FKS_USER)];
const VERSION: &[TierStep] = &[TierStep::full(VERSION_ALL), TierStep::own(VERSION_USER)];

/// Statements to try for `query`, broadest first.
pub fn fallback_chain(query: CatalogQuery) -> &'static [TierStep] {
    match query {
        CatalogQuery::Discover => DISCOVER,
        CatalogQuery::ObjectType => OBJECT_TYPE,
        CatalogQuery::Columns => COLUMNS,
        CatalogQuery::TableComment => TABLE_COMMENT,
        CatalogQuery::ColumnComments => COLUMN_COMMENTS,
        CatalogQuery::Constraints => CONSTRAINTS,
        CatalogQuery::Indexes => INDEXES,
        CatalogQuery::OutgoingRelationships => OUTGOING,
        CatalogQuery::IncomingRelationships => INCOMING,
        CatalogQuery::OwnerRelationships => OWNER_FKS,
        CatalogQuery::DatabaseVersion => VERSION,
    }
}
