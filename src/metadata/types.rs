//! Canonical schema model.
//!
//! These types are what the cache stores, persists and serves. Raw dictionary
//! rows live in [`DetailRows`] and friends until the normalizer turns them
//! into [`CatalogObject`]s.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// Kind of catalog object the cache tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Table,
    View,
    MaterializedView,
}

impl ObjectType {
    /// Parse the `OBJECT_TYPE` spelling used by the dictionary.
    pub fn from_dictionary(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('_', " ").as_str() {
            "TABLE" => Some(Self::Table),
            "VIEW" => Some(Self::View),
            "MATERIALIZED VIEW" | "MVIEW" => Some(Self::MaterializedView),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::MaterializedView => "MATERIALIZED_VIEW",
        }
    }

    /// Only tables carry constraint-backed relationships.
    pub fn has_constraints(&self) -> bool {
        matches!(self, Self::Table)
    }

    /// Tables and materialized view container tables can be indexed.
    pub fn has_indexes(&self) -> bool {
        matches!(self, Self::Table | Self::MaterializedView)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(owner, name, type)` identity of a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub owner: String,
    pub name: String,
    pub object_type: ObjectType,
}

impl ObjectIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            object_type,
        }
    }

    pub fn table(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(owner, name, ObjectType::Table)
    }

    pub fn view(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(owner, name, ObjectType::View)
    }

    /// `OWNER.NAME`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    pub fn is_table(&self) -> bool {
        self.object_type == ObjectType::Table
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.owner, self.name, self.object_type)
    }
}

// ============================================================================
// Access tiers
// ============================================================================

/// Dictionary visibility actually granted to the connecting principal.
///
/// Ordered from least to most visibility, so `min` yields the most degraded
/// of two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessTier {
    /// No dictionary access; configured allow-list only.
    None,
    /// Only objects owned by the principal are visible.
    Own,
    /// Broad dictionary visibility.
    Full,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Own => "OWN",
            Self::None => "NONE",
        }
    }

    pub fn is_degraded(&self) -> bool {
        *self != Self::Full
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Canonical entities
// ============================================================================

/// Whether an object's column detail has been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// Known by name only.
    Stub,
    /// Columns loaded.
    Complete,
}

/// A column of a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, e.g. `VARCHAR2(100)` or `NUMBER(10,2)`.
    pub data_type: String,
    pub nullable: bool,
    /// 1-based position.
    pub ordinal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Origin of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ForeignKey,
    Inferred,
}

/// Directed edge `source(columns) -> target(columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_name: Option<String>,
    pub source: ObjectIdentity,
    pub source_columns: Vec<String>,
    pub target: ObjectIdentity,
    pub target_columns: Vec<String>,
    pub kind: RelationshipKind,
}

/// Uniqueness key for relationship edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipKey {
    /// Owner-qualified constraint name.
    Constraint(String, String),
    /// `(source, source columns, target, target columns)` when unnamed.
    Edge(ObjectIdentity, Vec<String>, ObjectIdentity, Vec<String>),
}

impl RelationshipInfo {
    pub fn key(&self) -> RelationshipKey {
        match &self.constraint_name {
            Some(name) => RelationshipKey::Constraint(self.source.owner.clone(), name.clone()),
            None => RelationshipKey::Edge(
                self.source.clone(),
                self.source_columns.clone(),
                self.target.clone(),
                self.target_columns.clone(),
            ),
        }
    }

    /// Whether this edge touches `identity` at either end.
    pub fn touches(&self, identity: &ObjectIdentity) -> bool {
        &self.source == identity || &self.target == identity
    }
}

/// Kind of table constraint kept on the object itself. Foreign keys are
/// [`RelationshipInfo`] edges instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
}

impl ConstraintKind {
    /// Parse a `CONSTRAINT_TYPE` code (`P`, `U`, `C`).
    pub fn from_dictionary(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "P" => Some(Self::PrimaryKey),
            "U" => Some(Self::Unique),
            "C" => Some(Self::Check),
            _ => None,
        }
    }
}

/// Primary key, unique or check constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub name: String,
    pub kind: ConstraintKind,
    /// Constrained columns in key order; often empty for check constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Check condition text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub enabled: bool,
}

/// Index on a table or materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
    /// `VALID`, `UNUSABLE` or `N/A` for partitioned indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablespace: Option<String>,
}

/// A table, view or materialized view with whatever detail is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogObject {
    pub identity: ObjectIdentity,
    pub completeness: Completeness,
    pub columns: Vec<ColumnInfo>,
    /// Outgoing edges (this object is the source).
    pub relationships: Vec<RelationshipInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub last_refreshed_at: DateTime<Utc>,
}

impl CatalogObject {
    /// A name-only entry.
    pub fn stub(identity: ObjectIdentity, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            completeness: Completeness::Stub,
            columns: Vec::new(),
            relationships: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            comment: None,
            last_refreshed_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Option<&ConstraintInfo> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }
}

// ============================================================================
// Raw dictionary rows
// ============================================================================

/// One `*_TAB_COLUMNS` row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawColumnRow {
    pub name: String,
    pub data_type: String,
    pub data_length: Option<i64>,
    pub data_precision: Option<i64>,
    pub data_scale: Option<i64>,
    /// `Y`/`N` as reported by the dictionary.
    pub nullable: String,
    pub column_id: Option<i64>,
    pub data_default: Option<String>,
}

/// One `*_CONS_COLUMNS` pairing of a foreign-key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRelationshipRow {
    pub constraint_name: String,
    pub owner: String,
    pub table_name: String,
    pub column_name: String,
    pub position: i64,
    pub r_owner: String,
    pub r_table_name: String,
    pub r_column_name: String,
}

/// One `*_CONSTRAINTS` row joined with its `*_CONS_COLUMNS` column, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawConstraintRow {
    pub constraint_name: String,
    /// `P`, `U` or `C`.
    pub constraint_type: String,
    pub column_name: Option<String>,
    pub position: Option<i64>,
    pub search_condition: Option<String>,
    /// `ENABLED`/`DISABLED`.
    pub status: Option<String>,
}

/// One `*_INDEXES` row joined with one `*_IND_COLUMNS` column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawIndexRow {
    pub index_name: String,
    /// `UNIQUE`/`NONUNIQUE`.
    pub uniqueness: String,
    pub column_name: String,
    pub position: i64,
    pub status: Option<String>,
    pub tablespace: Option<String>,
}

/// Detail rows loaded for one object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetailRows {
    /// Type as confirmed by the dictionary.
    pub object_type: Option<ObjectType>,
    pub columns: Vec<RawColumnRow>,
    pub table_comment: Option<String>,
    /// `(column, comment)` pairs.
    pub column_comments: Vec<(String, String)>,
    pub constraints: Vec<RawConstraintRow>,
    pub indexes: Vec<RawIndexRow>,
    /// Lowest tier any of the detail queries had to fall back to.
    pub tier: Option<AccessTier>,
}

/// Result of a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub objects: Vec<ObjectIdentity>,
    pub tier: AccessTier,
    /// Owner the pass was scoped to.
    pub owner: String,
}

/// Relationships found for a set of tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipScan {
    pub relationships: Vec<RelationshipInfo>,
    pub tier: AccessTier,
}

/// Product and version banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub vendor: String,
    pub version: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_info: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_from_dictionary() {
        assert_eq!(ObjectType::from_dictionary("TABLE"), Some(ObjectType::Table));
        assert_eq!(ObjectType::from_dictionary(" view "), Some(ObjectType::View));
        assert_eq!(
            ObjectType::from_dictionary("MATERIALIZED VIEW"),
            Some(ObjectType::MaterializedView)
        );
        assert_eq!(
            ObjectType::from_dictionary("MATERIALIZED_VIEW"),
            Some(ObjectType::MaterializedView)
        );
        assert_eq!(ObjectType::from_dictionary("PACKAGE"), None);
    }

    #[test]
    fn test_tier_ordering_degrades_with_min() {
        assert!(AccessTier::Full > AccessTier::Own);
        assert!(AccessTier::Own > AccessTier::None);
        assert_eq!(AccessTier::Full.min(AccessTier::Own), AccessTier::Own);
        assert!(!AccessTier::Full.is_degraded());
        assert!(AccessTier::None.is_degraded());
    }

    #[test]
    fn test_relationship_key_prefers_constraint_name() {
        let edge = RelationshipInfo {
            constraint_name: Some("EMP_DEPT_FK".into()),
            source: ObjectIdentity::table("HR", "EMPLOYEES"),
            source_columns: vec!["DEPARTMENT_ID".into()],
            target: ObjectIdentity::table("HR", "DEPARTMENTS"),
            target_columns: vec!["DEPARTMENT_ID".into()],
            kind: RelationshipKind::ForeignKey,
        };
        assert_eq!(
            edge.key(),
            RelationshipKey::Constraint("HR".into(), "EMP_DEPT_FK".into())
        );

        let unnamed = RelationshipInfo {
            constraint_name: None,
            ..edge.clone()
        };
        assert!(matches!(unnamed.key(), RelationshipKey::Edge(..)));
        assert!(edge.touches(&ObjectIdentity::table("HR", "DEPARTMENTS")));
    }

    #[test]
    fn test_constraint_kind_from_dictionary() {
        assert_eq!(ConstraintKind::from_dictionary("P"), Some(ConstraintKind::PrimaryKey));
        assert_eq!(ConstraintKind::from_dictionary(" u "), Some(ConstraintKind::Unique));
        assert_eq!(ConstraintKind::from_dictionary("C"), Some(ConstraintKind::Check));
        // Foreign keys travel as relationship edges
        assert_eq!(ConstraintKind::from_dictionary("R"), None);
    }

    #[test]
    fn test_objects_without_constraints_still_deserialize() {
        let stub = CatalogObject::stub(ObjectIdentity::table("HR", "JOBS"), Utc::now());
        let json = serde_json::to_value(&stub).unwrap();
        assert!(json.get("constraints").is_none());
        assert!(json.get("indexes").is_none());
        let back: CatalogObject = serde_json::from_value(json).unwrap();
        assert_eq!(back, stub);
    }

    #[test]
    fn test_identity_serializes_type_in_dictionary_spelling() {
        let id = ObjectIdentity::new("HR", "EMP_MV", ObjectType::MaterializedView);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("MATERIALIZED_VIEW"));
        assert_eq!(id.qualified_name(), "HR.EMP_MV");
    }
}
