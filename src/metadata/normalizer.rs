//! Pure conversion of raw dictionary rows into the canonical model.
//!
//! Nothing here touches the network or the clock (callers pass `now`), so
//! identical inputs always give identical outputs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use super::types::*;

/// Canonicalize a caller-supplied identifier the way the dictionary stores it.
///
/// Unquoted identifiers are case-insensitive and stored upper-case. Anything
/// that could only have been created quoted (mixed punctuation, spaces) is
/// kept verbatim, minus surrounding quotes. Never apply this to names the
/// dictionary returned; see [`dictionary_name`].
pub fn canonical_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        return inner.to_string();
    }
    let plain = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));
    if plain {
        trimmed.to_ascii_uppercase()
    } else {
        trimmed.to_string()
    }
}

/// A name as reported by the dictionary: already in stored form, so only
/// surrounding whitespace goes. `"MixedCase"` stays mixed case because that
/// is the exact value the `= :name` binds must match.
pub fn dictionary_name(raw: &str) -> String {
    raw.trim().to_string()
}

/// Build identities from `(owner, name, object_type)` discovery rows.
///
/// Rows with an unrecognised type are dropped. A materialized view also shows
/// up as its container table; the materialized view entry wins. Output is
/// sorted by identity.
pub fn normalize_discovery<I, S>(rows: I) -> Vec<ObjectIdentity>
where
    I: IntoIterator<Item = (S, S, S)>,
    S: AsRef<str>,
{
    let mut seen: BTreeSet<ObjectIdentity> = BTreeSet::new();
    for (owner, name, object_type) in rows {
        let Some(object_type) = ObjectType::from_dictionary(object_type.as_ref()) else {
            continue;
        };
        seen.insert(ObjectIdentity::new(
            dictionary_name(owner.as_ref()),
            dictionary_name(name.as_ref()),
            object_type,
        ));
    }

    let mviews: HashSet<(String, String)> = seen
        .iter()
        .filter(|id| id.object_type == ObjectType::MaterializedView)
        .map(|id| (id.owner.clone(), id.name.clone()))
        .collect();

    seen.into_iter()
        .filter(|id| {
            !(id.object_type == ObjectType::Table
                && mviews.contains(&(id.owner.clone(), id.name.clone())))
        })
        .collect()
}

/// Render the declared type with length/precision/scale.
pub fn render_type(row: &RawColumnRow) -> String {
    let base = row.data_type.trim().to_ascii_uppercase();
    match base.as_str() {
        "NUMBER" => match (row.data_precision, row.data_scale) {
            (Some(p), Some(s)) if s != 0 => format!("NUMBER({p},{s})"),
            (Some(p), _) => format!("NUMBER({p})"),
            (None, Some(0)) => "NUMBER(*,0)".to_string(),
            _ => "NUMBER".to_string(),
        },
        "FLOAT" => match row.data_precision {
            Some(p) => format!("FLOAT({p})"),
            None => base,
        },
        "VARCHAR2" | "NVARCHAR2" | "VARCHAR" | "CHAR" | "NCHAR" | "RAW" => match row.data_length {
            Some(len) if len > 0 => format!("{base}({len})"),
            _ => base,
        },
        _ => base,
    }
}

/// Interpret a dictionary nullability flag. Unknown spellings count as nullable.
pub fn parse_nullable(flag: &str) -> bool {
    !matches!(
        flag.trim().to_ascii_uppercase().as_str(),
        "N" | "NO" | "FALSE" | "0"
    )
}

fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn clean_default(text: Option<&str>) -> Option<String> {
    clean_text(text).filter(|t| !t.eq_ignore_ascii_case("NULL"))
}

/// Merge a discovered identity with its detail rows.
///
/// The identity is kept as given; it is the key detail rows were read
/// under. Without detail rows, or with zero columns, the object stays a
/// stub: an empty column list is a load failure, not a valid complete state.
pub fn merge(
    identity: &ObjectIdentity,
    detail: Option<DetailRows>,
    now: DateTime<Utc>,
) -> CatalogObject {
    let identity = identity.clone();
    let Some(detail) = detail else {
        return CatalogObject::stub(identity, now);
    };

    let comments: BTreeMap<String, String> = detail
        .column_comments
        .iter()
        .filter_map(|(col, comment)| {
            clean_text(Some(comment)).map(|c| (dictionary_name(col), c))
        })
        .collect();

    let mut rows: Vec<(usize, RawColumnRow)> = detail.columns.into_iter().enumerate().collect();
    rows.sort_by_key(|(idx, row)| (row.column_id.unwrap_or(i64::MAX), *idx));

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(rows.len());
    for (idx, row) in rows {
        let name = dictionary_name(&row.name);
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        let ordinal = row
            .column_id
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or_else(|| u32::try_from(idx + 1).unwrap_or(u32::MAX));
        columns.push(ColumnInfo {
            data_type: render_type(&row),
            nullable: parse_nullable(&row.nullable),
            ordinal,
            default: clean_default(row.data_default.as_deref()),
            comment: comments.get(&name).cloned(),
            name,
        });
    }

    let completeness = if columns.is_empty() {
        Completeness::Stub
    } else {
        Completeness::Complete
    };

    CatalogObject {
        identity,
        completeness,
        columns,
        relationships: Vec::new(),
        constraints: normalize_constraints(&detail.constraints),
        indexes: normalize_indexes(&detail.indexes),
        comment: clean_text(detail.table_comment.as_deref()),
        last_refreshed_at: now,
    }
}

/// Group constraint-column rows into primary key, unique and check
/// constraints, in that order and by name within a kind.
///
/// System-generated `"COL" IS NOT NULL` checks are dropped; column
/// nullability already carries them.
pub fn normalize_constraints(rows: &[RawConstraintRow]) -> Vec<ConstraintInfo> {
    let mut grouped: BTreeMap<String, Vec<&RawConstraintRow>> = BTreeMap::new();
    for row in rows {
        let name = dictionary_name(&row.constraint_name);
        if !name.is_empty() {
            grouped.entry(name).or_default().push(row);
        }
    }

    let mut constraints = Vec::with_capacity(grouped.len());
    for (name, mut members) in grouped {
        members.sort_by_key(|r| r.position.unwrap_or(i64::MAX));
        let Some(first) = members.first() else {
            continue;
        };
        let Some(kind) = ConstraintKind::from_dictionary(&first.constraint_type) else {
            continue;
        };
        let condition = clean_text(first.search_condition.as_deref());
        if kind == ConstraintKind::Check && condition.as_deref().is_some_and(is_not_null_check) {
            continue;
        }

        let mut columns: Vec<String> = Vec::new();
        for member in &members {
            let Some(column) = member.column_name.as_deref().map(dictionary_name) else {
                continue;
            };
            if !column.is_empty() && !columns.contains(&column) {
                columns.push(column);
            }
        }

        constraints.push(ConstraintInfo {
            name,
            kind,
            columns,
            condition,
            enabled: !first
                .status
                .as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("DISABLED")),
        });
    }
    constraints.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
    constraints
}

fn is_not_null_check(condition: &str) -> bool {
    let Some(subject) = condition.trim().strip_suffix("IS NOT NULL") else {
        return false;
    };
    let column = subject.trim().trim_matches('"');
    !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '#'))
}

/// Group index-column rows into indexes sorted by name, columns in key
/// order.
pub fn normalize_indexes(rows: &[RawIndexRow]) -> Vec<IndexInfo> {
    let mut grouped: BTreeMap<String, Vec<&RawIndexRow>> = BTreeMap::new();
    for row in rows {
        let name = dictionary_name(&row.index_name);
        if !name.is_empty() {
            grouped.entry(name).or_default().push(row);
        }
    }

    grouped
        .into_iter()
        .filter_map(|(name, mut members)| {
            members.sort_by_key(|r| r.position);
            let first = *members.first()?;
            let mut columns: Vec<String> = Vec::new();
            for member in &members {
                let column = dictionary_name(&member.column_name);
                if !column.is_empty() && !columns.contains(&column) {
                    columns.push(column);
                }
            }
            Some(IndexInfo {
                name,
                unique: first.uniqueness.trim().eq_ignore_ascii_case("UNIQUE"),
                columns,
                status: clean_text(first.status.as_deref()),
                tablespace: clean_text(first.tablespace.as_deref()),
            })
        })
        .collect()
}

/// Group constraint-column rows into relationship edges.
///
/// Both ends are tables; views never originate constraint-backed edges.
pub fn normalize_relationships(rows: &[RawRelationshipRow]) -> Vec<RelationshipInfo> {
    let mut grouped: BTreeMap<(String, String), Vec<&RawRelationshipRow>> = BTreeMap::new();
    for row in rows {
        grouped
            .entry((dictionary_name(&row.owner), dictionary_name(&row.constraint_name)))
            .or_default()
            .push(row);
    }

    let mut edges = Vec::with_capacity(grouped.len());
    for ((owner, constraint), mut members) in grouped {
        members.sort_by_key(|r| r.position);
        let Some(first) = members.first() else {
            continue;
        };
        let source = ObjectIdentity::table(owner.clone(), dictionary_name(&first.table_name));
        let target = ObjectIdentity::table(
            dictionary_name(&first.r_owner),
            dictionary_name(&first.r_table_name),
        );

        let mut source_columns: Vec<String> = Vec::new();
        let mut target_columns: Vec<String> = Vec::new();
        for member in &members {
            let src = dictionary_name(&member.column_name);
            if source_columns.contains(&src) {
                continue;
            }
            source_columns.push(src);
            target_columns.push(dictionary_name(&member.r_column_name));
        }

        edges.push(RelationshipInfo {
            constraint_name: Some(constraint).filter(|c| !c.is_empty()),
            source,
            source_columns,
            target,
            target_columns,
            kind: RelationshipKind::ForeignKey,
        });
    }
    edges
}

/// Parse configured allow-list entries into identities.
///
/// Accepts `OWNER.NAME`, `NAME` (owned by `default_owner`) and an optional
/// `:TYPE` suffix. Returns the parsed identities and the rejected entries.
pub fn parse_allow_list(
    entries: &[String],
    default_owner: &str,
) -> (Vec<ObjectIdentity>, Vec<String>) {
    let mut parsed = BTreeSet::new();
    let mut rejected = Vec::new();

    for entry in entries {
        let (qualified, object_type) = match entry.rsplit_once(':') {
            Some((name, ty)) => match ObjectType::from_dictionary(ty) {
                Some(ty) => (name, ty),
                None => {
                    rejected.push(entry.clone());
                    continue;
                }
            },
            None => (entry.as_str(), ObjectType::Table),
        };

        let (owner, name) = match qualified.split_once('.') {
            Some((owner, name)) => (canonical_name(owner), canonical_name(name)),
            None => (dictionary_name(default_owner), canonical_name(qualified)),
        };
        if owner.is_empty() || name.is_empty() {
            rejected.push(entry.clone());
            continue;
        }
        parsed.insert(ObjectIdentity::new(owner, name, object_type));
    }

    (parsed.into_iter().collect(), rejected)
}
