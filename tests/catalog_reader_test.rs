//! Tier fallback of the catalog reader against a scripted dictionary.

mod common;

use std::sync::Arc;

use common::{hr_script, ScriptedConnector};
use dbcontext::catalog::{queries, ReaderConfig, TieredCatalogReader};
use dbcontext::metadata::{AccessTier, CatalogSource, ConstraintKind, ObjectIdentity};
use dbcontext::pool::{ConnectionPool, PoolConfig};

fn reader(script: Arc<common::Script>, config: ReaderConfig) -> TieredCatalogReader {
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(ScriptedConnector::new(script)),
        PoolConfig::default(),
    ));
    TieredCatalogReader::new(pool, config)
}

#[tokio::test]
async fn test_discovery_under_full_tier() {
    let script = Arc::new(hr_script());
    let reader = reader(script, ReaderConfig::default());

    let discovery = reader.discover_objects(None).await.unwrap();
    assert_eq!(discovery.tier, AccessTier::Full);
    assert_eq!(discovery.owner, "HR");
    assert_eq!(discovery.objects.len(), 4);
    assert!(discovery.objects.contains(&ObjectIdentity::view("HR", "VW_EMP_HIERARCHY")));
}

#[tokio::test]
async fn test_refused_full_tier_falls_back_to_own() {
    let script = Arc::new(hr_script());
    script.deny(&[queries::DISCOVER_ALL]);
    let reader = reader(script.clone(), ReaderConfig::default());

    let discovery = reader.discover_objects(None).await.unwrap();
    assert_eq!(discovery.tier, AccessTier::Own);
    assert_eq!(discovery.objects.len(), 4);

    // The settled tier is remembered
    reader.discover_objects(None).await.unwrap();
    assert_eq!(script.executed(queries::DISCOVER_ALL), 1);
    assert_eq!(script.executed(queries::DISCOVER_USER), 2);
    assert_eq!(reader.observed_tier(), Some(AccessTier::Own));

    reader.reprobe();
    reader.discover_objects(None).await.unwrap();
    assert_eq!(script.executed(queries::DISCOVER_ALL), 2);
}

#[tokio::test]
async fn test_other_owner_does_not_demote_own_schema() {
    let script = Arc::new(hr_script());
    script.deny(&[queries::DISCOVER_ALL]);
    let reader = reader(script.clone(), ReaderConfig::default());

    let own = reader.discover_objects(None).await.unwrap();
    assert_eq!(own.tier, AccessTier::Own);
    assert_eq!(own.objects.len(), 4);

    let sales = reader.discover_objects(Some("sales")).await.unwrap();
    assert_eq!(sales.owner, "SALES");
    assert_eq!(sales.tier, AccessTier::None);

    let again = reader.discover_objects(None).await.unwrap();
    assert_eq!(again.tier, AccessTier::Own);
    assert_eq!(again.objects, own.objects);
    assert_eq!(reader.observed_tier(), Some(AccessTier::Own));
    // FULL was refused once per owner, never re-tried for HR
    assert_eq!(script.executed(queries::DISCOVER_ALL), 2);
}

#[tokio::test]
async fn test_quoted_mixed_case_object_round_trips() {
    let script = Arc::new(hr_script());
    let reader = reader(script, ReaderConfig::default());

    let discovery = reader.discover_objects(None).await.unwrap();
    let mixed = ObjectIdentity::table("HR", "MixedCase");
    assert!(discovery.objects.contains(&mixed));

    let detail = reader.load_details(&mixed).await.unwrap().unwrap();
    let names: Vec<_> = detail.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Id", "Label"]);
    assert_eq!(detail.constraints.len(), 1);
    assert_eq!(detail.constraints[0].constraint_name, "MixedCase_pk");
    assert_eq!(detail.tier, Some(AccessTier::Full));
}

#[tokio::test]
async fn test_no_readable_view_uses_allow_list() {
    let script = Arc::new(hr_script());
    script.deny(&[queries::DISCOVER_ALL, queries::DISCOVER_USER]);
    let config = ReaderConfig {
        allow_list: vec!["EMPLOYEES".to_string(), "HR.VW_EMP_HIERARCHY:VIEW".to_string()],
        ..ReaderConfig::default()
    };
    let reader = reader(script, config);

    let discovery = reader.discover_objects(None).await.unwrap();
    assert_eq!(discovery.tier, AccessTier::None);
    assert_eq!(
        discovery.objects,
        vec![
            ObjectIdentity::table("HR", "EMPLOYEES"),
            ObjectIdentity::view("HR", "VW_EMP_HIERARCHY"),
        ]
    );
}

#[tokio::test]
async fn test_other_owner_skips_own_tier() {
    let script = Arc::new(hr_script());
    script.deny(&[queries::DISCOVER_ALL]);
    let config = ReaderConfig {
        target_owner: Some("SALES".to_string()),
        ..ReaderConfig::default()
    };
    let reader = reader(script.clone(), config);

    let discovery = reader.discover_objects(None).await.unwrap();
    assert_eq!(discovery.owner, "SALES");
    assert_eq!(discovery.tier, AccessTier::None);
    assert!(discovery.objects.is_empty());
    assert_eq!(script.executed(queries::DISCOVER_USER), 0);
}

#[tokio::test]
async fn test_details_degrade_per_query() {
    let script = Arc::new(hr_script());
    script.deny(&[queries::COLUMNS_ALL, queries::COLUMN_COMMENTS_ALL, queries::COLUMN_COMMENTS_USER]);
    let reader = reader(script, ReaderConfig::default());

    let detail = reader
        .load_details(&ObjectIdentity::table("HR", "EMPLOYEES"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.columns.len(), 3);
    assert_eq!(detail.tier, Some(AccessTier::None));
    assert!(detail.column_comments.is_empty());
}

#[tokio::test]
async fn test_details_include_keys_and_indexes() {
    let script = Arc::new(hr_script());
    script.deny(&[queries::CONSTRAINTS_ALL]);
    let reader = reader(script.clone(), ReaderConfig::default());

    let employees = ObjectIdentity::table("HR", "EMPLOYEES");
    let detail = reader.load_details(&employees).await.unwrap().unwrap();
    assert_eq!(detail.tier, Some(AccessTier::Own));
    assert_eq!(script.executed(queries::CONSTRAINTS_USER), 1);

    let object = dbcontext::metadata::normalizer::merge(&employees, Some(detail), chrono::Utc::now());
    let kinds: Vec<_> = object.constraints.iter().map(|c| (c.name.as_str(), c.kind)).collect();
    assert_eq!(
        kinds,
        [
            ("EMP_EMP_ID_PK", ConstraintKind::PrimaryKey),
            ("EMP_EMAIL_UK", ConstraintKind::Unique),
        ]
    );
    let indexes: Vec<_> = object.indexes.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(indexes, ["EMP_EMAIL_UK", "EMP_EMP_ID_PK"]);
    assert!(object.indexes.iter().all(|i| i.unique));
}

#[tokio::test]
async fn test_views_skip_constraint_and_index_queries() {
    let script = Arc::new(hr_script());
    let reader = reader(script.clone(), ReaderConfig::default());

    let detail = reader
        .load_details(&ObjectIdentity::view("HR", "VW_EMP_HIERARCHY"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.columns.len(), 2);
    assert!(detail.constraints.is_empty());
    assert!(detail.indexes.is_empty());
    assert_eq!(script.executed(queries::CONSTRAINTS_ALL), 0);
    assert_eq!(script.executed(queries::INDEXES_ALL), 0);
}

#[tokio::test]
async fn test_missing_object_has_no_detail() {
    let script = Arc::new(hr_script());
    let reader = reader(script, ReaderConfig::default());

    let detail = reader
        .load_details(&ObjectIdentity::table("HR", "NOT_THERE"))
        .await
        .unwrap();
    assert!(detail.is_none());
}

#[tokio::test]
async fn test_single_table_relationships_both_directions() {
    let script = Arc::new(hr_script());
    let reader = reader(script.clone(), ReaderConfig::default());

    let departments = ObjectIdentity::table("HR", "DEPARTMENTS");
    let scan = reader.find_relationships(&[departments.clone()]).await.unwrap();
    assert_eq!(scan.tier, AccessTier::Full);
    assert_eq!(scan.relationships.len(), 1);
    assert_eq!(scan.relationships[0].target, departments);
    assert_eq!(script.executed(queries::INCOMING_FKS_ALL), 1);
}

#[tokio::test]
async fn test_relationship_scan_ignores_views() {
    let script = Arc::new(hr_script());
    let reader = reader(script.clone(), ReaderConfig::default());

    let scan = reader
        .find_relationships(&[
            ObjectIdentity::table("HR", "EMPLOYEES"),
            ObjectIdentity::view("HR", "VW_EMP_HIERARCHY"),
        ])
        .await
        .unwrap();
    assert_eq!(scan.relationships.len(), 1);
    assert_eq!(scan.relationships[0].constraint_name.as_deref(), Some("EMP_DEPT_FK"));
}

#[tokio::test]
async fn test_database_info_never_fails() {
    let script = Arc::new(hr_script());
    let reader = reader(script.clone(), ReaderConfig::default());
    let info = reader.database_info().await;
    assert_eq!(info.vendor, "Oracle");
    assert_eq!(info.schema, "HR");

    let script = Arc::new(hr_script());
    script.deny(&[queries::VERSION_ALL, queries::VERSION_USER]);
    let info = self::reader(script, ReaderConfig::default()).database_info().await;
    assert_eq!(info.version, "unknown");
    assert!(info.error.is_some());
}
