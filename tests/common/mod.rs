//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbcontext::catalog::queries;
use dbcontext::metadata::{
    AccessTier, CatalogSource, DetailRows, Discovery, ObjectIdentity, ObjectType, RawColumnRow,
    RelationshipInfo, RelationshipKind, RelationshipScan,
};
use dbcontext::pool::{CatalogConnection, Connector, Row};
use dbcontext::{Error, Result};

// ---------------------------------------------------------------------------
// Scripted dictionary behind the pool
// ---------------------------------------------------------------------------

/// A foreign key `owner.table(column) -> r_owner.r_table(r_column)`.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub name: &'static str,
    pub owner: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub r_owner: &'static str,
    pub r_table: &'static str,
    pub r_column: &'static str,
}

/// A primary or unique key, backed by a unique index of the same name.
#[derive(Debug, Clone)]
pub struct Key {
    pub name: &'static str,
    pub owner: &'static str,
    pub table: &'static str,
    /// `P` or `U`.
    pub kind: &'static str,
    pub columns: &'static [&'static str],
}

/// Dictionary contents plus the statements the principal may not run.
#[derive(Default)]
pub struct Script {
    pub username: String,
    pub objects: Vec<(String, String, ObjectType)>,
    pub columns: HashMap<(String, String), Vec<(String, String)>>,
    pub foreign_keys: Vec<ForeignKey>,
    pub keys: Vec<Key>,
    pub denied: Mutex<HashSet<&'static str>>,
    pub executed: Mutex<Vec<String>>,
}

impl Script {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }

    pub fn object(mut self, owner: &str, name: &str, ty: ObjectType, columns: &[(&str, &str)]) -> Self {
        self.objects.push((owner.to_string(), name.to_string(), ty));
        self.columns.insert(
            (owner.to_string(), name.to_string()),
            columns
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
        );
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn key(mut self, key: Key) -> Self {
        self.keys.push(key);
        self
    }

    /// Refuse every statement in `statements` with ORA-01031.
    pub fn deny(&self, statements: &[&'static str]) {
        self.denied.lock().unwrap().extend(statements.iter().copied());
    }

    pub fn executed(&self, sql: &str) -> usize {
        self.executed.lock().unwrap().iter().filter(|s| *s == sql).count()
    }

    fn answer(&self, sql: &str, binds: &[(&str, &str)]) -> Result<Vec<Row>> {
        self.executed.lock().unwrap().push(sql.to_string());
        if self.denied.lock().unwrap().contains(sql) {
            return Err(Error::from_code("ORA-01031", "insufficient privileges"));
        }

        let bind = |key: &str| {
            binds
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        };
        let user = self.username.clone();
        let owner = bind("owner").unwrap_or_else(|| user.clone());
        let name = bind("name").unwrap_or_default();

        let rows = match sql {
            s if s == queries::DISCOVER_ALL || s == queries::DISCOVER_USER => {
                let owner = if s == queries::DISCOVER_USER { &user } else { &owner };
                self.objects
                    .iter()
                    .filter(|(o, _, _)| o == owner)
                    .map(|(o, n, t)| Row::from_strs([o.as_str(), n.as_str(), t.as_str()]))
                    .collect()
            }
            s if s == queries::OBJECT_TYPE_ALL || s == queries::OBJECT_TYPE_USER => {
                let owner = if s == queries::OBJECT_TYPE_USER { &user } else { &owner };
                self.objects
                    .iter()
                    .filter(|(o, n, _)| o == owner && *n == name)
                    .map(|(_, _, t)| Row::from_strs([t.as_str()]))
                    .collect()
            }
            s if s == queries::COLUMNS_ALL || s == queries::COLUMNS_USER => {
                let owner = if s == queries::COLUMNS_USER { &user } else { &owner };
                self.columns
                    .get(&(owner.clone(), name.clone()))
                    .map(|cols| {
                        cols.iter()
                            .enumerate()
                            .map(|(i, (col, ty))| {
                                Row::new(vec![
                                    col.as_str().into(),
                                    ty.as_str().into(),
                                    serde_json::json!(100),
                                    serde_json::Value::Null,
                                    serde_json::Value::Null,
                                    "Y".into(),
                                    serde_json::json!(i + 1),
                                    serde_json::Value::Null,
                                ])
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
            s if s == queries::CONSTRAINTS_ALL || s == queries::CONSTRAINTS_USER => {
                let owner = if s == queries::CONSTRAINTS_USER { &user } else { &owner };
                self.key_rows(owner, &name, |key, column, position| {
                    Row::new(vec![
                        key.name.into(),
                        key.kind.into(),
                        column.into(),
                        serde_json::json!(position),
                        serde_json::Value::Null,
                        "ENABLED".into(),
                    ])
                })
            }
            s if s == queries::INDEXES_ALL || s == queries::INDEXES_USER => {
                let owner = if s == queries::INDEXES_USER { &user } else { &owner };
                self.key_rows(owner, &name, |key, column, position| {
                    Row::new(vec![
                        key.name.into(),
                        "UNIQUE".into(),
                        column.into(),
                        serde_json::json!(position),
                        "VALID".into(),
                        "USERS".into(),
                    ])
                })
            }
            s if s == queries::OUTGOING_FKS_ALL || s == queries::OUTGOING_FKS_USER => {
                let owner = if s == queries::OUTGOING_FKS_USER { &user } else { &owner };
                self.fk_rows(|fk| fk.owner == owner.as_str() && fk.table == name)
            }
            s if s == queries::INCOMING_FKS_ALL || s == queries::INCOMING_FKS_USER => {
                let owner = if s == queries::INCOMING_FKS_USER { &user } else { &owner };
                self.fk_rows(|fk| fk.r_owner == owner.as_str() && fk.r_table == name)
            }
            s if s == queries::OWNER_FKS_ALL || s == queries::OWNER_FKS_USER => {
                let owner = if s == queries::OWNER_FKS_USER { &user } else { &owner };
                self.fk_rows(|fk| fk.owner == owner.as_str() || fk.r_owner == owner.as_str())
            }
            s if s == queries::VERSION_ALL || s == queries::VERSION_USER => {
                vec![Row::from_strs(["Oracle Database 19c Enterprise Edition"])]
            }
            _ => Vec::new(),
        };
        Ok(rows)
    }

    fn key_rows(&self, owner: &str, table: &str, row: impl Fn(&Key, &str, usize) -> Row) -> Vec<Row> {
        self.keys
            .iter()
            .filter(|key| key.owner == owner && key.table == table)
            .flat_map(|key| {
                key.columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| row(key, column, i + 1))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn fk_rows(&self, keep: impl Fn(&ForeignKey) -> bool) -> Vec<Row> {
        self.foreign_keys
            .iter()
            .filter(|fk| keep(fk))
            .map(|fk| {
                Row::new(vec![
                    fk.name.into(),
                    fk.owner.into(),
                    fk.table.into(),
                    fk.column.into(),
                    serde_json::json!(1),
                    fk.r_owner.into(),
                    fk.r_table.into(),
                    fk.r_column.into(),
                ])
            })
            .collect()
    }
}

pub struct ScriptedConnection {
    script: Arc<Script>,
}

#[async_trait]
impl CatalogConnection for ScriptedConnection {
    async fn query(
        &self,
        sql: &str,
        binds: &[(&str, &str)],
        _timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        self.script.answer(sql, binds)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn username(&self) -> &str {
        &self.script.username
    }
}

pub struct ScriptedConnector {
    pub script: Arc<Script>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Arc<dyn CatalogConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            script: self.script.clone(),
        }))
    }
}

/// The HR sample schema: two related tables, a view and a table created
/// with a quoted mixed-case name.
pub fn hr_script() -> Script {
    Script::new("HR")
        .object(
            "HR",
            "EMPLOYEES",
            ObjectType::Table,
            &[("EMPLOYEE_ID", "NUMBER"), ("DEPARTMENT_ID", "NUMBER"), ("EMAIL", "VARCHAR2")],
        )
        .object(
            "HR",
            "DEPARTMENTS",
            ObjectType::Table,
            &[("DEPARTMENT_ID", "NUMBER"), ("DEPARTMENT_NAME", "VARCHAR2")],
        )
        .object(
            "HR",
            "VW_EMP_HIERARCHY",
            ObjectType::View,
            &[("EMPLOYEE_ID", "NUMBER"), ("MANAGER_ID", "NUMBER")],
        )
        .object(
            "HR",
            "MixedCase",
            ObjectType::Table,
            &[("Id", "NUMBER"), ("Label", "VARCHAR2")],
        )
        .key(Key {
            name: "EMP_EMP_ID_PK",
            owner: "HR",
            table: "EMPLOYEES",
            kind: "P",
            columns: &["EMPLOYEE_ID"],
        })
        .key(Key {
            name: "EMP_EMAIL_UK",
            owner: "HR",
            table: "EMPLOYEES",
            kind: "U",
            columns: &["EMAIL"],
        })
        .key(Key {
            name: "DEPT_ID_PK",
            owner: "HR",
            table: "DEPARTMENTS",
            kind: "P",
            columns: &["DEPARTMENT_ID"],
        })
        .key(Key {
            name: "MixedCase_pk",
            owner: "HR",
            table: "MixedCase",
            kind: "P",
            columns: &["Id"],
        })
        .foreign_key(ForeignKey {
            name: "EMP_DEPT_FK",
            owner: "HR",
            table: "EMPLOYEES",
            column: "DEPARTMENT_ID",
            r_owner: "HR",
            r_table: "DEPARTMENTS",
            r_column: "DEPARTMENT_ID",
        })
}

// ---------------------------------------------------------------------------
// Counting catalog source for coordinator tests
// ---------------------------------------------------------------------------

/// In-memory `CatalogSource` that counts calls and can fail detail loads.
pub struct CountingSource {
    pub tier: AccessTier,
    pub objects: Vec<ObjectIdentity>,
    pub columns: BTreeMap<ObjectIdentity, Vec<&'static str>>,
    pub relationships: Vec<RelationshipInfo>,
    pub failing: Mutex<BTreeSet<ObjectIdentity>>,
    pub load_delay: Option<Duration>,
    pub discover_calls: AtomicUsize,
    pub detail_calls: Mutex<HashMap<ObjectIdentity, usize>>,
    pub relationship_calls: Mutex<Vec<Vec<ObjectIdentity>>>,
}

impl CountingSource {
    pub fn new(tier: AccessTier) -> Self {
        Self {
            tier,
            objects: Vec::new(),
            columns: BTreeMap::new(),
            relationships: Vec::new(),
            failing: Mutex::new(BTreeSet::new()),
            load_delay: None,
            discover_calls: AtomicUsize::new(0),
            detail_calls: Mutex::new(HashMap::new()),
            relationship_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, identity: ObjectIdentity, columns: &[&'static str]) -> Self {
        self.objects.push(identity.clone());
        self.columns.insert(identity, columns.to_vec());
        self
    }

    pub fn with_edge(mut self, edge: RelationshipInfo) -> Self {
        self.relationships.push(edge);
        self
    }

    pub fn fail(&self, identity: &ObjectIdentity) {
        self.failing.lock().unwrap().insert(identity.clone());
    }

    pub fn detail_calls(&self, identity: &ObjectIdentity) -> usize {
        self.detail_calls.lock().unwrap().get(identity).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CatalogSource for CountingSource {
    async fn discover_objects(&self, _owner: Option<&str>) -> Result<Discovery> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Discovery {
            objects: self.objects.clone(),
            tier: self.tier,
            owner: "HR".to_string(),
        })
    }

    async fn load_details(&self, identity: &ObjectIdentity) -> Result<Option<DetailRows>> {
        *self
            .detail_calls
            .lock()
            .unwrap()
            .entry(identity.clone())
            .or_default() += 1;
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(identity) {
            return Err(Error::TransientConnectivity {
                attempts: 3,
                message: "ORA-03113: end-of-file on communication channel".to_string(),
            });
        }
        let Some(columns) = self.columns.get(identity) else {
            return Ok(None);
        };
        Ok(Some(DetailRows {
            object_type: Some(identity.object_type),
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, name)| RawColumnRow {
                    name: name.to_string(),
                    data_type: "NUMBER".to_string(),
                    nullable: "N".to_string(),
                    column_id: Some(i as i64 + 1),
                    ..Default::default()
                })
                .collect(),
            tier: Some(self.tier),
            ..Default::default()
        }))
    }

    async fn find_relationships(&self, tables: &[ObjectIdentity]) -> Result<RelationshipScan> {
        self.relationship_calls.lock().unwrap().push(tables.to_vec());
        Ok(RelationshipScan {
            relationships: self
                .relationships
                .iter()
                .filter(|e| tables.iter().any(|t| e.touches(t)))
                .cloned()
                .collect(),
            tier: self.tier,
        })
    }
}

pub fn foreign_key(name: &str, from: &ObjectIdentity, to: &ObjectIdentity, column: &str) -> RelationshipInfo {
    RelationshipInfo {
        constraint_name: Some(name.to_string()),
        source: from.clone(),
        source_columns: vec![column.to_string()],
        target: to.clone(),
        target_columns: vec![column.to_string()],
        kind: RelationshipKind::ForeignKey,
    }
}
