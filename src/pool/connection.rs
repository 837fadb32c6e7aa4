//! Connection traits and result rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// One result row, positionally indexed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(Vec<serde_json::Value>);

impl Row {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        Self(values)
    }

    /// Convenience constructor for text-only rows.
    pub fn from_strs<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            values
                .into_iter()
                .map(|v| serde_json::Value::String(v.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column as text. `NULL` (and missing columns) read as `None`.
    pub fn text(&self, idx: usize) -> Option<String> {
        match self.0.get(idx)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Column as text, empty when `NULL`.
    pub fn text_or_empty(&self, idx: usize) -> String {
        self.text(idx).unwrap_or_default()
    }

    /// Column as an integer; numeric strings are accepted.
    pub fn int(&self, idx: usize) -> Option<i64> {
        match self.0.get(idx)? {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A live session able to run dictionary statements.
#[async_trait]
pub trait CatalogConnection: Send + Sync {
    /// Run a read-only statement with named binds.
    async fn query(
        &self,
        sql: &str,
        binds: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;

    /// Principal this session authenticated as.
    fn username(&self) -> &str;

    /// Release server-side resources. Best effort.
    async fn close(&self) {}
}

/// Opens new sessions for the pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn CatalogConnection>>;
}
