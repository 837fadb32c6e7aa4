//! Pool adapters over worker sessions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::client::WorkerClient;
use super::error::WorkerError;
use crate::pool::{CatalogConnection, Connector, Row};
use crate::{Error, Result};

/// Opens worker sessions against one database.
pub struct WorkerConnector {
    client: Arc<WorkerClient>,
    driver: String,
    connection_string: String,
}

impl WorkerConnector {
    pub fn new(
        client: Arc<WorkerClient>,
        driver: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            client,
            driver: driver.into(),
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl Connector for WorkerConnector {
    async fn connect(&self) -> Result<Arc<dyn CatalogConnection>> {
        let opened = self
            .client
            .open_session(&self.driver, &self.connection_string)
            .await?;
        tracing::debug!(session = %opened.session_id, user = %opened.username, "session opened");
        Ok(Arc::new(WorkerSession {
            client: self.client.clone(),
            session_id: opened.session_id,
            username: opened.username,
        }))
    }
}

/// One worker-side database session.
pub struct WorkerSession {
    client: Arc<WorkerClient>,
    session_id: String,
    username: String,
}

impl WorkerSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl CatalogConnection for WorkerSession {
    async fn query(
        &self,
        sql: &str,
        binds: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        let binds: BTreeMap<String, String> = binds
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let response = self
            .client
            .catalog_query(&self.session_id, sql, binds, timeout)
            .await
            .map_err(|err| query_error(err, timeout))?;
        Ok(response.rows.into_iter().map(Row::new).collect())
    }

    async fn ping(&self) -> Result<()> {
        if self.client.ping_session(&self.session_id).await? {
            Ok(())
        } else {
            Err(Error::TransientConnectivity {
                attempts: 1,
                message: format!("session {} failed its health check", self.session_id),
            })
        }
    }

    fn username(&self) -> &str {
        &self.username
    }

    async fn close(&self) {
        if let Err(err) = self.client.close_session(&self.session_id).await {
            tracing::debug!(session = %self.session_id, error = %err, "session close failed");
        }
    }
}

/// A request that timed out while a statement ran is a statement timeout,
/// not a connectivity failure; it must not be re-run.
fn query_error(err: WorkerError, timeout: Option<Duration>) -> Error {
    match err {
        WorkerError::Timeout(secs) => {
            Error::StatementTimeout(timeout.unwrap_or(Duration::from_secs(secs)))
        }
        other => other.into(),
    }
}
