//! Async client for communicating with the database worker process.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{
    methods, CatalogQueryParams, CatalogQueryResponse, ConnectionParams, ErrorInfo,
    OpenSessionParams, OpenSessionResponse, PingResponse, RequestEnvelope, ResponseEnvelope,
    SessionParams,
};

/// Default timeout for requests (60 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 60;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Async client for the database worker.
///
/// The client spawns the worker as a child process and communicates via
/// NDJSON (newline-delimited JSON) over stdin/stdout. Each request has a
/// unique ID for correlation with responses, enabling concurrent requests
/// from every pooled session.
pub struct WorkerClient {
    /// Writer for sending requests to worker stdin.
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,

    /// Map of pending request IDs to response channels.
    pending: PendingMap,

    /// Handle to the worker child process.
    _child: Child,

    /// Handle to the background reader task.
    reader_task: tokio::task::JoinHandle<()>,

    /// Request timeout duration.
    timeout: Duration,
}

impl WorkerClient {
    /// Spawn a new worker process with the default timeout.
    pub async fn spawn<P: AsRef<Path>>(worker_path: P) -> WorkerResult<Self> {
        Self::spawn_with_timeout(worker_path, &[], Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Spawn a worker with command-line arguments and a custom timeout.
    pub async fn spawn_with_timeout<P: AsRef<Path>>(
        worker_path: P,
        args: &[String],
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            WorkerError::SpawnFailed(std::io::Error::other("worker stdin not captured"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            WorkerError::SpawnFailed(std::io::Error::other("worker stdout not captured"))
        })?;

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_task = Self::spawn_reader_task(stdout, pending.clone());
        tracing::info!(path = %worker_path.as_ref().display(), "database worker started");

        Ok(Self {
            stdin,
            pending,
            _child: child,
            reader_task,
            timeout,
        })
    }

    /// Spawn the background task that reads responses from the worker.
    fn spawn_reader_task(stdout: ChildStdout, pending: PendingMap) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let mut pending = pending.lock().await;
                            if let Some(tx) = pending.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "worker sent an unparseable response");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "worker stdout read failed");
                        break;
                    }
                }
            }

            tracing::warn!("database worker exited");

            // Fail every waiter instead of leaving it to its timeout
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let _ = tx.send(ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: "WORKER_EXITED".to_string(),
                        message: "Worker process exited unexpectedly".to_string(),
                    }),
                });
            }
        })
    }

    /// Send a request to the worker and wait for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Serialization fails
    /// - Writing to the worker fails
    /// - The request times out
    /// - The worker returns an error response
    /// - Deserialization of the response fails
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = uuid::Uuid::new_v4().to_string();

        let request = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params).map_err(WorkerError::SerializeFailed)?,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        {
            let mut stdin = self.stdin.lock().await;
            let line =
                serde_json::to_string(&request).map_err(WorkerError::SerializeFailed)? + "\n";
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().await.remove(&id);
                return Err(WorkerError::WriteFailed(e));
            }
            stdin.flush().await.map_err(WorkerError::WriteFailed)?;
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(WorkerError::ChannelClosed),
            Err(_) => {
                // Drop the waiter so a late response is discarded
                self.pending.lock().await.remove(&id);
                return Err(WorkerError::Timeout(self.timeout.as_secs()));
            }
        };

        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result).map_err(WorkerError::DeserializeFailed)
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(Self::classify_error(&error.code, &error.message))
        }
    }

    /// Classify a worker error into a more specific error type.
    fn classify_error(code: &str, message: &str) -> WorkerError {
        match code {
            "CONNECTION_FAILED" => WorkerError::ConnectionFailed(message.to_string()),
            "SESSION_NOT_FOUND" => WorkerError::SessionNotFound(message.to_string()),
            "INVALID_REQUEST" => WorkerError::InvalidRequest(message.to_string()),
            "WORKER_EXITED" => WorkerError::WorkerExited,
            _ => WorkerError::remote(code, message),
        }
    }

    /// Check if the worker is still running.
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// Session operations used by the connection pool
impl WorkerClient {
    /// Open a new database session.
    pub async fn open_session(
        &self,
        driver: &str,
        connection_string: &str,
    ) -> WorkerResult<OpenSessionResponse> {
        self.request(
            methods::SESSION_OPEN,
            OpenSessionParams {
                connection: ConnectionParams {
                    driver: driver.to_string(),
                    connection_string: connection_string.to_string(),
                },
            },
        )
        .await
    }

    /// Round-trip a trivial statement on a session.
    pub async fn ping_session(&self, session_id: &str) -> WorkerResult<bool> {
        let resp: PingResponse = self
            .request(
                methods::SESSION_PING,
                SessionParams {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(resp.ok)
    }

    /// Close a session. Errors are returned but callers usually ignore them.
    pub async fn close_session(&self, session_id: &str) -> WorkerResult<()> {
        let _: serde_json::Value = self
            .request(
                methods::SESSION_CLOSE,
                SessionParams {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Run a read-only dictionary statement on a session.
    pub async fn catalog_query(
        &self,
        session_id: &str,
        sql: &str,
        binds: BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> WorkerResult<CatalogQueryResponse> {
        self.request(
            methods::CATALOG_QUERY,
            CatalogQueryParams {
                session_id: session_id.to_string(),
                sql: sql.to_string(),
                binds,
                timeout_ms: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_serialization() {
        let request = RequestEnvelope {
            id: "test-123".to_string(),
            method: methods::CATALOG_QUERY.to_string(),
            params: serde_json::json!({
                "session_id": "s-1",
                "sql": "SELECT object_name FROM user_objects"
            }),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("test-123"));
        assert!(json.contains("catalog.query"));
        assert!(json.contains("user_objects"));
    }

    #[test]
    fn test_response_envelope_deserialization() {
        let json = r#"{
            "id": "test-123",
            "success": true,
            "result": {"session_id": "s-9", "username": "HR"}
        }"#;

        let response: ResponseEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, "test-123");
        assert!(response.success);
        let session: OpenSessionResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(session.username, "HR");
    }

    #[test]
    fn test_error_response_deserialization() {
        let json = r#"{
            "id": "test-456",
            "success": false,
            "error": {"code": "ORA-01031", "message": "insufficient privileges"}
        }"#;

        let response: ResponseEnvelope = serde_json::from_str(json).unwrap();
        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.code, "ORA-01031");
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            WorkerClient::classify_error("CONNECTION_FAILED", "test"),
            WorkerError::ConnectionFailed(_)
        ));
        assert!(matches!(
            WorkerClient::classify_error("SESSION_NOT_FOUND", "test"),
            WorkerError::SessionNotFound(_)
        ));
        assert!(matches!(
            WorkerClient::classify_error("INVALID_REQUEST", "test"),
            WorkerError::InvalidRequest(_)
        ));
        assert!(matches!(
            WorkerClient::classify_error("WORKER_EXITED", "test"),
            WorkerError::WorkerExited
        ));
        assert!(matches!(
            WorkerClient::classify_error("ORA-01031", "test"),
            WorkerError::Remote { .. }
        ));
    }
}
