//! Protocol types for worker communication.
//!
//! The worker owns the native database driver and exposes sessions over an
//! NDJSON request/response protocol. Each pooled connection on the Rust side
//! corresponds to one worker session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "catalog.query").
    pub method: String,
    /// Method-specific parameters.
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result data (present if success = true).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error information (present if success = false).
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    /// Error code; database errors carry the driver code (e.g. `ORA-01031`).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Sessions
// ============================================================================

/// Database connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Database driver name (e.g., "oracle").
    pub driver: String,
    /// Driver-specific connection string.
    pub connection_string: String,
}

/// Parameters for `session.open`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenSessionParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
}

/// Response from `session.open`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSessionResponse {
    /// Worker-side session handle.
    pub session_id: String,
    /// Principal the session authenticated as.
    pub username: String,
}

/// Parameters for `session.ping` and `session.close`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionParams {
    pub session_id: String,
}

/// Response from `session.ping`.
#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub ok: bool,
}

// ============================================================================
// Catalog queries
// ============================================================================

/// Parameters for `catalog.query`.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogQueryParams {
    pub session_id: String,
    /// Read-only dictionary statement.
    pub sql: String,
    /// Named bind values (`:owner` -> "HR").
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub binds: BTreeMap<String, String>,
    /// Statement timeout enforced by the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Column description in a query result.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultColumn {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
}

/// Response from `catalog.query`.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogQueryResponse {
    /// Result column descriptions.
    #[serde(default)]
    pub columns: Vec<QueryResultColumn>,
    /// Result data rows.
    pub rows: Vec<Vec<serde_json::Value>>,
}

// ============================================================================
// Method Names
// ============================================================================

/// Worker method names.
pub mod methods {
    pub const SESSION_OPEN: &str = "session.open";
    pub const SESSION_PING: &str = "session.ping";
    pub const SESSION_CLOSE: &str = "session.close";
    pub const CATALOG_QUERY: &str = "catalog.query";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_skip_empty_binds() {
        let params = CatalogQueryParams {
            session_id: "s1".to_string(),
            sql: "SELECT 1 FROM dual".to_string(),
            binds: BTreeMap::new(),
            timeout_ms: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("binds").is_none());
        assert!(json.get("timeout_ms").is_none());
    }

    #[test]
    fn test_open_session_params_flatten_connection() {
        let params = OpenSessionParams {
            connection: ConnectionParams {
                driver: "oracle".to_string(),
                connection_string: "hr@xe".to_string(),
            },
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["driver"], "oracle");
        assert_eq!(json["connection_string"], "hr@xe");
    }

    #[test]
    fn test_query_response_deserialization() {
        let json = r#"{
            "columns": [{"name": "OBJECT_NAME", "data_type": "VARCHAR2"}],
            "rows": [["EMPLOYEES"], ["DEPARTMENTS"]]
        }"#;
        let resp: CatalogQueryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.columns.len(), 1);
        assert_eq!(resp.rows.len(), 2);
        assert_eq!(resp.rows[1][0], "DEPARTMENTS");
    }
}
