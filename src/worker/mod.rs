//! Worker communication module.
//!
//! The native database driver lives in a separate worker process. This
//! module talks to it over NDJSON on stdin/stdout and adapts its sessions to
//! the connection pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    dbcontext (Rust + Tokio)                     │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │  ConnectionPool ── WorkerConnector / WorkerSession         │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    WorkerClient (Async)                   │  │
//! │  │  - Spawns the worker as a child process                   │  │
//! │  │  - NDJSON protocol over stdin/stdout                      │  │
//! │  │  - Request IDs for concurrent request correlation         │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │               stdin (NDJSON) │ stdout (NDJSON)                  │
//! └──────────────────────────────┼──────────────────────────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │           Worker (driver sessions, dictionary queries)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dbcontext::worker::{WorkerClient, WorkerConnector};
//!
//! let client = Arc::new(WorkerClient::spawn("./dbcontext-worker").await?);
//! let connector = WorkerConnector::new(client, "oracle", "hr/secret@xe");
//! ```

mod client;
mod error;
pub mod protocol;
mod session;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
pub use session::{WorkerConnector, WorkerSession};
