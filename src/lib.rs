//! Rust client for ksqlDB's HTTP API.
//!
//! The crate is organized by transport surface:
//! - `client`: request/response calls for server info, statements, inserts
//!   and query termination.
//! - `query`: streaming push/pull queries over a long-lived connection.
//! - `models`: metadata records decoded from control endpoints.

/// Request/response client, options and error type.
pub mod client;
/// Stream, table, topic, query and server metadata records.
pub mod models;
/// Streaming query decoding and consumption modes.
pub mod query;

pub use client::{KsqlClient, KsqlClientOptions, KsqlError};
pub use models::{QueryInfo, ServerInfo, StreamInfo, TableInfo, TopicInfo};
pub use query::{QueryCallbacks, QueryEvent, QueryRequest, QuerySubscription, QueryTable};
