//! # pgx-testing
//!
//! Test infrastructure for pgx session pool development.
//!
//! This crate provides an in-memory mock server and a matching
//! [`SessionFactory`](pgx_session::SessionFactory), so pool behavior can be
//! tested without a running database.
//!
//! ## Features
//!
//! - Mock server with configurable statement responses
//! - Per-session scratch state standing in for temporary tables
//! - Latency and connect-failure injection
//! - Session open/close/leak counters
//! - Test fixture utilities
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgx_testing::{CounterTable, MockServer};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = CounterTable::default().install(MockServer::builder()).build();
//!     let factory = server.factory();
//!     let params = server.params();
//!     // Build a pool over factory and params...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_server;

pub use fixtures::CounterTable;
pub use mock_server::{
    ConnectFailure, MockFactory, MockResponse, MockServer, MockServerBuilder, MockServerConfig,
    MockServerStats, MockSession, SessionScratch,
};
