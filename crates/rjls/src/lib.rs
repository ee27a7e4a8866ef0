//! Reject-list relay server.
//!
//! Holds the canonical set of rejected hosts, pushes every change to all
//! connected clients as line frames, and appends the permit/reject
//! decisions clients report to a local audit log.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Operator commands read from stdin.
pub mod admin;
/// Startup loading of the reject list file.
pub mod bootstrap;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for relay server operations.
pub mod error;
/// Append-only decision log.
pub mod logger;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Connection registry and non-blocking broadcast.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// The canonical reject list.
pub mod store;

pub use server::{bind, run, run_with_shutdown, ServerState};
