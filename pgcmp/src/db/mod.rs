//! Database module for pgcmp
//!
//! This module handles database connections and trial script application.

pub mod connection;
pub mod sandbox;

// Re-export key types
pub use connection::{redact_url, DatabaseConnection};
pub use sandbox::{SandboxOutcome, TransactionSandbox};
