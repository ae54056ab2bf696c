//! Database Layer
//!
//! Connection pooling and configuration for PostgreSQL.

pub mod connection;

pub use connection::{DatabaseConfig, DatabasePool};
