//! Database layer.
//!
//! This module provides database access functionality:
//! - The driver seam and its sqlx MySQL implementation
//! - Pool lifecycle, health probing and single-flight reconnection
//! - Query execution with one retry on transient disconnects
//! - Type mappings and introspection query templates

pub mod driver;
pub mod executor;
pub mod health;
pub mod keepalive;
pub mod manager;
pub mod params;
pub mod pool;
pub mod schema;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

pub use driver::{DriverPool, PoolConnector};
pub use executor::QueryExecutor;
pub use manager::{PoolLease, PoolManager, PoolStats};
pub use pool::{MySqlConnector, MySqlDriverPool};
