//! Self-healing MySQL adapter.
//!
//! This library keeps a MySQL connection pool usable behind hosting providers
//! that kill idle sessions: every operation runs against a probed pool, a
//! transient disconnect triggers one rebuild and one retry, and pools can
//! authenticate with short-lived AWS IAM tokens minted fresh on every build.

pub mod adapter;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use adapter::MySqlAdapter;
pub use config::{AdapterOptions, Config};
pub use error::{DbError, DbResult};
