//! Data models for the database adapter.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    AdapterState, ConnectionConfig, EngineInfo, ResolvedConnection, SslMode, TlsPolicy,
};
pub use query::{QueryParam, Row, WriteResult};
