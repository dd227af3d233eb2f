//! Driver seam.
//!
//! The manager and executor only talk to a pool through these traits, so the
//! sqlx-backed implementation in [`super::pool`] can be swapped for an
//! in-process driver in tests.

use crate::error::DbResult;
use crate::models::{QueryParam, ResolvedConnection, Row, WriteResult};
use async_trait::async_trait;
use std::sync::Arc;

/// A live connection pool.
#[async_trait]
pub trait DriverPool: Send + Sync {
    /// Run the liveness probe statement on one pooled connection.
    async fn ping(&self) -> DbResult<()>;

    /// Run a statement and collect its rows. Statements without a result set
    /// produce an empty vector.
    async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    /// Run a mutating statement.
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<WriteResult>;

    /// Run a multi-statement script over the text protocol.
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Close the pool, waiting for checked-out connections to be returned.
    async fn close(&self) -> DbResult<()>;

    fn is_closed(&self) -> bool;
}

/// Builds pools from a resolved connection.
#[async_trait]
pub trait PoolConnector: Send + Sync {
    async fn connect(&self, connection: &ResolvedConnection) -> DbResult<Arc<dyn DriverPool>>;
}
