//! Query execution engine.
//!
//! This module routes statements through the [`PoolManager`] with support for:
//! - Parameterized queries
//! - Per-statement timeouts
//! - A bounded request queue
//! - One repair-and-retry on a transient disconnect
//!
//! # Retry policy
//!
//! Every operation first asks the manager for a healthy pool, then runs. If
//! the statement fails with a [`DbError::TransientDisconnect`], the manager is
//! asked once more (which rebuilds the pool if its probe fails) and the
//! statement runs one more time. Any other failure, or a failure of the
//! retry, is surfaced as [`DbError::Query`]. There is never a third attempt.

use crate::db::manager::{PoolLease, PoolManager};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row, WriteResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Query executor that handles statement execution for one adapter.
pub struct QueryExecutor {
    manager: Arc<PoolManager>,
    query_timeout: Duration,
    multiple_statements: bool,
    /// `connectionLimit + queueLimit` permits; `None` when the queue is unbounded.
    admission: Option<Semaphore>,
}

impl QueryExecutor {
    /// Create an executor using the limits of the manager's configuration.
    pub fn new(manager: Arc<PoolManager>) -> Self {
        let config = manager.config();
        let admission = config.pool.queue_limit.map(|queue_limit| {
            let in_flight = config.pool.connection_limit_or_default() as usize;
            Semaphore::new(in_flight.saturating_add(queue_limit))
        });

        Self {
            query_timeout: config.query_timeout,
            multiple_statements: config.multiple_statements,
            admission,
            manager,
        }
    }

    /// Run a read statement and return its rows.
    ///
    /// Statements that do not produce a result set yield an empty vector.
    pub async fn query_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        debug!(sql = %sql, params = ?param_types(params), "Executing query");
        self.run("query", |lease| async move {
            lease.pool().fetch_all(sql, params).await
        })
        .await
    }

    /// Run a mutating statement.
    pub async fn query_write(&self, sql: &str, params: &[QueryParam]) -> DbResult<WriteResult> {
        debug!(sql = %sql, params = ?param_types(params), "Executing write operation");
        self.run("write operation", |lease| async move {
            lease.pool().execute(sql, params).await
        })
        .await
    }

    /// Run a multi-statement script.
    pub async fn exec_batch(&self, sql: &str) -> DbResult<()> {
        if !self.multiple_statements {
            return Err(DbError::invalid_input(
                "multiple statements are disabled for this adapter (multipleStatements=false)",
            ));
        }
        debug!(bytes = sql.len(), "Executing batch");
        self.run("batch", |lease| async move {
            lease.pool().execute_batch(sql).await
        })
        .await
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, statement: F) -> DbResult<T>
    where
        F: Fn(PoolLease) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let _permit = self.admit()?;

        let lease = self.manager.ensure_healthy().await?;
        let generation = lease.generation();

        match self.attempt(operation, &statement, lease).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient_disconnect() => {
                warn!(
                    operation,
                    generation,
                    error = %e,
                    "Connection lost, reconnecting and retrying once"
                );
                let lease = self.manager.ensure_healthy().await?;
                self.attempt(operation, &statement, lease)
                    .await
                    .map_err(|e| e.into_query_error(Some("after reconnect")))
            }
            Err(e) => Err(e.into_query_error(None)),
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        operation: &'static str,
        statement: &F,
        lease: PoolLease,
    ) -> DbResult<T>
    where
        F: Fn(PoolLease) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        match timeout(self.query_timeout, statement(lease)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                operation,
                self.query_timeout.as_millis() as u64,
            )),
        }
    }

    /// Take a slot in the bounded queue, failing fast when it is full.
    fn admit(&self) -> DbResult<Option<SemaphorePermit<'_>>> {
        match &self.admission {
            None => Ok(None),
            Some(semaphore) => semaphore.try_acquire().map(Some).map_err(|_| {
                DbError::query(
                    "request queue is full; raise queueLimit or connectionLimit",
                    None,
                )
            }),
        }
    }
}

fn param_types(params: &[QueryParam]) -> Vec<&'static str> {
    params.iter().map(QueryParam::type_name).collect()
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("query_timeout", &self.query_timeout)
            .field("multiple_statements", &self.multiple_statements)
            .field(
                "available_permits",
                &self.admission.as_ref().map(Semaphore::available_permits),
            )
            .finish_non_exhaustive()
    }
}
