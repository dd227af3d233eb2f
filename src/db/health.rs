//! Liveness probe.

use crate::db::driver::DriverPool;
use crate::error::{DbError, DbResult};
use std::time::Duration;
use tokio::time::timeout;

/// Statement used to check that a pool can still reach the server.
pub const PROBE_SQL: &str = "SELECT 1";

/// Run the liveness probe against `pool`, bounded by `limit`.
///
/// Never mutates adapter state; the caller decides what a failure means.
pub async fn probe(pool: &dyn DriverPool, limit: Duration) -> DbResult<()> {
    match timeout(limit, pool.ping()).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(
            "liveness probe",
            limit.as_millis() as u64,
        )),
    }
}
