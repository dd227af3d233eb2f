//! Pool lifecycle and reconnection.
//!
//! [`PoolManager`] owns the one live pool of an adapter and moves it through
//! `Uninitialized -> Healthy -> (Degraded) -> Closed`.
//!
//! # Concurrency
//!
//! - The pool handle lives in a `tokio::sync::Mutex` slot together with a
//!   generation counter bumped on every successful build.
//! - Probes run outside the lock. A failed probe takes the lock and compares
//!   generations: if another caller already rebuilt, its pool is reused, so
//!   concurrent failures produce exactly one rebuild.
//! - Builds (credential, connect, first probe) run while holding the lock.
//!   Callers that queued behind a failed build get its error back instead of
//!   each running their own attempt.
//! - A replaced pool is closed after the lock is released.
//! - Token-backed pools are rebuilt once their token is within
//!   [`TOKEN_REFRESH_MARGIN`](crate::auth::TOKEN_REFRESH_MARGIN) of expiry.
//! - Callers get a [`PoolLease`] (cloned `Arc` + generation) and never hold
//!   the lock while running SQL.

use crate::auth::CredentialProvider;
use crate::db::driver::{DriverPool, PoolConnector};
use crate::db::health;
use crate::db::keepalive::KeepAlive;
use crate::error::{DbError, DbResult};
use crate::models::{AdapterState, ConnectionConfig};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// A pool checked out for the duration of one operation.
#[derive(Clone)]
pub struct PoolLease {
    pool: Arc<dyn DriverPool>,
    generation: u64,
}

impl PoolLease {
    pub fn pool(&self) -> &dyn DriverPool {
        self.pool.as_ref()
    }

    /// Build number of the pool this lease points at.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Point-in-time counters for one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Number of pools built so far.
    pub generation: u64,
    /// Pools replaced after a failed probe or a token refresh.
    pub rebuilds: u64,
    /// Build attempts that ended in an error.
    pub failed_builds: u64,
    pub probes: u64,
    pub probe_failures: u64,
    pub state: AdapterState,
}

/// Error of the latest build attempt, kept so callers that queued behind it
/// get its result instead of starting another attempt.
#[derive(Debug, Clone)]
struct BuildFailure {
    message: Arc<str>,
    suggestion: Arc<str>,
}

impl BuildFailure {
    fn from_error(err: &DbError) -> Self {
        Self {
            message: err.to_string().into(),
            suggestion: err
                .suggestion()
                .unwrap_or("Check that the server is reachable, then retry")
                .into(),
        }
    }

    fn to_error(&self) -> DbError {
        DbError::connect(
            format!("Reconnect attempt failed: {}", self.message),
            &*self.suggestion,
        )
    }
}

struct Slot {
    pool: Option<Arc<dyn DriverPool>>,
    keep_alive: Option<KeepAlive>,
    generation: u64,
    /// Completed build attempts, successful or not.
    attempt: u64,
    /// Set when the latest attempt failed; cleared by a successful build.
    last_failure: Option<BuildFailure>,
    state: AdapterState,
    /// When the IAM token behind the current pool is due for refresh.
    refresh_at: Option<Instant>,
}

/// Owns pool creation, health checks and single-flight rebuilds.
pub struct PoolManager {
    config: ConnectionConfig,
    credentials: CredentialProvider,
    connector: Arc<dyn PoolConnector>,
    slot: Mutex<Slot>,
    // Lock-free mirrors for state(), stats() and attempt snapshots
    state: AtomicU8,
    attempts: AtomicU64,
    generation: AtomicU64,
    rebuilds: AtomicU64,
    failed_builds: AtomicU64,
    probes: AtomicU64,
    probe_failures: AtomicU64,
}

impl PoolManager {
    pub fn new(
        config: ConnectionConfig,
        credentials: CredentialProvider,
        connector: Arc<dyn PoolConnector>,
    ) -> Self {
        Self {
            config,
            credentials,
            connector,
            slot: Mutex::new(Slot {
                pool: None,
                keep_alive: None,
                generation: 0,
                attempt: 0,
                last_failure: None,
                state: AdapterState::Uninitialized,
                refresh_at: None,
            }),
            state: AtomicU8::new(state_to_u8(AdapterState::Uninitialized)),
            attempts: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            failed_builds: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> AdapterState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            generation: self.generation.load(Ordering::Acquire),
            rebuilds: self.rebuilds.load(Ordering::Acquire),
            failed_builds: self.failed_builds.load(Ordering::Acquire),
            probes: self.probes.load(Ordering::Acquire),
            probe_failures: self.probe_failures.load(Ordering::Acquire),
            state: self.state(),
        }
    }

    /// Build the pool and verify it with one probe.
    ///
    /// A no-op when the manager is already Healthy. On failure the manager
    /// stays Uninitialized and no pool is left behind.
    pub async fn initialize(&self) -> DbResult<PoolLease> {
        let observed = self.attempts.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        self.initialize_locked(&mut slot, observed).await
    }

    /// Return a lease on a pool that just passed its probe, rebuilding the
    /// pool first when the probe fails or its IAM token is due for refresh.
    pub async fn ensure_healthy(&self) -> DbResult<PoolLease> {
        let observed = self.attempts.load(Ordering::Acquire);
        let (lease, refresh_due) = {
            let mut slot = self.slot.lock().await;
            if slot.state.is_closed() {
                return Err(DbError::Closed);
            }
            let Some(pool) = slot.pool.clone() else {
                return self.initialize_locked(&mut slot, observed).await;
            };
            let refresh_due = slot
                .refresh_at
                .is_some_and(|refresh_at| Instant::now() >= refresh_at);
            (
                PoolLease {
                    pool,
                    generation: slot.generation,
                },
                refresh_due,
            )
        };

        if refresh_due {
            info!(
                generation = lease.generation,
                "IAM token behind the current pool is due for refresh, rebuilding"
            );
            return self.rebuild(lease.generation, observed).await;
        }

        match self.probe(lease.pool()).await {
            Ok(()) => Ok(lease),
            Err(e) => {
                warn!(
                    host = %self.config.host,
                    generation = lease.generation,
                    error = %e,
                    "Liveness probe failed, rebuilding pool"
                );
                self.rebuild(lease.generation, observed).await
            }
        }
    }

    /// Drop the current pool and return to Uninitialized.
    ///
    /// The handle is cleared under the lock; the old pool is closed after the
    /// lock is released.
    pub async fn teardown(&self) {
        let old = {
            let mut slot = self.slot.lock().await;
            let old = Self::take_pool(&mut slot);
            if !slot.state.is_closed() {
                self.transition(&mut slot, AdapterState::Uninitialized);
            }
            old
        };

        if let Some(pool) = old {
            self.close_quietly(pool).await;
        }
    }

    /// Close the pool for good. Idempotent.
    pub async fn close(&self) {
        let old = {
            let mut slot = self.slot.lock().await;
            if slot.state.is_closed() {
                return;
            }
            self.transition(&mut slot, AdapterState::Closed);
            Self::take_pool(&mut slot)
        };

        if let Some(pool) = old {
            self.close_quietly(pool).await;
        }
        info!(host = %self.config.host, database = %self.config.database, "Adapter closed");
    }

    /// Build a pool unless one is Healthy.
    ///
    /// `observed` is the attempt count the caller read before queueing on the
    /// lock. If an attempt completed since then and failed, its error is
    /// returned instead of starting another one.
    async fn initialize_locked(&self, slot: &mut Slot, observed: u64) -> DbResult<PoolLease> {
        if slot.state.is_closed() {
            return Err(DbError::Closed);
        }
        if let (AdapterState::Healthy, Some(pool)) = (slot.state, &slot.pool) {
            return Ok(PoolLease {
                pool: Arc::clone(pool),
                generation: slot.generation,
            });
        }
        if slot.attempt != observed {
            if let Some(failure) = &slot.last_failure {
                debug!(
                    observed,
                    attempt = slot.attempt,
                    "Sharing the result of a failed build attempt"
                );
                return Err(failure.to_error());
            }
        }

        let built = self.build().await;
        slot.attempt += 1;
        self.attempts.store(slot.attempt, Ordering::Release);

        let (pool, refresh_at) = match built {
            Ok(built) => built,
            Err(e) => {
                slot.last_failure = Some(BuildFailure::from_error(&e));
                self.failed_builds.fetch_add(1, Ordering::AcqRel);
                self.transition(slot, AdapterState::Uninitialized);
                return Err(e);
            }
        };

        slot.last_failure = None;
        slot.generation += 1;
        self.generation.store(slot.generation, Ordering::Release);

        let pool_opts = &self.config.pool;
        slot.keep_alive = pool_opts.keep_alive_or_default().then(|| {
            KeepAlive::spawn(
                &pool,
                slot.generation,
                pool_opts.keep_alive_initial_delay_or_default(),
                pool_opts.keep_alive_interval_or_default(),
                self.config.connect_timeout,
                refresh_at,
            )
        });
        slot.pool = Some(Arc::clone(&pool));
        slot.refresh_at = refresh_at;
        self.transition(slot, AdapterState::Healthy);

        info!(
            host = %self.config.host,
            database = %self.config.database,
            generation = slot.generation,
            "Pool ready"
        );

        Ok(PoolLease {
            pool,
            generation: slot.generation,
        })
    }

    /// Obtain a fresh credential, connect, and probe the new pool once.
    async fn build(&self) -> DbResult<(Arc<dyn DriverPool>, Option<Instant>)> {
        let credential = self.credentials.obtain_credential(&self.config).await?;
        let refresh_at = credential.refresh_at();
        let resolved = self.config.resolve(&credential);

        debug!(connection = %self.config.masked_connection_string(), "Building pool");

        let pool = self
            .connector
            .connect(&resolved)
            .await
            .map_err(into_connect_error)?;

        if let Err(e) = self.probe(pool.as_ref()).await {
            self.close_quietly(pool).await;
            return Err(DbError::connect(
                format!("New pool failed its liveness probe: {}", e),
                "Check that the server accepts queries from this user",
            ));
        }

        Ok((pool, refresh_at))
    }

    /// Replace the pool of generation `failed` unless someone already did.
    ///
    /// The new pool is installed under the lock; the stale one is closed after
    /// the lock is released, since closing waits for checked-out connections.
    async fn rebuild(&self, failed: u64, observed: u64) -> DbResult<PoolLease> {
        let (result, stale) = {
            let mut slot = self.slot.lock().await;

            if slot.state.is_closed() {
                return Err(DbError::Closed);
            }
            if slot.generation != failed || slot.pool.is_none() {
                debug!(
                    failed,
                    current = slot.generation,
                    "Pool already replaced by another caller"
                );
                return self.initialize_locked(&mut slot, observed).await;
            }

            self.transition(&mut slot, AdapterState::Degraded);
            let stale = Self::take_pool(&mut slot);
            self.rebuilds.fetch_add(1, Ordering::AcqRel);

            (self.initialize_locked(&mut slot, observed).await, stale)
        };

        if let Some(stale) = stale {
            self.close_quietly(stale).await;
        }
        result
    }

    async fn probe(&self, pool: &dyn DriverPool) -> DbResult<()> {
        self.probes.fetch_add(1, Ordering::AcqRel);
        let result = health::probe(pool, self.config.connect_timeout).await;
        if result.is_err() {
            self.probe_failures.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    /// Best-effort close, bounded by the connect timeout. Failures are only logged.
    async fn close_quietly(&self, pool: Arc<dyn DriverPool>) {
        match timeout(self.config.connect_timeout, pool.close()).await {
            Ok(Ok(())) => debug!("Released pool"),
            Ok(Err(e)) => warn!(error = %e, "Failed to release pool"),
            Err(_) => warn!(
                timeout_ms = self.config.connect_timeout.as_millis() as u64,
                "Timed out releasing pool"
            ),
        }
    }

    fn take_pool(slot: &mut Slot) -> Option<Arc<dyn DriverPool>> {
        slot.keep_alive = None;
        slot.refresh_at = None;
        slot.pool.take()
    }

    fn transition(&self, slot: &mut Slot, to: AdapterState) {
        if slot.state != to {
            debug!(from = %slot.state, to = %to, "State transition");
        }
        slot.state = to;
        self.state.store(state_to_u8(to), Ordering::Release);
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn into_connect_error(err: DbError) -> DbError {
    match err {
        DbError::Connect { .. } => err,
        other => DbError::connect(
            other.to_string(),
            "Check the host, port and network reachability",
        ),
    }
}

fn state_to_u8(state: AdapterState) -> u8 {
    match state {
        AdapterState::Uninitialized => 0,
        AdapterState::Healthy => 1,
        AdapterState::Degraded => 2,
        AdapterState::Closed => 3,
    }
}

fn state_from_u8(value: u8) -> AdapterState {
    match value {
        1 => AdapterState::Healthy,
        2 => AdapterState::Degraded,
        3 => AdapterState::Closed,
        _ => AdapterState::Uninitialized,
    }
}
