//! Background keep-alive for idle pools.
//!
//! Shared hosting providers kill sessions that stay silent. Each built pool
//! gets a task that probes it on a fixed cadence so at least one connection
//! sees traffic. The task never repairs anything: failures are logged and the
//! executor's repair path deals with the dead pool on the next request.

use crate::db::driver::DriverPool;
use crate::db::health;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Handle to a running keep-alive task. Dropping it stops the task.
#[derive(Debug)]
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Start probing `pool` after `initial_delay`, then every `interval`.
    ///
    /// Holds only a weak reference: the task exits once the pool is dropped
    /// or closed, or once `stop_at` passes. Token-backed pools pass their
    /// refresh instant so the task never opens connections with a stale token.
    pub fn spawn(
        pool: &Arc<dyn DriverPool>,
        generation: u64,
        initial_delay: Duration,
        interval: Duration,
        probe_timeout: Duration,
        stop_at: Option<Instant>,
    ) -> Self {
        let weak_pool = Arc::downgrade(pool);
        let handle = tokio::spawn(async move {
            Self::run(
                weak_pool,
                generation,
                initial_delay,
                interval,
                probe_timeout,
                stop_at,
            )
            .await;
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    async fn run(
        weak_pool: Weak<dyn DriverPool>,
        generation: u64,
        initial_delay: Duration,
        every: Duration,
        probe_timeout: Duration,
        stop_at: Option<Instant>,
    ) {
        tokio::time::sleep(initial_delay).await;

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if stop_at.is_some_and(|at| Instant::now() >= at) {
                debug!(generation, "Credential due for refresh, keep-alive task exiting");
                return;
            }
            let Some(pool) = weak_pool.upgrade() else {
                debug!(generation, "Pool dropped, keep-alive task exiting");
                return;
            };
            if pool.is_closed() {
                debug!(generation, "Pool closed, keep-alive task exiting");
                return;
            }

            if let Err(e) = health::probe(pool.as_ref(), probe_timeout).await {
                debug!(generation, error = %e, "Keep-alive probe failed");
            }
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
