//! In-process driver and token signer for tests.
//!
//! Compiled for this crate's unit tests and, through the `test-util` feature,
//! for the integration tests under `tests/`.

use crate::auth::{TokenRequest, TokenSigner};
use crate::db::driver::{DriverPool, PoolConnector};
use crate::error::{BoxError, DbError, DbResult, DisconnectKind};
use crate::models::{QueryParam, ResolvedConnection, Row, WriteResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

/// Scripted outcome of one statement.
#[derive(Debug, Clone)]
pub enum Outcome {
    Rows(Vec<Row>),
    Write(WriteResult),
    /// Lost connection; also kills the pool it ran on.
    Disconnect,
    SyntaxError,
}

impl Outcome {
    fn error(&self) -> Option<DbError> {
        match self {
            Outcome::Disconnect => Some(DbError::transient(
                DisconnectKind::LostConnection,
                "Lost connection to MySQL server during query",
            )),
            Outcome::SyntaxError => Some(DbError::query(
                "You have an error in your SQL syntax",
                Some("1064".to_string()),
            )),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrement `counter` if it is positive; true when it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn pass(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = lock(gate).clone();
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    fail_connects: AtomicUsize,
    pings: AtomicUsize,
    fail_pings: AtomicUsize,
    statements: AtomicUsize,
    closes_started: AtomicUsize,
    outcomes: Mutex<VecDeque<Outcome>>,
    connections: Mutex<Vec<ResolvedConnection>>,
    pools: Mutex<Vec<Arc<FakePool>>>,
    connect_gate: Mutex<Option<Arc<Semaphore>>>,
    statement_gate: Mutex<Option<Arc<Semaphore>>>,
    close_gate: Mutex<Option<Arc<Semaphore>>>,
}

pub struct FakePool {
    shared: Arc<Shared>,
    alive: AtomicBool,
    closed: AtomicBool,
}

impl FakePool {
    /// Make every later ping on this pool fail.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Pop the next scripted outcome. A disconnect also kills this pool.
    async fn next_outcome(&self) -> Option<Outcome> {
        self.shared.statements.fetch_add(1, Ordering::SeqCst);
        pass(&self.shared.statement_gate).await;
        let outcome = lock(&self.shared.outcomes).pop_front();
        if matches!(outcome, Some(Outcome::Disconnect)) {
            self.kill();
        }
        outcome
    }
}

#[async_trait]
impl DriverPool for FakePool {
    async fn ping(&self) -> DbResult<()> {
        self.shared.pings.fetch_add(1, Ordering::SeqCst);
        let scripted_failure = take_one(&self.shared.fail_pings);
        if scripted_failure || !self.alive.load(Ordering::SeqCst) {
            return Err(DbError::transient(
                DisconnectKind::ServerGoneAway,
                "MySQL server has gone away",
            ));
        }
        Ok(())
    }

    async fn fetch_all(&self, _sql: &str, _params: &[QueryParam]) -> DbResult<Vec<Row>> {
        match self.next_outcome().await {
            Some(Outcome::Rows(rows)) => Ok(rows),
            Some(outcome) => outcome.error().map_or(Ok(Vec::new()), Err),
            None => Ok(Vec::new()),
        }
    }

    async fn execute(&self, _sql: &str, _params: &[QueryParam]) -> DbResult<WriteResult> {
        match self.next_outcome().await {
            Some(Outcome::Write(result)) => Ok(result),
            Some(outcome) => outcome.error().map_or(Ok(WriteResult::default()), Err),
            None => Ok(WriteResult::default()),
        }
    }

    async fn execute_batch(&self, _sql: &str) -> DbResult<()> {
        match self.next_outcome().await.and_then(|o| o.error()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) -> DbResult<()> {
        self.shared.closes_started.fetch_add(1, Ordering::SeqCst);
        pass(&self.shared.close_gate).await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector handing out [`FakePool`]s and recording what it was asked for.
#[derive(Default)]
pub struct FakeConnector {
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Pings seen across all pools.
    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> usize {
        self.shared.statements.load(Ordering::SeqCst)
    }

    pub fn closes_started(&self) -> usize {
        self.shared.closes_started.load(Ordering::SeqCst)
    }

    /// Every resolved connection handed to `connect`, refused ones included.
    pub fn connections(&self) -> Vec<ResolvedConnection> {
        lock(&self.shared.connections).clone()
    }

    /// The `n`th pool built, counting from zero.
    ///
    /// # Panics
    ///
    /// When fewer than `n + 1` pools were built.
    pub fn pool(&self, n: usize) -> Arc<FakePool> {
        Arc::clone(&lock(&self.shared.pools)[n])
    }

    /// Refuse the next `n` connects. Zero clears a pending count.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` pings, whichever pool they hit.
    pub fn fail_next_pings(&self, n: usize) {
        self.shared.fail_pings.store(n, Ordering::SeqCst);
    }

    /// Queue statement outcomes, consumed in order across all pools.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        lock(&self.shared.outcomes).extend(outcomes);
    }

    /// Hold every connect until permits are added to the returned semaphore.
    pub fn hold_connects(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.shared.connect_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Hold every statement until permits are added to the returned semaphore.
    pub fn hold_statements(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.shared.statement_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Hold every pool close until permits are added to the returned semaphore.
    pub fn hold_closes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.shared.close_gate) = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl PoolConnector for FakeConnector {
    async fn connect(&self, connection: &ResolvedConnection) -> DbResult<Arc<dyn DriverPool>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.connections).push(connection.clone());
        pass(&self.shared.connect_gate).await;

        if take_one(&self.shared.fail_connects) {
            return Err(DbError::connect("Connection refused", "Start the server"));
        }

        let pool = Arc::new(FakePool {
            shared: Arc::clone(&self.shared),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        lock(&self.shared.pools).push(Arc::clone(&pool));
        Ok(pool)
    }
}

/// Signer returning a fixed token and counting calls.
pub struct FakeSigner {
    token: String,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl FakeSigner {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deny the next `n` token requests.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenSigner for FakeSigner {
    async fn generate_auth_token(&self, _request: &TokenRequest) -> Result<String, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures) {
            return Err("AccessDenied: rds-db:connect not allowed".into());
        }
        Ok(self.token.clone())
    }
}
