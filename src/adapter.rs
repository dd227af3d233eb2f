//! Host-facing adapter.
//!
//! [`MySqlAdapter`] ties the credential provider, pool manager and executor
//! together behind the surface the host process calls.

use crate::auth::{CredentialProvider, TokenSigner};
use crate::config::AdapterOptions;
use crate::db::driver::PoolConnector;
use crate::db::executor::QueryExecutor;
use crate::db::manager::{PoolManager, PoolStats};
use crate::db::pool::MySqlConnector;
use crate::db::schema;
use crate::error::DbResult;
use crate::models::{AdapterState, EngineInfo, QueryParam, Row, WriteResult};
use std::sync::Arc;
use tracing::info;

pub const ENGINE_NAME: &str = "MySQL";
pub const ENGINE_KIND: &str = "mysql";

/// A self-healing MySQL adapter. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct MySqlAdapter {
    manager: Arc<PoolManager>,
    executor: QueryExecutor,
}

impl MySqlAdapter {
    /// Create an adapter over sqlx pools.
    ///
    /// Validates the options (port, ssl, pool limits) but opens no connection;
    /// call [`initialize`](Self::initialize) or just start issuing queries.
    pub fn new(options: &AdapterOptions, signer: Option<Arc<dyn TokenSigner>>) -> DbResult<Self> {
        Self::with_connector(options, signer, Arc::new(MySqlConnector::new()))
    }

    /// Create an adapter over a custom pool connector.
    pub fn with_connector(
        options: &AdapterOptions,
        signer: Option<Arc<dyn TokenSigner>>,
        connector: Arc<dyn PoolConnector>,
    ) -> DbResult<Self> {
        let config = options.resolve()?;
        let credentials = match signer {
            Some(signer) => CredentialProvider::with_signer(signer),
            None => CredentialProvider::static_only(),
        };

        info!(
            connection = %config.masked_connection_string(),
            aws_iam_auth = config.aws_iam_auth,
            "Adapter created"
        );

        let manager = Arc::new(PoolManager::new(config, credentials, connector));
        let executor = QueryExecutor::new(Arc::clone(&manager));
        Ok(Self { manager, executor })
    }

    /// Build the pool and verify it. A no-op when already Healthy.
    pub async fn initialize(&self) -> DbResult<()> {
        self.manager.initialize().await.map(|_| ())
    }

    pub async fn query_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.executor.query_all(sql, params).await
    }

    pub async fn query_write(&self, sql: &str, params: &[QueryParam]) -> DbResult<WriteResult> {
        self.executor.query_write(sql, params).await
    }

    pub async fn exec_batch(&self, sql: &str) -> DbResult<()> {
        self.executor.exec_batch(sql).await
    }

    /// Close the adapter. Later operations fail with `Closed`.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    pub fn describe_self(&self) -> EngineInfo {
        let config = self.manager.config();
        EngineInfo {
            engine_name: ENGINE_NAME.to_string(),
            engine_kind: ENGINE_KIND.to_string(),
            host: config.host.clone(),
            database: config.database.clone(),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.manager.state()
    }

    pub fn stats(&self) -> PoolStats {
        self.manager.stats()
    }

    pub fn list_tables_sql(&self) -> &'static str {
        schema::list_tables_sql()
    }

    pub fn describe_table_sql(&self, table: &str) -> String {
        schema::describe_table_sql(table)
    }
}
