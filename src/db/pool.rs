//! sqlx-backed MySQL pool.
//!
//! This module builds `MySqlPool`s from a [`ResolvedConnection`] and exposes them
//! through the [`DriverPool`] seam.

use crate::db::driver::{DriverPool, PoolConnector};
use crate::db::health::PROBE_SQL;
use crate::db::params::bind_all;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, ResolvedConnection, Row, SslMode, WriteResult};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::{Executor, MySqlPool};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info};

// MySQL server error codes surfaced while connecting.
const ER_ACCESS_DENIED_ERROR: u16 = 1045;
const ER_BAD_DB_ERROR: u16 = 1049;

/// Builds sqlx MySQL pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl MySqlConnector {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(connection: &ResolvedConnection) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&connection.host)
            .port(connection.port)
            .database(&connection.database)
            .ssl_mode(to_sqlx_ssl_mode(connection.tls.ssl_mode()))
            .charset("utf8mb4");

        if let Some(user) = &connection.user {
            options = options.username(user);
        }
        if let Some(password) = &connection.password {
            options = options.password(password);
        }
        if let Some(ca) = connection.tls.ca_file() {
            options = options.ssl_ca(ca);
        }
        options
    }

    /// Generate a helpful suggestion for connection errors.
    fn connection_suggestion(connection: &ResolvedConnection, error: &sqlx::Error) -> String {
        let number = match error {
            sqlx::Error::Database(db_err) => db_err
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .map(|e| e.number()),
            _ => None,
        };

        match (error, number) {
            (_, Some(ER_ACCESS_DENIED_ERROR)) if connection.credential_is_token => {
                "The IAM token was rejected; check the user is granted AWSAuthenticationPlugin \
                 and that TLS is enabled"
                    .to_string()
            }
            (_, Some(ER_ACCESS_DENIED_ERROR)) => "Verify the user and password".to_string(),
            (_, Some(ER_BAD_DB_ERROR)) => {
                format!("Check that the database '{}' exists", connection.database)
            }
            (sqlx::Error::Io(_), _) => format!(
                "Check that the MySQL server at {}:{} is running and accessible",
                connection.host, connection.port
            ),
            (sqlx::Error::Tls(_), _) => {
                "Check the ssl option or the CA bundle, or try disabling TLS".to_string()
            }
            _ => "Verify the host, port and credentials".to_string(),
        }
    }
}

#[async_trait]
impl PoolConnector for MySqlConnector {
    async fn connect(&self, connection: &ResolvedConnection) -> DbResult<Arc<dyn DriverPool>> {
        let pool_opts = &connection.pool;

        info!(
            host = %connection.host,
            port = connection.port,
            database = %connection.database,
            max_connections = pool_opts.connection_limit_or_default(),
            max_idle = pool_opts.max_idle_or_default(),
            tls = connection.tls.is_enabled(),
            "Creating MySQL pool"
        );

        // sqlx has no separate idle cap; max_idle only bounds the limit check in
        // PoolOptions::validate and idle connections are reaped by idle_timeout.
        let pending = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(pool_opts.connection_limit_or_default())
            .acquire_timeout(connection.connect_timeout)
            .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
            .test_before_acquire(true)
            .connect_with(Self::connect_options(connection));

        let pool = match timeout(connection.connect_timeout, pending).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                return Err(DbError::connect(
                    format!("Failed to connect: {}", e),
                    Self::connection_suggestion(connection, &e),
                ));
            }
            Err(_) => {
                return Err(DbError::connect(
                    format!(
                        "Timed out after {}ms connecting to {}:{}",
                        connection.connect_timeout.as_millis(),
                        connection.host,
                        connection.port
                    ),
                    "Check network reachability or raise connectionTimeout",
                ));
            }
        };

        Ok(Arc::new(MySqlDriverPool::new(pool)))
    }
}

fn to_sqlx_ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disabled => MySqlSslMode::Disabled,
        SslMode::Preferred => MySqlSslMode::Preferred,
        SslMode::Required => MySqlSslMode::Required,
        SslMode::VerifyCa => MySqlSslMode::VerifyCa,
        SslMode::VerifyIdentity => MySqlSslMode::VerifyIdentity,
    }
}

/// [`DriverPool`] over a sqlx `MySqlPool`.
#[derive(Debug, Clone)]
pub struct MySqlDriverPool {
    pool: MySqlPool,
}

impl MySqlDriverPool {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriverPool for MySqlDriverPool {
    async fn ping(&self) -> DbResult<()> {
        self.pool.execute(PROBE_SQL).await?;
        Ok(())
    }

    async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        // Without params, use the text protocol so statements that cannot be
        // prepared still run
        let rows = if params.is_empty() {
            self.pool.fetch_all(sql).await?
        } else {
            bind_all(sql, params).fetch_all(&self.pool).await?
        };
        debug!(rows = rows.len(), "Fetched rows");
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<WriteResult> {
        let result = if params.is_empty() {
            self.pool.execute(sql).await?
        } else {
            bind_all(sql, params).execute(&self.pool).await?
        };
        Ok(WriteResult::new(
            result.rows_affected(),
            result.last_insert_id(),
        ))
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::config::AdapterOptions;
    use std::io;

    fn resolved(credential: Credential) -> ResolvedConnection {
        AdapterOptions::new("db.example.com", "app")
            .with_user("app_user")
            .resolve()
            .unwrap()
            .resolve(&credential)
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(
            to_sqlx_ssl_mode(SslMode::VerifyIdentity),
            MySqlSslMode::VerifyIdentity
        ));
        assert!(matches!(
            to_sqlx_ssl_mode(SslMode::Disabled),
            MySqlSslMode::Disabled
        ));
    }

    #[test]
    fn test_connection_suggestion_for_io_error() {
        let connection = resolved(Credential::static_password(None));
        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let suggestion = MySqlConnector::connection_suggestion(&connection, &err);
        assert!(suggestion.contains("db.example.com:3306"));
    }

    #[test]
    fn test_connection_suggestion_fallback() {
        let connection = resolved(Credential::token("TOK123"));
        let suggestion =
            MySqlConnector::connection_suggestion(&connection, &sqlx::Error::PoolTimedOut);
        assert_eq!(suggestion, "Verify the host, port and credentials");
    }

    #[tokio::test]
    async fn test_connect_unreachable_is_connect_error() {
        let mut connection = resolved(Credential::static_password(None));
        connection.host = "127.0.0.1".to_string();
        connection.port = 1;
        connection.connect_timeout = std::time::Duration::from_millis(500);

        match MySqlConnector::new().connect(&connection).await {
            Err(DbError::Connect { .. }) => {}
            Err(other) => panic!("expected Connect, got {:?}", other),
            Ok(_) => panic!("expected connection failure"),
        }
    }
}
