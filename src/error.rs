//! Error types for the database adapter.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver failures are classified here: the small closed set of disconnect
//! signatures becomes [`DbError::TransientDisconnect`], which is the only class the
//! query executor retries.

use std::fmt;
use std::io;
use thiserror::Error;

/// Boxed upstream error kept as the `source` of an error chain.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// MySQL server error codes that mean the session is gone.
const ER_SERVER_SHUTDOWN: u16 = 1053;
const ER_CONNECTION_KILLED: u16 = 1927;
const CR_SERVER_GONE_ERROR: u16 = 2006;
const CR_SERVER_LOST: u16 = 2013;
const ER_CLIENT_INTERACTION_TIMEOUT: u16 = 4031;

/// Known transient-disconnect signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectKind {
    /// The pool was closed underneath the operation.
    PoolClosed,
    /// The peer reset or aborted the TCP connection.
    ConnectionReset,
    /// Write on a socket the peer already closed.
    BrokenPipe,
    /// Stream ended in the middle of a packet.
    UnexpectedEof,
    NotConnected,
    /// "MySQL server has gone away" (2006) or server shutdown (1053).
    ServerGoneAway,
    /// "Lost connection to MySQL server during query" (2013) or killed (1927).
    LostConnection,
    /// Server closed the session for inactivity (4031).
    IdleTimeout,
}

impl DisconnectKind {
    /// Classify an I/O error kind.
    pub fn from_io_kind(kind: io::ErrorKind) -> Option<Self> {
        match kind {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Some(Self::ConnectionReset)
            }
            io::ErrorKind::BrokenPipe => Some(Self::BrokenPipe),
            io::ErrorKind::UnexpectedEof => Some(Self::UnexpectedEof),
            io::ErrorKind::NotConnected => Some(Self::NotConnected),
            _ => None,
        }
    }

    /// Classify a MySQL numeric error code.
    pub fn from_mysql_code(code: u16) -> Option<Self> {
        match code {
            CR_SERVER_GONE_ERROR | ER_SERVER_SHUTDOWN => Some(Self::ServerGoneAway),
            CR_SERVER_LOST | ER_CONNECTION_KILLED => Some(Self::LostConnection),
            ER_CLIENT_INTERACTION_TIMEOUT => Some(Self::IdleTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PoolClosed => "pool closed",
            Self::ConnectionReset => "connection reset",
            Self::BrokenPipe => "broken pipe",
            Self::UnexpectedEof => "unexpected eof",
            Self::NotConnected => "not connected",
            Self::ServerGoneAway => "server gone away",
            Self::LostConnection => "lost connection",
            Self::IdleTimeout => "idle timeout",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IAM authentication misconfigured: {message}")]
    AuthConfig { message: String },

    #[error("Token signer rejected the request: {message}")]
    AuthProvider {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Connection failed: {message}")]
    Connect { message: String, suggestion: String },

    #[error("Connection lost ({kind}): {message}")]
    TransientDisconnect { kind: DisconnectKind, message: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// MySQL error number or SQLSTATE, when the server reported one.
        code: Option<String>,
    },

    #[error("Adapter is closed")]
    Closed,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an IAM configuration error.
    pub fn auth_config(message: impl Into<String>) -> Self {
        Self::AuthConfig {
            message: message.into(),
        }
    }

    /// Create a signer error, keeping the upstream cause.
    pub fn auth_provider(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::AuthProvider {
            message: message.into(),
            source,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connect(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a transient disconnect error.
    pub fn transient(kind: DisconnectKind, message: impl Into<String>) -> Self {
        Self::TransientDisconnect {
            kind,
            message: message.into(),
        }
    }

    /// Create a query error with an optional server code.
    pub fn query(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            code,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a failed operation into a `Query` error, keeping the original message.
    ///
    /// Errors that already are `Query` pass through untouched.
    pub fn into_query_error(self, context: Option<&str>) -> Self {
        match self {
            Self::Query { message, code } => match context {
                Some(ctx) => Self::Query {
                    message: format!("{}: {}", ctx, message),
                    code,
                },
                None => Self::Query { message, code },
            },
            other => {
                let message = match context {
                    Some(ctx) => format!("{}: {}", ctx, other),
                    None => other.to_string(),
                };
                Self::Query {
                    message,
                    code: None,
                }
            }
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connect { suggestion, .. } => Some(suggestion),
            Self::AuthConfig { .. } => {
                Some("Set awsRegion, user and host when awsIamAuth is enabled")
            }
            Self::AuthProvider { .. } => {
                Some("Check the cloud credentials available to the token signer")
            }
            Self::Closed => Some("Create a new adapter; a closed adapter cannot be reopened"),
            _ => None,
        }
    }

    /// Check if this error is a transient disconnect.
    pub fn is_transient_disconnect(&self) -> bool {
        matches!(self, Self::TransientDisconnect { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => {
                DbError::transient(DisconnectKind::PoolClosed, "connection pool is closed")
            }
            sqlx::Error::Io(io_err) => match DisconnectKind::from_io_kind(io_err.kind()) {
                Some(kind) => DbError::transient(kind, io_err.to_string()),
                None => DbError::connect(
                    format!("I/O error: {}", io_err),
                    "Check network connectivity and database server status",
                ),
            },
            sqlx::Error::Database(db_err) => {
                let number = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number());
                if let Some(kind) = number.and_then(DisconnectKind::from_mysql_code) {
                    return DbError::transient(kind, db_err.message());
                }
                let code = number
                    .map(|n| n.to_string())
                    .or_else(|| db_err.code().map(|c| c.to_string()));
                DbError::query(db_err.message(), code)
            }
            sqlx::Error::Configuration(msg) => DbError::connect(
                msg.to_string(),
                "Check the connection options and credentials",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connect(
                format!("TLS error: {}", tls_err),
                "Verify the ssl option; enable the tls-native or tls-rustls feature",
            ),
            sqlx::Error::Protocol(msg) => DbError::connect(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 0),
            sqlx::Error::RowNotFound => DbError::query("No rows returned", None),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::query(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
