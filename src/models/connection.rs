//! Connection-related data models.
//!
//! This module defines the immutable connection configuration, the per-rebuild
//! resolved connection that carries the live credential, and adapter state.

use crate::auth::Credential;
use crate::config::PoolOptions;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Driver-level ssl modes, named as the MySQL client names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disabled,
    Preferred,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "disabled" => Ok(Self::Disabled),
            "preferred" => Ok(Self::Preferred),
            "required" => Ok(Self::Required),
            "verify_ca" => Ok(Self::VerifyCa),
            "verify_identity" => Ok(Self::VerifyIdentity),
            other => Err(format!(
                "unknown ssl mode '{}'; expected disabled, preferred, required, verify_ca or verify_identity",
                other
            )),
        }
    }
}

/// TLS policy for connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Plain TCP.
    Disabled,
    /// TLS with full certificate and hostname verification.
    Verified,
    /// TLS without certificate validation. Used for IAM endpoints whose
    /// gateway is trusted out-of-band.
    Unverified,
    /// Driver-native ssl mode, optionally with a CA bundle.
    Native {
        mode: SslMode,
        ca_file: Option<PathBuf>,
    },
}

impl TlsPolicy {
    /// Driver ssl mode for this policy.
    pub fn ssl_mode(&self) -> SslMode {
        match self {
            Self::Disabled => SslMode::Disabled,
            Self::Verified => SslMode::VerifyIdentity,
            Self::Unverified => SslMode::Required,
            Self::Native { mode, .. } => *mode,
        }
    }

    /// CA bundle path, when one was configured.
    pub fn ca_file(&self) -> Option<&PathBuf> {
        match self {
            Self::Native { ca_file, .. } => ca_file.as_ref(),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.ssl_mode(), SslMode::Disabled)
    }
}

/// Immutable configuration for one adapter instance.
///
/// The password field is never rewritten; each pool build derives a fresh
/// [`ResolvedConnection`] carrying the credential obtained for that build.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    /// Contains sensitive data - never log
    pub password: Option<String>,
    pub tls: TlsPolicy,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub pool: PoolOptions,
    pub multiple_statements: bool,
    pub aws_iam_auth: bool,
    pub aws_region: Option<String>,
}

impl ConnectionConfig {
    /// Derive the connection used for one pool build.
    pub fn resolve(&self, credential: &Credential) -> ResolvedConnection {
        ResolvedConnection {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: credential.secret().map(String::from),
            tls: self.tls.clone(),
            connect_timeout: self.connect_timeout,
            pool: self.pool.clone(),
            credential_is_token: credential.is_token(),
        }
    }

    /// Display-safe connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        let user = self.user.as_deref().unwrap_or("");
        let secret = if self.password.is_some() || self.aws_iam_auth {
            ":****"
        } else {
            ""
        };
        format!(
            "mysql://{}{}@{}:{}/{}",
            user, secret, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("pool", &self.pool)
            .field("multiple_statements", &self.multiple_statements)
            .field("aws_iam_auth", &self.aws_iam_auth)
            .field("aws_region", &self.aws_region)
            .finish()
    }
}

/// Connection parameters for a single pool build, credential included.
#[derive(Clone)]
pub struct ResolvedConnection {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub tls: TlsPolicy,
    pub connect_timeout: Duration,
    pub pool: PoolOptions,
    pub credential_is_token: bool,
}

impl fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("tls", &self.tls)
            .field("credential_is_token", &self.credential_is_token)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Uninitialized,
    Healthy,
    /// Probe failed and a rebuild is in flight. Never observed by callers of
    /// the query operations.
    Degraded,
    /// Terminal.
    Closed,
}

impl AdapterState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Self-description returned to the host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub engine_name: String,
    pub engine_kind: String,
    pub host: String,
    pub database: String,
}
