//! Credential provider.
//!
//! Produces the secret used by each pool build: either the configured static
//! password or a short-lived IAM token minted by a [`TokenSigner`]. Tokens are
//! never cached; every call to [`CredentialProvider::obtain_credential`] asks the
//! signer again.

use crate::error::{BoxError, DbError, DbResult};
use crate::models::ConnectionConfig;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

/// Lifetime of an RDS IAM authentication token.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// How long before expiry a token-backed pool is rebuilt. New physical
/// connections opened inside this window still carry a valid token.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(2 * 60);

/// Secret used to authenticate one pool build.
#[derive(Clone)]
pub enum Credential {
    /// Long-lived password from configuration (absent for passwordless users).
    Static { password: Option<String> },
    /// Freshly minted IAM token.
    Token { value: String, expires_at: Instant },
}

impl Credential {
    pub fn static_password(password: Option<String>) -> Self {
        Self::Static { password }
    }

    /// Wrap a token issued now.
    pub fn token(value: impl Into<String>) -> Self {
        Self::Token {
            value: value.into(),
            expires_at: Instant::now() + TOKEN_LIFETIME,
        }
    }

    /// The secret to hand to the driver.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::Static { password } => password.as_deref(),
            Self::Token { value, .. } => Some(value),
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Self::Token { .. })
    }

    /// Instant from which a pool built with this credential must be replaced.
    /// Static passwords never need a refresh.
    pub fn refresh_at(&self) -> Option<Instant> {
        match self {
            Self::Static { .. } => None,
            Self::Token { expires_at, .. } => Some(*expires_at - TOKEN_REFRESH_MARGIN),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { password } => f
                .debug_struct("Static")
                .field("password", &password.as_ref().map(|_| "****"))
                .finish(),
            Self::Token {
                value, expires_at, ..
            } => f
                .debug_struct("Token")
                .field("value", &mask_token(value))
                .field(
                    "expires_in",
                    &expires_at.saturating_duration_since(Instant::now()),
                )
                .finish(),
        }
    }
}

/// Parameters the signer needs to mint a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub hostname: String,
    pub port: u16,
    pub region: String,
    pub username: String,
}

/// External collaborator that mints IAM authentication tokens.
#[async_trait]
pub trait TokenSigner: Send + Sync {
    async fn generate_auth_token(&self, request: &TokenRequest) -> Result<String, BoxError>;
}

/// Signer that shells out to the AWS CLI
/// (`aws rds generate-db-auth-token`).
#[derive(Debug, Clone)]
pub struct CommandTokenSigner {
    program: String,
}

impl CommandTokenSigner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandTokenSigner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TOKEN_COMMAND)
    }
}

#[async_trait]
impl TokenSigner for CommandTokenSigner {
    async fn generate_auth_token(&self, request: &TokenRequest) -> Result<String, BoxError> {
        let output = Command::new(&self.program)
            .args(["rds", "generate-db-auth-token", "--hostname"])
            .arg(&request.hostname)
            .arg("--port")
            .arg(request.port.to_string())
            .arg("--region")
            .arg(&request.region)
            .arg("--username")
            .arg(&request.username)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )
            .into());
        }

        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

/// Resolves the credential for each pool build.
#[derive(Clone)]
pub struct CredentialProvider {
    signer: Option<Arc<dyn TokenSigner>>,
}

impl CredentialProvider {
    /// Provider for static passwords only.
    pub fn static_only() -> Self {
        Self { signer: None }
    }

    /// Provider that mints IAM tokens with `signer` when the configuration asks for it.
    pub fn with_signer(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    /// Obtain a credential for a new pool build.
    ///
    /// Never memoized: IAM configurations get a brand-new token on every call.
    pub async fn obtain_credential(&self, config: &ConnectionConfig) -> DbResult<Credential> {
        if !config.aws_iam_auth {
            return Ok(Credential::static_password(config.password.clone()));
        }

        let request = Self::token_request(config)?;
        let Some(signer) = &self.signer else {
            return Err(DbError::auth_config(
                "awsIamAuth is enabled but no token signer is configured",
            ));
        };

        debug!(
            host = %request.hostname,
            region = %request.region,
            user = %request.username,
            "Requesting IAM authentication token"
        );

        let token = signer
            .generate_auth_token(&request)
            .await
            .map_err(|e| {
                DbError::auth_provider(
                    format!("failed to generate auth token for {}", request.username),
                    Some(e),
                )
            })?;

        if token.is_empty() {
            return Err(DbError::auth_provider(
                "token signer returned an empty token",
                None,
            ));
        }

        info!(
            host = %request.hostname,
            token = %mask_token(&token),
            "Obtained IAM authentication token"
        );
        Ok(Credential::token(token))
    }

    /// Validate the IAM fields before any network activity.
    fn token_request(config: &ConnectionConfig) -> DbResult<TokenRequest> {
        let region = non_empty(config.aws_region.as_deref())
            .ok_or_else(|| DbError::auth_config("awsRegion is required when awsIamAuth is true"))?;
        let username = non_empty(config.user.as_deref())
            .ok_or_else(|| DbError::auth_config("user is required when awsIamAuth is true"))?;
        let hostname = non_empty(Some(config.host.as_str()))
            .ok_or_else(|| DbError::auth_config("host is required when awsIamAuth is true"))?;

        Ok(TokenRequest {
            hostname: hostname.to_string(),
            port: config.port,
            region: region.to_string(),
            username: username.to_string(),
        })
    }
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("has_signer", &self.signer.is_some())
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn mask_token(token: &str) -> String {
    match token.get(..3) {
        Some(prefix) if token.len() > 3 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}
