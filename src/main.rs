//! db-adapter - diagnostic command line.
//!
//! Builds a [`MySqlAdapter`] from flags or a connection URL and runs one
//! operation through it. Logs go to stderr, results to stdout as JSON.

use clap::Parser;
use db_adapter::auth::{CommandTokenSigner, TokenSigner};
use db_adapter::config::{Command, Config};
use db_adapter::models::QueryParam;
use db_adapter::{DbError, MySqlAdapter};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn parse_params(raw: &str) -> Result<Vec<QueryParam>, String> {
    serde_json::from_str(raw).map_err(|e| format!("--params must be a JSON array: {e}"))
}

async fn run(adapter: &MySqlAdapter, command: &Command) -> Result<serde_json::Value, DbError> {
    match command {
        Command::Ping => {
            adapter.initialize().await?;
            Ok(json!({
                "engine": adapter.describe_self(),
                "stats": adapter.stats(),
            }))
        }
        Command::Query { sql, params } => {
            let params = parse_params(params).map_err(DbError::invalid_input)?;
            let rows = adapter.query_all(sql, &params).await?;
            Ok(json!(rows))
        }
        Command::Execute { sql, params } => {
            let params = parse_params(params).map_err(DbError::invalid_input)?;
            let result = adapter.query_write(sql, &params).await?;
            Ok(json!(result))
        }
        Command::Script { file } => {
            let sql = tokio::fs::read_to_string(file).await.map_err(|e| {
                DbError::invalid_input(format!("cannot read {}: {}", file.display(), e))
            })?;
            adapter.exec_batch(&sql).await?;
            Ok(json!({ "ok": true }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let options = config.adapter_options()?;
    let signer: Option<Arc<dyn TokenSigner>> = options
        .aws_iam_auth
        .then(|| Arc::new(CommandTokenSigner::new(&config.token_command)) as Arc<dyn TokenSigner>);

    info!("Starting db-adapter v{}", env!("CARGO_PKG_VERSION"));

    let adapter = MySqlAdapter::new(&options, signer)?;
    let result = run(&adapter, &config.command).await;
    adapter.close().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Suggestion: {}", suggestion);
            }
            Err(e.into())
        }
    }
}
