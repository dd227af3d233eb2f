//! Adapter lifecycle tests against an in-process driver.

mod common;

use common::{FakeConnector, FakeSigner, Outcome, iam_options, static_options};
use db_adapter::auth::{CredentialProvider, TokenSigner};
use db_adapter::db::PoolManager;
use db_adapter::models::{AdapterState, QueryParam, Row, WriteResult};
use db_adapter::{DbError, MySqlAdapter};
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn adapter(connector: &Arc<FakeConnector>) -> MySqlAdapter {
    MySqlAdapter::with_connector(&static_options(), None, connector.clone()).unwrap()
}

#[tokio::test]
async fn test_select_one_returns_single_row() {
    let connector = FakeConnector::new();
    connector.script([Outcome::Rows(vec![row(json!({"1": 1}))])]);
    let adapter = adapter(&connector);

    assert_ok!(adapter.initialize().await);
    assert_eq!(adapter.state(), AdapterState::Healthy);

    let rows = adapter.query_all("SELECT 1", &[]).await.unwrap();
    assert_eq!(serde_json::to_value(&rows).unwrap(), json!([{"1": 1}]));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_queries_initialize_lazily() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    assert_eq!(connector.connects(), 0);

    assert_ok!(adapter.query_all("SELECT 1", &[]).await);
    assert_eq!(connector.connects(), 1);
    assert_eq!(adapter.state(), AdapterState::Healthy);
}

#[tokio::test]
async fn test_write_reports_affected_rows_and_insert_id() {
    let connector = FakeConnector::new();
    connector.script([Outcome::Write(WriteResult::new(1, 42))]);
    let adapter = adapter(&connector);

    let result = adapter
        .query_write("INSERT INTO users (name) VALUES (?)", &[QueryParam::from("alice")])
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.inserted_id, 42);
}

#[tokio::test]
async fn test_static_credentials_never_call_signer() {
    let connector = FakeConnector::new();
    let signer = FakeSigner::new("TOK123");
    let adapter = MySqlAdapter::with_connector(
        &static_options(),
        Some(signer.clone() as Arc<dyn TokenSigner>),
        connector.clone(),
    )
    .unwrap();

    adapter.initialize().await.unwrap();
    assert_eq!(signer.calls(), 0);

    let connections = connector.connections();
    assert_eq!(connections[0].password.as_deref(), Some("x"));
    assert!(!connections[0].credential_is_token);
}

#[tokio::test]
async fn test_iam_token_becomes_pool_password() {
    let connector = FakeConnector::new();
    let signer = FakeSigner::new("TOK123");
    let adapter = MySqlAdapter::with_connector(
        &iam_options(Some("us-east-1")),
        Some(signer.clone() as Arc<dyn TokenSigner>),
        connector.clone(),
    )
    .unwrap();

    adapter.initialize().await.unwrap();
    assert_eq!(signer.calls(), 1);

    let connections = connector.connections();
    assert_eq!(connections[0].password.as_deref(), Some("TOK123"));
    assert_eq!(connections[0].user.as_deref(), Some("iam_user"));
    assert!(connections[0].credential_is_token);
}

#[tokio::test]
async fn test_iam_token_is_minted_again_on_rebuild() {
    let connector = FakeConnector::new();
    let signer = FakeSigner::new("TOK123");
    let adapter = MySqlAdapter::with_connector(
        &iam_options(Some("us-east-1")),
        Some(signer.clone() as Arc<dyn TokenSigner>),
        connector.clone(),
    )
    .unwrap();

    adapter.initialize().await.unwrap();
    connector.pool(0).kill();
    adapter.query_all("SELECT 1", &[]).await.unwrap();

    assert_eq!(connector.connects(), 2);
    assert_eq!(signer.calls(), 2);
}

#[tokio::test]
async fn test_iam_without_region_fails_before_connecting() {
    let connector = FakeConnector::new();
    let signer = FakeSigner::new("TOK123");
    let adapter = MySqlAdapter::with_connector(
        &iam_options(None),
        Some(signer.clone() as Arc<dyn TokenSigner>),
        connector.clone(),
    )
    .unwrap();

    let err = adapter.initialize().await.unwrap_err();
    assert!(matches!(err, DbError::AuthConfig { .. }), "got {:?}", err);
    assert_eq!(connector.connects(), 0);
    assert_eq!(signer.calls(), 0);
    assert_eq!(adapter.state(), AdapterState::Uninitialized);
}

#[tokio::test]
async fn test_numeric_string_port_is_coerced() {
    let connector = FakeConnector::new();
    let options = static_options().with_port("3307");
    let adapter = MySqlAdapter::with_connector(&options, None, connector.clone()).unwrap();

    adapter.initialize().await.unwrap();
    assert_eq!(connector.connections()[0].port, 3307);
}

#[test]
fn test_non_numeric_port_is_rejected() {
    let options = static_options().with_port("abc");
    let err = MySqlAdapter::with_connector(&options, None, FakeConnector::new()).unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_failed_ping_rebuilds_once_and_runs_statement_once() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    adapter.initialize().await.unwrap();

    connector.fail_next_pings(1);
    connector.script([Outcome::Rows(vec![row(json!({"ok": 1}))])]);

    let rows = adapter.query_all("SELECT 1 AS ok", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.statements(), 1);
    assert_eq!(adapter.stats().rebuilds, 1);
    assert!(db_adapter::db::DriverPool::is_closed(connector.pool(0).as_ref()));
}

#[tokio::test]
async fn test_disconnect_mid_statement_is_retried_on_new_pool() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    adapter.initialize().await.unwrap();

    connector.script([Outcome::Disconnect, Outcome::Write(WriteResult::new(1, 42))]);

    let result = adapter.query_write("UPDATE t SET a = 1", &[]).await.unwrap();
    assert_eq!(result, WriteResult::new(1, 42));
    assert_eq!(connector.statements(), 2);
    assert_eq!(connector.connects(), 2);
    assert_eq!(adapter.stats().generation, 2);
}

#[tokio::test]
async fn test_retry_is_bounded_to_one() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    connector.script([Outcome::Disconnect, Outcome::Disconnect, Outcome::Disconnect]);

    let err = adapter
        .query_write("UPDATE t SET a = 1", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Query { .. }), "got {:?}", err);
    assert_eq!(connector.statements(), 2);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_exec_batch_is_retried_after_disconnect() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    adapter.initialize().await.unwrap();

    connector.script([Outcome::Disconnect]);

    assert_ok!(adapter.exec_batch("CREATE TABLE t (a INT); INSERT INTO t VALUES (1)").await);
    assert_eq!(connector.statements(), 2);
    assert_eq!(connector.connects(), 2);
    assert_eq!(adapter.stats().rebuilds, 1);
    assert!(db_adapter::db::DriverPool::is_closed(connector.pool(0).as_ref()));
}

#[tokio::test]
async fn test_exec_batch_runs_once_on_healthy_pool() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);

    assert_ok!(adapter.exec_batch("SET @a = 1; SET @b = 2").await);
    assert_eq!(connector.statements(), 1);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_signer_failure_during_rebuild_surfaces_and_recovers() {
    let connector = FakeConnector::new();
    let signer = FakeSigner::new("TOK123");
    let adapter = MySqlAdapter::with_connector(
        &iam_options(Some("us-east-1")),
        Some(signer.clone() as Arc<dyn TokenSigner>),
        connector.clone(),
    )
    .unwrap();
    adapter.initialize().await.unwrap();

    connector.pool(0).kill();
    signer.fail_next(1);

    let err = adapter.query_all("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::AuthProvider { .. }), "got {:?}", err);
    assert_eq!(adapter.state(), AdapterState::Uninitialized);
    assert_eq!(signer.calls(), 2);
    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.statements(), 0);
    assert!(db_adapter::db::DriverPool::is_closed(connector.pool(0).as_ref()));

    assert_ok!(adapter.query_all("SELECT 1", &[]).await);
    assert_eq!(adapter.state(), AdapterState::Healthy);
    assert_eq!(signer.calls(), 3);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_statement_errors_are_not_retried() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    connector.script([Outcome::SyntaxError]);

    let err = adapter.query_all("SELEC * FROM users", &[]).await.unwrap_err();
    assert!(err.to_string().contains("error in your SQL syntax"));
    assert_eq!(connector.statements(), 1);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_close_rejects_later_operations() {
    let connector = FakeConnector::new();
    let adapter = adapter(&connector);
    adapter.initialize().await.unwrap();

    adapter.close().await;
    adapter.close().await;
    assert_eq!(adapter.state(), AdapterState::Closed);

    let err = adapter.query_all("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Closed));
    assert_err!(adapter.initialize().await);

    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.statements(), 0);
}

#[tokio::test]
async fn test_healthy_pool_is_pinged_but_not_rebuilt() {
    let connector = FakeConnector::new();
    let config = static_options().resolve().unwrap();
    let manager = PoolManager::new(config, CredentialProvider::static_only(), connector.clone());

    manager.initialize().await.unwrap();
    let pings_after_init = connector.pings();

    let first = manager.ensure_healthy().await.unwrap();
    let second = manager.ensure_healthy().await.unwrap();

    assert_eq!(first.generation(), second.generation());
    assert_eq!(connector.pings(), pings_after_init + 2);
    assert_eq!(connector.connects(), 1);
    assert_eq!(manager.stats().rebuilds, 0);
}

#[tokio::test]
async fn test_teardown_returns_to_uninitialized() {
    let connector = FakeConnector::new();
    let config = static_options().resolve().unwrap();
    let manager = PoolManager::new(config, CredentialProvider::static_only(), connector.clone());

    manager.initialize().await.unwrap();
    manager.teardown().await;
    assert_eq!(manager.state(), AdapterState::Uninitialized);
    assert!(db_adapter::db::DriverPool::is_closed(connector.pool(0).as_ref()));

    let lease = manager.ensure_healthy().await.unwrap();
    assert_eq!(lease.generation(), 2);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_describe_self_reports_engine() {
    let adapter = adapter(&FakeConnector::new());
    let info = serde_json::to_value(adapter.describe_self()).unwrap();
    assert_eq!(info["engineName"], "MySQL");
}
