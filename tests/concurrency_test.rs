//! Concurrent callers racing through reconnection and admission.

mod common;

use common::{FakeConnector, quiet_pool, static_options};
use db_adapter::config::PoolOptions;
use db_adapter::{DbError, MySqlAdapter};
use std::sync::Arc;
use std::time::Duration;

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_rebuild() {
    let connector = FakeConnector::new();
    let adapter = Arc::new(
        MySqlAdapter::with_connector(&static_options(), None, connector.clone()).unwrap(),
    );
    adapter.initialize().await.unwrap();
    connector.pool(0).kill();

    let mut handles = Vec::with_capacity(CALLERS);
    for _ in 0..CALLERS {
        let adapter = Arc::clone(&adapter);
        handles.push(tokio::spawn(
            async move { adapter.query_all("SELECT 1", &[]).await },
        ));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.statements(), CALLERS);
    assert_eq!(adapter.stats().rebuilds, 1);
    assert_eq!(adapter.stats().generation, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_queue_rejects_extra_callers() {
    let connector = FakeConnector::new();
    let options = static_options().with_pool(PoolOptions {
        connection_limit: Some(1),
        queue_limit: Some(1),
        ..quiet_pool()
    });
    let adapter = Arc::new(MySqlAdapter::with_connector(&options, None, connector.clone()).unwrap());
    adapter.initialize().await.unwrap();

    let gate = connector.hold_statements();
    let mut held = Vec::new();
    for _ in 0..2 {
        let adapter = Arc::clone(&adapter);
        held.push(tokio::spawn(
            async move { adapter.query_all("SELECT SLEEP(1)", &[]).await },
        ));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while connector.statements() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("both callers should reach the driver");

    let err = adapter.query_all("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Query { .. }), "got {:?}", err);
    assert!(err.to_string().contains("queue is full"));
    assert_eq!(connector.statements(), 2);

    gate.add_permits(2);
    for handle in held {
        handle.await.unwrap().unwrap();
    }

    gate.add_permits(1);
    adapter.query_all("SELECT 1", &[]).await.unwrap();
    assert_eq!(connector.statements(), 3);
}
