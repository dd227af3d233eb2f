//! Option builders shared by the integration tests.

#![allow(dead_code)]

pub use db_adapter::db::testing::{FakeConnector, FakePool, FakeSigner, Outcome};

use db_adapter::config::{AdapterOptions, PoolOptions};

/// Pool options used by tests: no background keep-alive traffic.
pub fn quiet_pool() -> PoolOptions {
    PoolOptions {
        enable_keep_alive: Some(false),
        ..PoolOptions::default()
    }
}

/// `{host: "db.example.com", database: "app", user: "root", password: "x"}`
pub fn static_options() -> AdapterOptions {
    AdapterOptions::new("db.example.com", "app")
        .with_user("root")
        .with_password("x")
        .with_pool(quiet_pool())
}

pub fn iam_options(region: Option<&str>) -> AdapterOptions {
    AdapterOptions::new("db.example.com", "app")
        .with_user("iam_user")
        .with_aws_iam(region)
        .with_pool(quiet_pool())
}
