// tests/storage_node_test.rs

//! End-to-end tests against a real `pennkv-node` process, driven over raw
//! TCP the way a client or the admin console would, following the shape of
//! integration tests that drive a real running process instead of poking
//! internals directly.

use std::time::Duration;

use bytes::Bytes;
use pennkv::config::{KeyRange, NodeConfig, NodeRole};
use pennkv::core::admin::client;
use pennkv::core::errors::KvError;
use pennkv::core::protocol::command::WireCommand;
use pennkv::core::protocol::oneshot::send_request;

async fn spawn_standalone_node(port: u16) -> String {
    let addr = format!("127.0.0.1:{port}");
    let config = NodeConfig {
        host: "127.0.0.1".to_string(),
        port,
        ranges: vec![KeyRange { start: "a".to_string(), end: "z".to_string() }],
        role: NodeRole::Primary { secondary_addrs: vec![] },
        persistence_dir: None,
        coordinator_addr: None,
        prepare_timeout_ms: 2_000,
        coordinator_ping_interval_ms: 2_000,
        log_level: "error".to_string(),
    };
    tokio::spawn(pennkv::server::node_server::run(config));
    tokio::time::sleep(Duration::from_millis(100)).await;
    addr
}

#[tokio::test]
async fn put_then_get_round_trips_a_value() {
    let addr = spawn_standalone_node(18101).await;

    let put = WireCommand::PutValue {
        row: Bytes::from_static(b"alice"),
        col: Bytes::from_static(b"age"),
        value: Bytes::from_static(b"30"),
    };
    send_request(&addr, &put.to_request()).await.unwrap().into_result().unwrap();

    let value = client::get_value(&addr, "alice", "age").await.unwrap();
    assert_eq!(value, Bytes::from_static(b"30"));
}

#[tokio::test]
async fn get_row_lists_every_column() {
    let addr = spawn_standalone_node(18102).await;

    for (col, val) in [("age", "30"), ("city", "philadelphia")] {
        let put = WireCommand::PutValue {
            row: Bytes::from_static(b"bob"),
            col: Bytes::copy_from_slice(col.as_bytes()),
            value: Bytes::copy_from_slice(val.as_bytes()),
        };
        send_request(&addr, &put.to_request()).await.unwrap().into_result().unwrap();
    }

    let mut cols = client::get_row(&addr, "bob").await.unwrap();
    cols.sort();
    assert_eq!(cols, vec!["age".to_string(), "city".to_string()]);
}

#[tokio::test]
async fn get_all_rows_lists_every_row_the_node_holds() {
    let addr = spawn_standalone_node(18103).await;

    for row in ["carol", "dave"] {
        let put = WireCommand::PutValue {
            row: Bytes::copy_from_slice(row.as_bytes()),
            col: Bytes::from_static(b"x"),
            value: Bytes::from_static(b"1"),
        };
        send_request(&addr, &put.to_request()).await.unwrap().into_result().unwrap();
    }

    let mut rows = client::get_all_rows(&addr).await.unwrap();
    rows.sort();
    assert_eq!(rows, vec!["carol".to_string(), "dave".to_string()]);
}

#[tokio::test]
async fn cput_mismatch_is_rejected_and_leaves_the_value_untouched() {
    let addr = spawn_standalone_node(18104).await;

    let put = WireCommand::PutValue {
        row: Bytes::from_static(b"erin"),
        col: Bytes::from_static(b"balance"),
        value: Bytes::from_static(b"100"),
    };
    send_request(&addr, &put.to_request()).await.unwrap().into_result().unwrap();

    let cput = WireCommand::CondPutValue {
        row: Bytes::from_static(b"erin"),
        col: Bytes::from_static(b"balance"),
        expected: Bytes::from_static(b"999"),
        new_value: Bytes::from_static(b"200"),
    };
    let reply = send_request(&addr, &cput.to_request()).await.unwrap();
    assert!(matches!(reply.into_result(), Err(KvError::WriteFailed(reason)) if reason.contains("COND_MISMATCH")));

    let value = client::get_value(&addr, "erin", "balance").await.unwrap();
    assert_eq!(value, Bytes::from_static(b"100"));
}

#[tokio::test]
async fn delete_row_removes_every_column() {
    let addr = spawn_standalone_node(18105).await;

    let put = WireCommand::PutValue {
        row: Bytes::from_static(b"frank"),
        col: Bytes::from_static(b"x"),
        value: Bytes::from_static(b"1"),
    };
    send_request(&addr, &put.to_request()).await.unwrap().into_result().unwrap();

    let delr = WireCommand::DeleteRow { row: Bytes::from_static(b"frank") };
    send_request(&addr, &delr.to_request()).await.unwrap().into_result().unwrap();

    let err = client::get_value(&addr, "frank", "x").await.unwrap_err();
    assert!(matches!(err, KvError::WriteFailed(reason) if reason.contains("ROW_MISSING")));
}

#[tokio::test]
async fn writes_against_a_never_seen_row_report_row_missing() {
    let addr = spawn_standalone_node(18107).await;

    let cput = WireCommand::CondPutValue {
        row: Bytes::from_static(b"ghost"),
        col: Bytes::from_static(b"balance"),
        expected: Bytes::from_static(b"100"),
        new_value: Bytes::from_static(b"200"),
    };
    let reply = send_request(&addr, &cput.to_request()).await.unwrap();
    assert!(matches!(reply.into_result(), Err(KvError::WriteFailed(reason)) if reason.contains("ROW_MISSING")));

    let delr = WireCommand::DeleteRow { row: Bytes::from_static(b"ghost") };
    let reply = send_request(&addr, &delr.to_request()).await.unwrap();
    assert!(matches!(reply.into_result(), Err(KvError::WriteFailed(reason)) if reason.contains("ROW_MISSING")));

    let rnmr = WireCommand::RenameRow { old: Bytes::from_static(b"ghost"), new: Bytes::from_static(b"ghost2") };
    let reply = send_request(&addr, &rnmr.to_request()).await.unwrap();
    assert!(matches!(reply.into_result(), Err(KvError::WriteFailed(reason)) if reason.contains("ROW_MISSING")));

    // None of the rejected writes should have left a ghost row behind.
    let rows = client::get_all_rows(&addr).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn killed_node_rejects_client_traffic_until_woken() {
    let addr = spawn_standalone_node(18106).await;

    client::kill(&addr).await.unwrap();

    let err = client::get_all_rows(&addr).await.unwrap_err();
    assert!(matches!(err, KvError::WriteFailed(reason) if reason.contains("NODE_DOWN")));

    client::wake(&addr).await.unwrap();
    let rows = client::get_all_rows(&addr).await.unwrap();
    assert!(rows.is_empty());
}
