// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end coverage over a real `UnixStream`: handshake admission,
//! idle/resume, and a `run_sql_query` round trip through the validator
//! and `InMemoryBackend`, all driven through the public `Broker` API
//! rather than any internal test seam.

use std::sync::Arc;

use mcp_sql_broker::backend::memory::InMemoryBackend;
use mcp_sql_broker::broker::{socket, Broker, RuntimeLimits};
use mcp_sql_broker::handshake::{
    HandshakeRequest, HandshakeResponse, Status, MAGIC, REQUEST_LEN, RESPONSE_LEN, VERSION,
};
use mcp_sql_broker::validator::ir::{Expr, FromItem, FromSource, Query, SelectItem};
use mcp_sql_broker::validator::profile::{ConnectionProfile, DatabaseKind, SafetyPolicy};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

fn encode_handshake_request(req: &HandshakeRequest) -> [u8; REQUEST_LEN] {
    let mut raw = [0u8; REQUEST_LEN];
    raw[0..4].copy_from_slice(&req.magic.to_be_bytes());
    raw[4..6].copy_from_slice(&req.version.to_be_bytes());
    raw[6..8].copy_from_slice(&req.flags.to_be_bytes());
    raw[8..40].copy_from_slice(&req.resume_token);
    raw[40..72].copy_from_slice(&req.secret_token);
    raw
}

async fn do_handshake(stream: &mut UnixStream, secret: [u8; 32], resume_token: [u8; 32], resume: bool) -> HandshakeResponse {
    let req = HandshakeRequest {
        magic: MAGIC,
        version: VERSION,
        flags: if resume { 1 } else { 0 },
        resume_token,
        secret_token: secret,
    };
    stream
        .write_all(&encode_handshake_request(&req))
        .await
        .expect("write handshake request");
    let mut raw = [0u8; RESPONSE_LEN];
    stream.read_exact(&mut raw).await.expect("read handshake response");
    HandshakeResponse::decode(&raw).expect("decode handshake response")
}

async fn write_frame(stream: &mut UnixStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .expect("write frame length");
    stream.write_all(payload).await.expect("write frame payload");
}

async fn read_frame(stream: &mut UnixStream) -> Value {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read frame length");
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.expect("read frame payload");
    serde_json::from_slice(&buf).expect("frame payload is valid JSON")
}

fn select_id_from_users() -> Query {
    Query {
        select: vec![SelectItem {
            expr: Expr::column("u", "id"),
            is_star: false,
            alias: None,
        }],
        from: vec![FromItem {
            alias: Some("u".to_string()),
            source: FromSource::BaseRelation {
                schema: None,
                name: "users".to_string(),
            },
        }],
        joins: vec![],
        where_clause: None,
        group_by: vec![],
        having: None,
        order_by: vec![],
        limit: None,
        offset: None,
        distinct: false,
        ctes: vec![],
    }
}

fn test_profile() -> Arc<ConnectionProfile> {
    Arc::new(ConnectionProfile::new(
        "main".to_string(),
        DatabaseKind::Postgres,
        "localhost".to_string(),
        5432,
        "app".to_string(),
        "appdb".to_string(),
        None,
        SafetyPolicy::default(),
        vec![],
        vec![],
    ))
}

#[tokio::test]
async fn handshake_then_query_round_trips_end_to_end() {
    let dir = std::env::temp_dir().join(format!("mcp-sql-broker-it-query-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let socket_path = dir.join("ctl.sock");
    let listener = socket::bind(&socket_path).expect("bind control socket");

    let mut backend = InMemoryBackend::new();
    backend.register_profile(test_profile());
    backend.register_fixture("main", "SELECT id FROM users", select_id_from_users());
    backend.seed_rows(
        "main",
        "users",
        vec![
            vec![("id".to_string(), Some("1".to_string()))],
            vec![("id".to_string(), Some("2".to_string()))],
        ],
    );

    let secret = [42u8; 32];
    let mut broker = Broker::new(Arc::new(backend), secret, listener, RuntimeLimits::default());
    tokio::spawn(async move {
        broker.run().await;
    });

    let mut client = UnixStream::connect(&socket_path).await.expect("connect");
    let handshake = do_handshake(&mut client, secret, [0u8; 32], false).await;
    assert_eq!(handshake.status, Status::Ok);

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {
            "name": "run_sql_query",
            "arguments": { "connectionName": "main", "query": "SELECT id FROM users" }
        }
    });
    write_frame(&mut client, request.to_string().as_bytes()).await;

    let response = read_frame(&mut client).await;
    assert_eq!(response["result"]["rowcount"], json!(2));
    assert_eq!(response["result"]["rows"][0][0], json!("1"));
    assert_eq!(response["result"]["columns"][0]["name"], json!("id"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn unknown_connection_name_reports_a_resource_error() {
    let dir = std::env::temp_dir().join(format!("mcp-sql-broker-it-unknown-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let socket_path = dir.join("ctl.sock");
    let listener = socket::bind(&socket_path).expect("bind control socket");

    let backend = InMemoryBackend::new();
    let secret = [9u8; 32];
    let mut broker = Broker::new(Arc::new(backend), secret, listener, RuntimeLimits::default());
    tokio::spawn(async move {
        broker.run().await;
    });

    let mut client = UnixStream::connect(&socket_path).await.expect("connect");
    let handshake = do_handshake(&mut client, secret, [0u8; 32], false).await;
    assert_eq!(handshake.status, Status::Ok);

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {
            "name": "run_sql_query",
            "arguments": { "connectionName": "ghost", "query": "SELECT 1" }
        }
    });
    write_frame(&mut client, request.to_string().as_bytes()).await;

    let response = read_frame(&mut client).await;
    assert_eq!(response["error"]["code"], json!(-32001));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn wrong_shared_secret_is_rejected_at_handshake() {
    let dir = std::env::temp_dir().join(format!("mcp-sql-broker-it-badsecret-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let socket_path = dir.join("ctl.sock");
    let listener = socket::bind(&socket_path).expect("bind control socket");

    let backend = InMemoryBackend::new();
    let secret = [1u8; 32];
    let mut broker = Broker::new(Arc::new(backend), secret, listener, RuntimeLimits::default());
    tokio::spawn(async move {
        broker.run().await;
    });

    let mut client = UnixStream::connect(&socket_path).await.expect("connect");
    let handshake = do_handshake(&mut client, [2u8; 32], [0u8; 32], false).await;
    assert_eq!(handshake.status, Status::BadRequest);

    let _ = std::fs::remove_dir_all(&dir);
}
