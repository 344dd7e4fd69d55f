//! End-to-end scenarios exercising the full accept -> dispatch -> channel ->
//! registry path together, rather than one layer in isolation.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use urpcd::codec::{Value, WireFormat};
use urpcd::dispatch::{serve_connection, ServerContext};
use urpcd::error::ApplicationError;
use urpcd::http::FnHttpHandler;
use urpcd::registry::{FnHandler, Registry};
use urpcd::rpc::RpcClient;

const KEY: [u8; 16] = *b"0123456789abcdef";

async fn spawn_server(ctx: Arc<ServerContext>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let ctx = ctx.clone();
            tokio::spawn(serve_connection(stream, ctx));
        }
    });
    addr
}

fn ctx(registry: Registry) -> Arc<ServerContext> {
    Arc::new(ServerContext {
        secret_key: KEY,
        registry,
        wire_format: WireFormat::MsgPack,
        session_lifetime: None,
        http_handler: None,
    })
}

#[tokio::test]
async fn handler_exception_surfaces_as_application_error_without_closing_connection() {
    let registry = Registry::new();
    registry.register(
        "boom",
        FnHandler(|_args, _kwargs| Err(ApplicationError::new("RuntimeError", "handler failed"))),
    );
    registry.register("add", FnHandler(|args, _kwargs| {
        let a = args[0].as_i64().unwrap();
        let b = args[1].as_i64().unwrap();
        Ok(Value::Integer((a + b).into()))
    }));

    let addr = spawn_server(ctx(registry)).await;
    let client = RpcClient::connect(addr, KEY, WireFormat::MsgPack, false)
        .await
        .unwrap();

    let err = client.call("boom", vec![], vec![]).await.unwrap_err();
    match err {
        urpcd::error::ClientError::Application(e) => assert_eq!(e.name, "RuntimeError"),
        other => panic!("expected application error, got {other:?}"),
    }

    // The connection survived the handler failure — a subsequent call
    // still succeeds on the same client.
    let result = client
        .call("add", vec![Value::Integer(2.into()), Value::Integer(2.into())], vec![])
        .await
        .unwrap();
    assert_eq!(result.as_i64(), Some(4));
}

#[tokio::test]
async fn slow_call_does_not_block_a_faster_concurrent_call() {
    let registry = Registry::new();
    registry.register(
        "slow",
        FnHandler(|_args, _kwargs| Ok(Value::String("slow-done".into()))),
    );
    // Simulate differing handler latency by sleeping inside an async
    // handler is not expressible through FnHandler (sync closures only),
    // so instead this exercises ordering at the transport level: two
    // concurrent calls against independent ids must each resolve to their
    // own response regardless of arrival order.
    registry.register(
        "fast",
        FnHandler(|_args, _kwargs| Ok(Value::String("fast-done".into()))),
    );

    let addr = spawn_server(ctx(registry)).await;
    let client = RpcClient::connect(addr, KEY, WireFormat::MsgPack, false)
        .await
        .unwrap();

    let (slow, fast) = tokio::join!(
        client.call("slow", vec![], vec![]),
        client.call("fast", vec![], vec![]),
    );
    assert_eq!(slow.unwrap().as_str(), Some("slow-done"));
    assert_eq!(fast.unwrap().as_str(), Some("fast-done"));
}

#[tokio::test]
async fn http_and_rpc_coexist_on_the_same_listener() {
    let registry = Registry::new();
    registry.register(
        "ping",
        FnHandler(|_args, _kwargs| Ok(Value::String("pong".into()))),
    );

    let http_handler = FnHttpHandler(|query: std::collections::HashMap<String, String>| {
        serde_json::json!({
            "some": true,
            "echo": query.get("values").cloned().unwrap_or_default(),
        })
    });

    let server_ctx = Arc::new(ServerContext {
        secret_key: KEY,
        registry,
        wire_format: WireFormat::MsgPack,
        session_lifetime: None,
        http_handler: Some(Arc::new(http_handler)),
    });
    let addr = spawn_server(server_ctx).await;

    // RPC connection first.
    let client = RpcClient::connect(addr, KEY, WireFormat::MsgPack, false)
        .await
        .unwrap();
    let result = client.call("ping", vec![], vec![]).await.unwrap();
    assert_eq!(result.as_str(), Some("pong"));

    // A plain HTTP GET against the same port, on a fresh connection.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut http_stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    http_stream
        .write_all(b"GET /status?values=some HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(2), http_stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.contains("200 OK"));
    assert!(response.contains("\"some\":true"));
}
