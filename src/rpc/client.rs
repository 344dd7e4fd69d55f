//! RPC client (C7): connect, handshake, `_dir` discovery, concurrent
//! correlated calls via a pending-table drained by a single receive-loop
//! task, and an optional reconnect-once policy.
//!
//! Grounded in the original source's asynchronous client variant (the one
//! with a real `cb_id`/`callbacks` correlation table), generalized onto
//! `tokio::sync::oneshot` waiters instead of hand-rolled futures.

use crate::channel::{FramedChannel, SharedChannel, MAGIC_CRS};
use crate::codec::{self, Value, WireFormat};
use crate::error::{ChannelError, ClientError};
use crate::registry::DIR_METHOD;
use crate::rpc::message::{Request, Response, ResponsePayload};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type PendingTable = Mutex<HashMap<i64, oneshot::Sender<Result<Value, ClientError>>>>;

pub struct RpcClient {
    addr: SocketAddr,
    secret_key: [u8; 16],
    format: WireFormat,
    reconnect_enabled: bool,
    channel: Mutex<SharedChannel>,
    next_id: AtomicI64,
    pending: PendingTable,
    methods: Mutex<Vec<String>>,
    /// Set once in `connect`, used by `reconnect` to re-spawn the receive
    /// loop without needing `Arc<Self>` threaded through every call site.
    self_weak: Mutex<Option<Weak<Self>>>,
}

impl RpcClient {
    /// Connects, performs the client-side handshake, and populates the
    /// discovered method list via `_dir` (with reconnect disabled during
    /// that call, to avoid recursing into a reconnect loop before the
    /// client is fully constructed).
    pub async fn connect(
        addr: SocketAddr,
        secret_key: [u8; 16],
        format: WireFormat,
        reconnect_enabled: bool,
    ) -> Result<Arc<Self>, ClientError> {
        let channel = Self::open_channel(addr, secret_key).await?;
        let client = Arc::new(Self {
            addr,
            secret_key,
            format,
            reconnect_enabled,
            channel: Mutex::new(Arc::new(channel)),
            next_id: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            methods: Mutex::new(Vec::new()),
            self_weak: Mutex::new(None),
        });
        *client.self_weak.lock().unwrap() = Some(Arc::downgrade(&client));
        client.clone().spawn_receive_loop();

        let dir_value = client.call_once(DIR_METHOD, vec![], vec![]).await?;
        let names = match dir_value {
            // `_dir` lists its own name alongside every bound procedure;
            // callers only want the latter (E2's "bound wrappers for add, sub").
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .filter(|name| name != DIR_METHOD)
                .collect(),
            _ => Vec::new(),
        };
        *client.methods.lock().unwrap() = names;

        Ok(client)
    }

    async fn open_channel(addr: SocketAddr, secret_key: [u8; 16]) -> Result<FramedChannel, ClientError> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(ChannelError::from)?;
        FramedChannel::handshake_client(stream, secret_key, &MAGIC_CRS)
            .await
            .map_err(ClientError::from)
    }

    fn channel(&self) -> SharedChannel {
        self.channel.lock().unwrap().clone()
    }

    fn spawn_receive_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let channel = self.channel();
                match channel.recv().await {
                    Ok(bytes) => self.handle_incoming(bytes),
                    Err(e) => {
                        debug!(error = %e, "client receive loop ending");
                        self.fail_all_pending();
                        break;
                    }
                }
            }
        });
    }

    fn handle_incoming(&self, bytes: Vec<u8>) {
        let value = match codec::decode(&bytes, self.format) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping malformed response");
                return;
            }
        };
        let response = match Response::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "dropping malformed response tuple");
                return;
            }
        };
        // A missing entry means the waiter was already cancelled; per
        // property 8, a late-arriving response for it is silently dropped.
        if let Some(tx) = self.pending.lock().unwrap().remove(&response.id) {
            let result = match response.payload {
                ResponsePayload::Success(v) => Ok(v),
                ResponsePayload::Error(e) => Err(ClientError::Application(e)),
            };
            let _ = tx.send(result);
        }
    }

    /// Fails every in-flight waiter with `ClientError::Disconnected` — kept
    /// distinct from `ClientError::Application` so `call` can tell a broken
    /// connection apart from a genuine application-level error and trigger
    /// reconnect only for the former.
    fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ClientError::Disconnected));
        }
    }

    /// The discovered procedure names from the last successful `_dir` call.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    /// Invokes `name(args, kwargs)` on the server. `reset`/`soft_reset` are
    /// fire-and-forget: the frame is sent, the local channel is closed, and
    /// this returns `Ok(Value::Nil)` without waiting for any reply.
    pub async fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
    ) -> Result<Value, ClientError> {
        if name == "reset" || name == "soft_reset" {
            return self.fire_and_forget(name, args, kwargs).await;
        }

        match self.call_once(name, args.clone(), kwargs.clone()).await {
            Ok(v) => Ok(v),
            Err(ClientError::Channel(_) | ClientError::Disconnected) if self.reconnect_enabled => {
                self.reconnect().await?;
                self.call_once(name, args, kwargs).await
            }
            Err(e) => Err(e),
        }
    }

    /// One attempt, no reconnect. Used directly by `_dir` population (where
    /// reconnecting would recurse) and as the first attempt of `call`.
    async fn call_once(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id,
            method: name.to_string(),
            args,
            kwargs,
        };
        let encoded = codec::encode(&request.to_value(), self.format)
            .map_err(|e| ClientError::Codec(e))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if let Err(e) = self.channel().send(&encoded).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(client_err)) => Err(client_err),
            Err(_) => Err(ClientError::Cancelled),
        }
    }

    async fn fire_and_forget(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id,
            method: name.to_string(),
            args,
            kwargs,
        };
        let encoded = codec::encode(&request.to_value(), self.format)?;
        let channel = self.channel();
        let _ = channel.send(&encoded).await;
        channel.close().await;
        Ok(Value::Nil)
    }

    /// Replaces the channel and restarts the receive loop on it — without
    /// the re-spawn, the only task draining responses would have ended
    /// with the old channel's error and every subsequent call would hang
    /// waiting on a response that nothing reads.
    async fn reconnect(&self) -> Result<(), ClientError> {
        self.fail_all_pending();
        let new_channel = Self::open_channel(self.addr, self.secret_key).await?;
        *self.channel.lock().unwrap() = Arc::new(new_channel);

        if let Some(client) = self.self_weak.lock().unwrap().as_ref().and_then(Weak::upgrade) {
            client.spawn_receive_loop();
        }
        Ok(())
    }

    /// Drops a pending call without waiting for its response. Per
    /// property 8, a later-arriving response for this id is dropped
    /// silently by the receive loop once the entry is gone.
    pub fn cancel(&self, id: i64) {
        self.pending.lock().unwrap().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FramedChannel as Channel;
    use crate::registry::{FnHandler, Registry};
    use crate::rpc::server::RpcServer;
    use tokio::net::TcpListener;

    async fn spawn_server(key: [u8; 16], registry: Registry) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Ok(channel) = Channel::handshake_server(stream, key, None).await {
                        let server = RpcServer::new(Arc::new(channel), registry, WireFormat::MsgPack);
                        server.run().await;
                    }
                });
            }
        });
        addr
    }

    fn add_sub_registry() -> Registry {
        let registry = Registry::new();
        registry.register(
            "add",
            FnHandler(|args, _| {
                let a = args[0].as_i64().unwrap();
                let b = args[1].as_i64().unwrap();
                Ok(Value::Integer((a + b).into()))
            }),
        );
        registry.register(
            "sub",
            FnHandler(|args, _| {
                let a = args[0].as_i64().unwrap();
                let b = args[1].as_i64().unwrap();
                Ok(Value::Integer((a - b).into()))
            }),
        );
        registry
    }

    #[tokio::test]
    async fn connect_populates_dir_and_calls_succeed() {
        let key = *b"0123456789abcdef";
        let addr = spawn_server(key, add_sub_registry()).await;
        let client = RpcClient::connect(addr, key, WireFormat::MsgPack, false)
            .await
            .unwrap();

        let mut methods = client.methods();
        methods.sort();
        assert_eq!(methods, vec!["add".to_string(), "sub".to_string()]);

        let result = client.call("add", vec![Value::Integer(2.into()), Value::Integer(3.into())], vec![])
            .await
            .unwrap();
        assert_eq!(result.as_i64(), Some(5));
    }

    #[tokio::test]
    async fn concurrent_calls_correlate_by_id() {
        let key = *b"0123456789abcdef";
        let addr = spawn_server(key, add_sub_registry()).await;
        let client = RpcClient::connect(addr, key, WireFormat::MsgPack, false)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            client.call("add", vec![Value::Integer(10.into()), Value::Integer(1.into())], vec![]),
            client.call("sub", vec![Value::Integer(10.into()), Value::Integer(1.into())], vec![]),
        );
        assert_eq!(a.unwrap().as_i64(), Some(11));
        assert_eq!(b.unwrap().as_i64(), Some(9));
    }

    #[tokio::test]
    async fn reconnect_recovers_after_server_drops_connection() {
        let key = *b"0123456789abcdef";
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection: answer exactly the `_dir` call issued by
            // `connect`, then close — simulating the peer resetting mid-flight.
            let (stream, _) = listener.accept().await.unwrap();
            let channel = Arc::new(Channel::handshake_server(stream, key, None).await.unwrap());
            let registry = add_sub_registry();

            let plaintext = channel.recv().await.unwrap();
            let request = crate::rpc::message::Request::from_value(
                codec::decode(&plaintext, WireFormat::MsgPack).unwrap(),
            )
            .unwrap();
            let names: Vec<Value> = registry
                .dir()
                .into_iter()
                .map(|n| Value::String(n.into()))
                .collect();
            let response = crate::rpc::message::Response::success(request.id, Value::Array(names));
            let encoded = codec::encode(&response.to_value(), WireFormat::MsgPack).unwrap();
            channel.send(&encoded).await.unwrap();
            channel.close().await;

            // Second connection, reached only via the client's reconnect: a
            // normal server loop that actually answers `add`.
            let (stream, _) = listener.accept().await.unwrap();
            if let Ok(channel) = Channel::handshake_server(stream, key, None).await {
                let server = RpcServer::new(Arc::new(channel), registry, WireFormat::MsgPack);
                server.run().await;
            }
        });

        let client = RpcClient::connect(addr, key, WireFormat::MsgPack, true)
            .await
            .unwrap();
        let result = client
            .call("add", vec![Value::Integer(2.into()), Value::Integer(3.into())], vec![])
            .await
            .unwrap();
        assert_eq!(result.as_i64(), Some(5));
    }

    #[tokio::test]
    async fn unknown_method_surfaces_application_error() {
        let key = *b"0123456789abcdef";
        let addr = spawn_server(key, Registry::new()).await;
        let client = RpcClient::connect(addr, key, WireFormat::MsgPack, false)
            .await
            .unwrap();

        let err = client.call("nope", vec![], vec![]).await.unwrap_err();
        match err {
            ClientError::Application(e) => assert_eq!(e.name, "KeyError"),
            other => panic!("expected application error, got {other:?}"),
        }
    }
}
