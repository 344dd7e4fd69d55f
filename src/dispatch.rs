//! Connection dispatcher (C5): peeks the first 3 bytes of an accepted TCP
//! stream and routes to the HTTP sub-surface or the crypto-RPC channel.

use crate::channel::{FramedChannel, MAGIC_CRS, MAGIC_LEN, MAGIC_RPC};
use crate::codec::WireFormat;
use crate::http::HttpHandler;
use crate::registry::Registry;
use crate::rpc::server::RpcServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

const MAGIC_GET: [u8; MAGIC_LEN] = *b"GET";

pub struct ServerContext {
    pub secret_key: [u8; 16],
    pub registry: Registry,
    pub wire_format: WireFormat,
    pub session_lifetime: Option<Duration>,
    pub http_handler: Option<Arc<dyn HttpHandler>>,
}

/// Consumes the magic, then either serves one HTTP request or hands the
/// socket to the framed channel in server mode and runs the RPC loop.
pub async fn serve_connection(mut stream: TcpStream, ctx: Arc<ServerContext>) {
    let mut magic = [0u8; MAGIC_LEN];
    if stream.read_exact(&mut magic).await.is_err() {
        return;
    }

    if magic == MAGIC_GET {
        if let Err(e) = crate::http::serve_one_request(stream, ctx.http_handler.clone()).await {
            debug!(error = %e, "http handler error");
        }
        return;
    }

    if magic != MAGIC_RPC && magic != MAGIC_CRS {
        warn!(?magic, "unrecognized connection magic, closing");
        return;
    }

    let channel = match FramedChannel::handshake_server(stream, ctx.secret_key, ctx.session_lifetime).await
    {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "handshake failed");
            return;
        }
    };

    let server = RpcServer::new(Arc::new(channel), ctx.registry.clone(), ctx.wire_format);
    server.run().await;
}
