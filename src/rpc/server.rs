//! RPC server (C6): decode -> dispatch -> encode loop over a framed
//! channel, with the registry's `_dir` auto-registered.

use crate::channel::SharedChannel;
use crate::codec::{self, Value, WireFormat};
use crate::error::{ApplicationError, ChannelError};
use crate::registry::{Registry, DIR_METHOD};
use crate::rpc::message::{Request, Response};
use tracing::{debug, warn};

pub struct RpcServer {
    channel: SharedChannel,
    registry: Registry,
    format: WireFormat,
}

impl RpcServer {
    pub fn new(channel: SharedChannel, registry: Registry, format: WireFormat) -> Self {
        Self {
            channel,
            registry,
            format,
        }
    }

    /// Drives the per-frame processing loop described in §4.6 until the
    /// channel closes. Each frame is dispatched on its own task so handler
    /// work can run concurrently; every send is still serialized inside
    /// `FramedChannel::send`, satisfying the rolling-key critical section.
    pub async fn run(self) {
        loop {
            let plaintext = match self.channel.recv().await {
                Ok(bytes) => bytes,
                Err(ChannelError::NotOpen(_)) => break,
                Err(e) => {
                    debug!(error = %e, "channel closed");
                    break;
                }
            };

            let channel = self.channel.clone();
            let registry = self.registry.clone();
            let format = self.format;
            tokio::spawn(async move {
                if let Err(e) = handle_frame(&channel, &registry, format, plaintext).await {
                    warn!(error = %e, "failed to send RPC response");
                }
            });
        }
    }
}

async fn handle_frame(
    channel: &SharedChannel,
    registry: &Registry,
    format: WireFormat,
    plaintext: Vec<u8>,
) -> Result<(), ChannelError> {
    let request_value = match codec::decode(&plaintext, format) {
        Ok(v) => v,
        Err(e) => {
            // Malformed serialized payload is a protocol error (fatal);
            // there is no reliable `id` to answer in-band.
            warn!(error = %e, "malformed RPC payload, closing connection");
            channel.close().await;
            return Ok(());
        }
    };

    let request = match Request::from_value(request_value) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed RPC tuple, closing connection");
            channel.close().await;
            return Ok(());
        }
    };

    let response = dispatch(registry, request).await;
    let encoded = codec::encode(&response.to_value(), format)
        .unwrap_or_else(|_| codec::encode(&fallback_error(response.id), format).unwrap());
    channel.send(&encoded).await
}

async fn dispatch(registry: &Registry, request: Request) -> Response {
    if request.method == DIR_METHOD {
        let names: Vec<Value> = registry.dir().into_iter().map(|n| Value::String(n.into())).collect();
        return Response::success(request.id, Value::Array(names));
    }

    match registry.get(&request.method) {
        Some(handler) => match handler.call(request.args, request.kwargs).await {
            Ok(value) => Response::success(request.id, value),
            Err(err) => Response::error(request.id, err),
        },
        None => Response::error(request.id, ApplicationError::unknown_method(&request.method)),
    }
}

fn fallback_error(id: i64) -> Value {
    Response::error(id, ApplicationError::new("InternalError", "failed to encode response")).to_value()
}
