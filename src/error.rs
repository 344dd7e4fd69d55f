//! Typed error taxonomy for the channel, codec, and RPC layers.
//!
//! Fatal errors (transport/crypto/protocol) never cross the wire; they
//! close the connection. Application errors are the only kind carried
//! in-band, as `[error_name, error_message]` inside a valid frame.

use thiserror::Error;

/// Errors that close the framed crypto channel (C4). Every variant is
/// fatal: the connection is not reusable after one of these surfaces.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before a full message was read")]
    ShortRead,

    #[error("handshake authentication tag mismatch")]
    HandshakeAuthMismatch,

    #[error("handshake confirmation bytes did not equal \"OK\"")]
    BadHandshakeAck,

    #[error("frame authentication tag mismatch")]
    FrameAuthMismatch,

    #[error("session expired")]
    SessionExpired,

    #[error("padding byte out of range")]
    BadPadding,

    #[error("unrecognized connection magic")]
    BadMagic,

    #[error("channel is not open (state: {0})")]
    NotOpen(&'static str),
}

impl From<crate::frame::PaddingError> for ChannelError {
    fn from(_: crate::frame::PaddingError) -> Self {
        ChannelError::BadPadding
    }
}

/// Errors from encoding or decoding the MsgPack/JSON wire value (C3).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(String),

    #[error("msgpack decode error: {0}")]
    MsgPackDecode(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoded RPC tuple had the wrong shape: {0}")]
    MalformedTuple(String),
}

/// An application-level error, carried in-band inside a response frame.
/// Distinct from [`ChannelError`]/[`CodecError`], which are always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct ApplicationError {
    pub name: String,
    pub message: String,
}

impl ApplicationError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new("KeyError", method)
    }
}

/// Errors surfaced to an RPC client caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("call was cancelled")]
    Cancelled,

    #[error("connection lost")]
    Disconnected,

    #[error("reconnect failed: {0}")]
    ReconnectFailed(String),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Application(#[from] ApplicationError),
}

/// Crate-level error for the binary surface (CLI, dispatcher, management
/// procedures) — library modules return the narrower types above, and the
/// binary composes them behind `anyhow::Context` as the teacher does.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}
