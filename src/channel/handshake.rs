//! The 32-byte nonce exchange plus 2-byte `"OK"` confirmation described in
//! §4.4. Lives apart from `mod.rs` so the byte-level protocol can be read
//! and tested independently of the `FramedChannel` state it feeds.

use crate::crypto::hash;
use crate::error::ChannelError;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const MAGIC_LEN: usize = 3;
pub const MAGIC_RPC: [u8; MAGIC_LEN] = *b"RPC";
pub const MAGIC_CRS: [u8; MAGIC_LEN] = *b"CRS";
pub const HANDSHAKE_ACK: [u8; 2] = *b"OK";

fn random_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

async fn send_nonce(stream: &mut TcpStream, key: &[u8; 16], nonce: &[u8; 16]) -> Result<(), ChannelError> {
    let auth = hash::hash(&[key, nonce]);
    stream.write_all(nonce).await?;
    stream.write_all(&auth).await?;
    stream.flush().await?;
    Ok(())
}

async fn recv_nonce(stream: &mut TcpStream, key: &[u8; 16]) -> Result<[u8; 16], ChannelError> {
    let mut buf = [0u8; 32];
    stream.read_exact(&mut buf).await?;
    let nonce: [u8; 16] = buf[..16].try_into().unwrap();
    let auth = &buf[16..];
    let expected = hash::hash(&[key, &nonce]);
    if !hash::constant_time_eq(auth, &expected) {
        return Err(ChannelError::HandshakeAuthMismatch);
    }
    Ok(nonce)
}

/// Server role: returns `(tx_nonce, rx_nonce)` — `tx_nonce` is this side's
/// own freshly generated nonce (becomes `tx_key`), `rx_nonce` is the peer's
/// (becomes `rx_key`). Assumes the connection magic has already been
/// consumed by the dispatcher.
pub async fn server_side(
    stream: &mut TcpStream,
    key: &[u8; 16],
) -> Result<([u8; 16], [u8; 16]), ChannelError> {
    let tx_nonce = random_nonce();
    send_nonce(stream, key, &tx_nonce).await?;
    let rx_nonce = recv_nonce(stream, key).await?;
    stream.write_all(&HANDSHAKE_ACK).await?;
    stream.flush().await?;
    Ok((tx_nonce, rx_nonce))
}

/// Client role: sends the magic itself (unlike the server, which is routed
/// to by a dispatcher that already consumed it), then mirrors the nonce
/// exchange from the initiating side.
pub async fn client_side(
    stream: &mut TcpStream,
    key: &[u8; 16],
    magic: &[u8; MAGIC_LEN],
) -> Result<([u8; 16], [u8; 16]), ChannelError> {
    stream.write_all(magic).await?;
    stream.flush().await?;

    let rx_nonce = recv_nonce(stream, key).await?;
    let tx_nonce = random_nonce();
    send_nonce(stream, key, &tx_nonce).await?;

    let mut ack = [0u8; 2];
    stream.read_exact(&mut ack).await?;
    if ack != HANDSHAKE_ACK {
        return Err(ChannelError::BadHandshakeAck);
    }

    Ok((tx_nonce, rx_nonce))
}
