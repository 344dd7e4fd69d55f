//! Framed crypto channel (C4): handshake, per-direction rolling-key
//! framing, authentication, and padding on top of a single TCP stream.
//!
//! The state machine is `INIT -> HANDSHAKING -> OPEN -> CLOSED`. A
//! [`FramedChannel`] only exists once handshaking has already succeeded —
//! `handshake_server`/`handshake_client` either return an open channel or
//! consume the socket and fail, so `INIT`/`HANDSHAKING` are not separately
//! observable states on a constructed value. `OPEN`/`CLOSED` are: every
//! `send`/`recv` checks the state first, and any failure latches it closed.

mod handshake;

use crate::crypto::{aes_cbc, hash};
use crate::error::ChannelError;
use crate::frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub use handshake::{HANDSHAKE_ACK, MAGIC_CRS, MAGIC_LEN, MAGIC_RPC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

struct ReadSide {
    read: OwnedReadHalf,
    rx_key: [u8; 16],
}

struct WriteSide {
    write: OwnedWriteHalf,
    tx_key: [u8; 16],
}

/// One end of an authenticated, encrypted framed channel.
pub struct FramedChannel {
    secret_key: [u8; 16],
    reader: Mutex<ReadSide>,
    writer: Mutex<WriteSide>,
    closed: AtomicBool,
    lifetime: Option<Duration>,
    expiry: Mutex<Option<Instant>>,
    on_eof: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FramedChannel {
    fn new(
        stream: TcpStream,
        secret_key: [u8; 16],
        tx_key: [u8; 16],
        rx_key: [u8; 16],
        lifetime: Option<Duration>,
    ) -> Self {
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let expiry = lifetime.map(|l| Instant::now() + l);
        Self {
            secret_key,
            reader: Mutex::new(ReadSide { read, rx_key }),
            writer: Mutex::new(WriteSide { write, tx_key }),
            closed: AtomicBool::new(false),
            lifetime,
            expiry: Mutex::new(expiry),
            on_eof: Mutex::new(None),
        }
    }

    /// Server-side handshake. Assumes the 3-byte magic has already been
    /// consumed by the connection dispatcher (C5); the cryptographic
    /// transcript does not include it.
    pub async fn handshake_server(
        mut stream: TcpStream,
        secret_key: [u8; 16],
        lifetime: Option<Duration>,
    ) -> Result<Self, ChannelError> {
        let (tx_nonce, rx_nonce) = handshake::server_side(&mut stream, &secret_key).await?;
        Ok(Self::new(stream, secret_key, tx_nonce, rx_nonce, lifetime))
    }

    /// Client-side handshake. Sends the 3-byte magic itself (`"CRS"` by
    /// default, per the specification's preference; pass `MAGIC_RPC` for
    /// legacy servers).
    pub async fn handshake_client(
        mut stream: TcpStream,
        secret_key: [u8; 16],
        magic: &[u8; MAGIC_LEN],
    ) -> Result<Self, ChannelError> {
        let (tx_nonce, rx_nonce) = handshake::client_side(&mut stream, &secret_key, magic).await?;
        Ok(Self::new(stream, secret_key, tx_nonce, rx_nonce, None))
    }

    pub fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::Acquire) {
            ChannelState::Closed
        } else {
            ChannelState::Open
        }
    }

    /// Registers a hook invoked exactly once, the first time this channel
    /// transitions to `CLOSED` (EOF or any fatal error).
    pub async fn set_on_eof(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_eof.lock().await = Some(Box::new(hook));
    }

    async fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(hook) = self.on_eof.lock().await.take() {
                hook();
            }
        }
    }

    pub async fn close(&self) {
        self.mark_closed().await;
        let mut w = self.writer.lock().await;
        let _ = w.write.shutdown().await;
    }

    /// Encrypts, authenticates, and writes one frame. Advances `tx_key`
    /// only on success — the entire operation is one critical section, per
    /// the concurrency model's requirement that encrypt+advance+write never
    /// interleave with another send on the same channel.
    pub async fn send(&self, plaintext: &[u8]) -> Result<(), ChannelError> {
        if self.state() == ChannelState::Closed {
            return Err(ChannelError::NotOpen("CLOSED"));
        }
        let result = self.send_inner(plaintext).await;
        if result.is_err() {
            self.mark_closed().await;
        }
        result
    }

    async fn send_inner(&self, plaintext: &[u8]) -> Result<(), ChannelError> {
        let mut w = self.writer.lock().await;
        let padded = frame::pad(plaintext);
        let ciphertext = aes_cbc::encrypt(&self.secret_key, &w.tx_key, &padded);
        let block_count = (ciphertext.len() / 16) as u16;
        let len_bytes = block_count.to_be_bytes();
        let auth = hash::hash(&[&self.secret_key, &w.tx_key, &ciphertext, &len_bytes]);

        w.write.write_all(&auth).await?;
        w.write.write_all(&len_bytes).await?;
        w.write.write_all(&ciphertext).await?;
        w.write.flush().await?;

        w.tx_key = hash::hash(&[&self.secret_key, &w.tx_key]);
        Ok(())
    }

    /// Reads, authenticates, and decrypts one frame. Advances `rx_key` only
    /// on success.
    pub async fn recv(&self) -> Result<Vec<u8>, ChannelError> {
        if self.state() == ChannelState::Closed {
            return Err(ChannelError::NotOpen("CLOSED"));
        }
        let result = self.recv_inner().await;
        if result.is_err() {
            self.mark_closed().await;
        }
        result
    }

    async fn recv_inner(&self) -> Result<Vec<u8>, ChannelError> {
        let mut r = self.reader.lock().await;

        let mut header = [0u8; 18];
        r.read.read_exact(&mut header).await?;
        let auth = &header[..16];
        let len_bytes = &header[16..18];
        let block_count = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if block_count == 0 {
            return Err(ChannelError::ShortRead);
        }

        let mut ciphertext = vec![0u8; block_count * 16];
        r.read.read_exact(&mut ciphertext).await?;

        let expected = hash::hash(&[&self.secret_key, &r.rx_key, &ciphertext, len_bytes]);
        if !hash::constant_time_eq(auth, &expected) {
            return Err(ChannelError::FrameAuthMismatch);
        }

        if let Some(lifetime) = self.lifetime {
            let mut expiry = self.expiry.lock().await;
            let now = Instant::now();
            match *expiry {
                Some(exp) if now > exp => return Err(ChannelError::SessionExpired),
                _ => {}
            }
            *expiry = Some(now + lifetime);
        }

        let padded = aes_cbc::decrypt(&self.secret_key, &r.rx_key, &ciphertext);
        let plaintext = frame::unpad(&padded)?;

        r.rx_key = hash::hash(&[&self.secret_key, &r.rx_key]);
        Ok(plaintext)
    }
}

/// Shared-ownership handle used by both the RPC server (one reader loop,
/// many concurrent encoders feeding one serialized sender) and the RPC
/// client (one sender per call, one receive loop).
pub type SharedChannel = Arc<FramedChannel>;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn handshake_pair(key: [u8; 16]) -> (FramedChannel, FramedChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_fut = async {
            let (stream, _) = listener.accept().await.unwrap();
            FramedChannel::handshake_server(stream, key, None)
                .await
                .unwrap()
        };
        let client_fut = async {
            let stream = TcpStream::connect(addr).await.unwrap();
            FramedChannel::handshake_client(stream, key, &MAGIC_CRS)
                .await
                .unwrap()
        };
        tokio::join!(server_fut, client_fut)
    }

    #[tokio::test]
    async fn handshake_then_send_recv_round_trips() {
        let key = *b"0123456789abcdef";
        let (server, client) = handshake_pair(key).await;

        client.send(b"hello").await.unwrap();
        let got = server.recv().await.unwrap();
        assert_eq!(got, b"hello");

        server.send(b"world").await.unwrap();
        let got = client.recv().await.unwrap();
        assert_eq!(got, b"world");
    }

    #[tokio::test]
    async fn keys_roll_in_lockstep() {
        let key = *b"0123456789abcdef";
        let (server, client) = handshake_pair(key).await;

        for i in 0..5u8 {
            client.send(&[i]).await.unwrap();
            let got = server.recv().await.unwrap();
            assert_eq!(got, vec![i]);
        }

        let client_tx = client.writer.lock().await.tx_key;
        let server_rx = server.reader.lock().await.rx_key;
        assert_eq!(client_tx, server_rx);
    }

    #[tokio::test]
    async fn handshake_fails_on_mismatched_secret() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_fut = async {
            let (stream, _) = listener.accept().await.unwrap();
            FramedChannel::handshake_server(stream, *b"0000000000000000", None).await
        };
        let client_fut = async {
            let stream = TcpStream::connect(addr).await.unwrap();
            FramedChannel::handshake_client(stream, *b"1111111111111111", &MAGIC_CRS).await
        };
        let (server_res, client_res) = tokio::join!(server_fut, client_fut);
        assert!(server_res.is_err() || client_res.is_err());
    }

    #[tokio::test]
    async fn bit_flip_in_auth_closes_without_delivery() {
        let key = *b"0123456789abcdef";
        let (server, client) = handshake_pair(key).await;

        // Manually corrupt a frame by sending one with a flipped auth byte.
        {
            let mut w = client.writer.lock().await;
            let padded = frame::pad(b"tampered");
            let ciphertext = aes_cbc::encrypt(&key, &w.tx_key, &padded);
            let block_count = (ciphertext.len() / 16) as u16;
            let len_bytes = block_count.to_be_bytes();
            let mut auth = hash::hash(&[&key, &w.tx_key, &ciphertext, &len_bytes]);
            auth[0] ^= 0x01;
            w.write.write_all(&auth).await.unwrap();
            w.write.write_all(&len_bytes).await.unwrap();
            w.write.write_all(&ciphertext).await.unwrap();
            w.write.flush().await.unwrap();
            w.tx_key = hash::hash(&[&key, &w.tx_key]);
        }

        let result = server.recv().await;
        assert!(matches!(result, Err(ChannelError::FrameAuthMismatch)));
        assert_eq!(server.state(), ChannelState::Closed);
    }
}
