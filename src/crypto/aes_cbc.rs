//! AES-128-CBC with a caller-supplied IV, chained by hand over the raw
//! block cipher rather than prepending the IV to the output — the channel
//! frame format carries the IV implicitly as the rolling session key, so
//! the usual "IV || ciphertext" convention does not apply here.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

pub const BLOCK_LEN: usize = 16;

/// Encrypts `plaintext` (must already be a positive multiple of 16 bytes)
/// in CBC mode under `key`/`iv`. Panics if `plaintext` is not block-aligned;
/// callers are expected to pad first (see [`crate::frame::pad`]).
pub fn encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    assert!(
        !plaintext.is_empty() && plaintext.len() % BLOCK_LEN == 0,
        "plaintext must be a positive multiple of {BLOCK_LEN} bytes"
    );
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = Vec::with_capacity(plaintext.len());
    let mut prev = *iv;
    for chunk in plaintext.chunks_exact(BLOCK_LEN) {
        let mut block = [0u8; BLOCK_LEN];
        for i in 0..BLOCK_LEN {
            block[i] = chunk[i] ^ prev[i];
        }
        let mut ga = GenericArray::from(block);
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);
        out.extend_from_slice(&ga);
    }
    out
}

/// Decrypts `ciphertext` (must be a positive multiple of 16 bytes) in CBC
/// mode under `key`/`iv`. Does not strip padding.
pub fn decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Vec<u8> {
    assert!(
        !ciphertext.is_empty() && ciphertext.len() % BLOCK_LEN == 0,
        "ciphertext must be a positive multiple of {BLOCK_LEN} bytes"
    );
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = Vec::with_capacity(ciphertext.len());
    let mut prev = *iv;
    for chunk in ciphertext.chunks_exact(BLOCK_LEN) {
        let saved: [u8; BLOCK_LEN] = chunk.try_into().unwrap();
        let mut block = *GenericArray::from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for i in 0..BLOCK_LEN {
            out.push(block[i] ^ prev[i]);
        }
        prev = saved;
    }
    out
}
