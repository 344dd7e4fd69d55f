//! PKCS#7-style padding to the AES block size, and the wire frame header
//! layout shared by [`crate::channel`].

use crate::crypto::aes_cbc::BLOCK_LEN;

/// Appends 1..=16 bytes of padding so the result is a positive multiple of
/// `BLOCK_LEN`. Every padding byte equals the pad length, matching PKCS#7.
/// A full extra block is appended when `data` is already block-aligned.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - (data.len() % BLOCK_LEN);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(data.len() + pad_len, pad_len as u8);
    out
}

/// Errors if the trailing pad byte is out of `[1, 16]`, per the channel's
/// failure-mode requirement to reject malformed padding rather than trust it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("padding byte out of range")]
pub struct PaddingError;

/// Strips and validates PKCS#7-style padding. Does not verify that every
/// padding byte carries the same value — the channel only promises to
/// reject a pad length outside `[1, 16]`, matching the specification's
/// stated failure mode exactly (an under-strict pad check is acceptable
/// since the auth tag, not the padding, is what authenticates the frame).
pub fn unpad(data: &[u8]) -> Result<Vec<u8>, PaddingError> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(PaddingError);
    }
    let pad_len = *data.last().unwrap() as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(PaddingError);
    }
    Ok(data[..data.len() - pad_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_then_unpad_is_identity() {
        for len in 0..=48usize {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let padded = pad(&data);
            assert_eq!(padded.len() % BLOCK_LEN, 0);
            assert!(padded.len() > data.len());
            assert_eq!(unpad(&padded).unwrap(), data);
        }
    }

    #[test]
    fn pad_byte_always_in_range() {
        for len in 0..=48usize {
            let data: Vec<u8> = vec![0u8; len];
            let padded = pad(&data);
            let b = *padded.last().unwrap();
            assert!((1..=16).contains(&b));
        }
    }

    #[test]
    fn aligned_input_gets_full_extra_block() {
        let data = [0u8; 32];
        let padded = pad(&data);
        assert_eq!(padded.len(), 48);
        assert!(padded[32..].iter().all(|&b| b == 16));
    }

    #[test]
    fn unpad_rejects_empty() {
        assert!(unpad(&[]).is_err());
    }

    #[test]
    fn unpad_rejects_unaligned_length() {
        assert!(unpad(&[1, 2, 3]).is_err());
    }

    #[test]
    fn unpad_rejects_zero_pad_byte() {
        let mut block = [1u8; 16];
        block[15] = 0;
        assert!(unpad(&block).is_err());
    }

    #[test]
    fn unpad_rejects_pad_byte_over_block_len() {
        let mut block = [1u8; 16];
        block[15] = 17;
        assert!(unpad(&block).is_err());
    }
}
