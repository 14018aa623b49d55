//! mega-codec: the byte-level codecs the MEGA wire format is built on.
//!
//! Everything the protocol serializes (keys, attributes, session ids,
//! hashcash tokens) passes through unpadded base64url and big-endian
//! 32-bit word packing. Strings and blobs are null-padded up to a block
//! quantum before encryption, never truncated.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encode bytes as base64url without padding.
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded base64url. Standard-alphabet input (`+`, `/`, `=`) is
/// rejected.
pub fn b64url_decode(s: &str) -> Result<Vec<u8>, CodecError> {
    Ok(URL_SAFE_NO_PAD.decode(s.trim_end_matches('='))?)
}

/// Pack big-endian 32-bit words into bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 4);
    for w in words {
        out.extend_from_slice(&w.to_be_bytes());
    }
    out
}

/// Unpack bytes into big-endian 32-bit words, zero-extending a short
/// trailing group.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut out = Vec::with_capacity((bytes.len() + 3) / 4);
    for group in bytes.chunks(4) {
        let mut buf = [0u8; 4];
        buf[..group.len()].copy_from_slice(group);
        out.push(u32::from_be_bytes(buf));
    }
    out
}

/// Null-pad `data` up to a multiple of `quantum`. Already-aligned input is
/// returned unchanged.
pub fn pad_null(mut data: Vec<u8>, quantum: usize) -> Vec<u8> {
    let rem = data.len() % quantum;
    if rem != 0 {
        data.resize(data.len() + quantum - rem, 0);
    }
    data
}

/// Shorthand for decoding base64url straight into big-endian words.
pub fn b64url_to_words(s: &str) -> Result<Vec<u32>, CodecError> {
    Ok(bytes_to_words(&b64url_decode(s)?))
}

/// Shorthand for encoding big-endian words as base64url.
pub fn words_to_b64url(words: &[u32]) -> String {
    b64url_encode(&words_to_bytes(words))
}
