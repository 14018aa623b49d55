//! SHA-256 proof-of-work solver for the service's `X-Hashcash` challenge.
//!
//! The challenge replicates the token across a 12 MiB buffer behind a
//! 4-byte prefix. A solution is any prefix whose SHA-256 over the whole
//! buffer, read as a big-endian u32 of the first four digest bytes, lands
//! at or below the threshold derived from the 8-bit easiness parameter.
//! Workers search from independent random starting prefixes; the first
//! winner cancels the rest.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mega_codec::{b64url_decode, b64url_encode, pad_null};
use mega_core::{Error, Result};

const PREFIX_LEN: usize = 4;
const TOKEN_SLOT: usize = 48;
const REPLICATIONS: usize = 262_144;
const CANCEL_CHECK_EVERY: u32 = 1_000;

/// A parsed `X-Hashcash: 1:<easiness>:<timestamp>:<token>` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub easiness: u8,
    pub token: String,
}

impl Challenge {
    /// Parse a challenge header value; `None` on any malformed component.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(':');
        let version = parts.next()?;
        let easiness = parts.next()?;
        let _timestamp = parts.next()?;
        let token = parts.next()?;
        if parts.next().is_some() || version != "1" {
            return None;
        }
        let easiness: u8 = easiness.parse().ok()?;
        Some(Self {
            easiness,
            token: token.to_string(),
        })
    }

    /// The response header value for a solved challenge.
    pub fn response(&self, prefix: &str) -> String {
        format!("1:{}:{}", self.token, prefix)
    }
}

/// Acceptance threshold for an easiness value.
pub fn threshold(easiness: u8) -> u32 {
    let e = easiness as u32;
    (((e & 63) << 1) + 1) << ((e >> 6) * 7 + 3)
}

fn build_buffer(token: &[u8]) -> Vec<u8> {
    let padded = pad_null(token.to_vec(), 16);
    let fill = padded.len().min(TOKEN_SLOT);
    let mut buf = vec![0u8; PREFIX_LEN + REPLICATIONS * TOKEN_SLOT];
    for slot in 0..REPLICATIONS {
        let at = PREFIX_LEN + slot * TOKEN_SLOT;
        buf[at..at + fill].copy_from_slice(&padded[..fill]);
    }
    buf
}

fn digest_value(buf: &[u8]) -> u32 {
    let digest = Sha256::digest(buf);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Check a candidate prefix against a challenge.
pub fn verify(token: &str, easiness: u8, prefix: &str) -> Result<bool> {
    let token = b64url_decode(token)?;
    let prefix = b64url_decode(prefix)?;
    if prefix.len() != PREFIX_LEN {
        return Ok(false);
    }
    let mut buf = build_buffer(&token);
    buf[..PREFIX_LEN].copy_from_slice(&prefix);
    Ok(digest_value(&buf) <= threshold(easiness))
}

fn search(
    token: &[u8],
    easiness: u8,
    start: u32,
    cancel: &CancellationToken,
) -> Option<[u8; PREFIX_LEN]> {
    let limit = threshold(easiness);
    let mut buf = build_buffer(token);
    let mut counter = start;
    let mut iterations: u32 = 0;
    loop {
        iterations = iterations.wrapping_add(1);
        if iterations % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() {
            return None;
        }
        // the prefix is a little-endian 32-bit counter
        counter = counter.wrapping_add(1);
        buf[..PREFIX_LEN].copy_from_slice(&counter.to_le_bytes());
        if digest_value(&buf) <= limit {
            return Some(counter.to_le_bytes());
        }
        if iterations == u32::MAX {
            return None;
        }
    }
}

/// Solve a challenge within `timeout` using `workers` threads
/// (0 = available parallelism). Returns the base64url prefix.
pub async fn solve(
    token: &str,
    easiness: u8,
    timeout: Duration,
    workers: usize,
) -> Result<String> {
    let token_bytes = b64url_decode(token)?;
    let workers = if workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    } else {
        workers
    };
    debug!(easiness, workers, "solving hashcash challenge");

    let cancel = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<[u8; PREFIX_LEN]>(workers);
    for _ in 0..workers {
        let token_bytes = token_bytes.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();
        let start: u32 = rand::random();
        tokio::task::spawn_blocking(move || {
            if let Some(prefix) = search(&token_bytes, easiness, start, &cancel) {
                let _ = tx.blocking_send(prefix);
            }
        });
    }
    drop(tx);

    let winner = tokio::time::timeout(timeout, rx.recv()).await;
    cancel.cancel();
    match winner {
        Ok(Some(prefix)) => Ok(b64url_encode(&prefix)),
        // workers exhausted or the clock ran out; the caller retries later
        _ => Err(Error::HashcashTimeout),
    }
}
