//! The chunked transfer engine.
//!
//! Chunk layout is canonical, never negotiated: the first eight chunks grow
//! linearly from 128 KiB to 1 MiB, everything after is 1 MiB, and the final
//! chunk truncates to the remainder. Sender and receiver must agree on it
//! byte-exactly because the per-chunk MACs are folded in chunk order.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use mega_core::{ClientConfig, Error, Result};

pub(crate) mod download;
pub(crate) mod upload;

/// Progress callback: `(bytes_done, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Per-transfer knobs. The cancellation token is cooperative: workers
/// observe it at chunk boundaries and between HTTP retries.
#[derive(Clone, Default)]
pub struct TransferOptions {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressFn>,
}

impl TransferOptions {
    pub fn report(&self, done: u64, total: u64) {
        if let Some(cb) = &self.progress {
            cb(done, total);
        }
    }
}

/// One chunk of the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub len: u64,
}

impl Chunk {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

const GROW_STEP: u64 = 131_072;
const STEADY_CHUNK: u64 = 1_048_576;
const GROW_CHUNKS: u64 = 8;

/// Split `size` bytes into the canonical chunk layout. The chunks
/// partition `[0, size)`; a zero-size file has an empty plan.
pub fn chunk_plan(size: u64) -> Vec<Chunk> {
    let mut plan = Vec::new();
    let mut offset = 0u64;
    let mut index = 0u64;
    while offset < size {
        let full = if index < GROW_CHUNKS {
            (index + 1) * GROW_STEP
        } else {
            STEADY_CHUNK
        };
        let len = full.min(size - offset);
        plan.push(Chunk { offset, len });
        offset += len;
        index += 1;
    }
    plan
}

/// Rewrite a plaintext chunk URL to TLS when the config demands it.
pub(crate) fn enforce_transfer_tls(url: String, config: &ClientConfig) -> String {
    if config.https_transfers {
        if let Some(rest) = url.strip_prefix("http://") {
            return format!("https://{rest}");
        }
    }
    url
}

/// Await every chunk worker. The first fatal result cancels the token so
/// no new chunks dispatch; in-flight workers drain. A worker that merely
/// observed the cancellation never masks the originating error.
pub(crate) async fn join_workers(
    tasks: Vec<tokio::task::JoinHandle<Result<()>>>,
    cancel: &CancellationToken,
) -> Option<Error> {
    let mut failure: Option<Error> = None;
    for task in tasks {
        let outcome = match task.await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(join) => Error::Http(format!("chunk worker panicked: {join}")),
        };
        cancel.cancel();
        match &failure {
            None => failure = Some(outcome),
            Some(Error::Cancelled) if !matches!(outcome, Error::Cancelled) => {
                failure = Some(outcome)
            }
            _ => {}
        }
    }
    failure
}

const CHUNK_BACKOFF: Duration = Duration::from_millis(100);

/// GET one chunk range with per-chunk retries and cooperative cancellation.
pub(crate) async fn get_with_retry(
    http: &reqwest::Client,
    url: &str,
    retries: u32,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut backoff = CHUNK_BACKOFF;
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let failure = match http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                return resp
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| Error::Http(e.to_string()));
            }
            Ok(resp) if resp.status().is_server_error() => {
                Error::Http(format!("chunk GET status {}", resp.status()))
            }
            Ok(resp) => return Err(Error::Http(format!("chunk GET status {}", resp.status()))),
            Err(e) => Error::Http(e.to_string()),
        };
        attempt += 1;
        if attempt >= retries.max(1) {
            return Err(failure);
        }
        warn!(url, attempt, error = %failure, "chunk download retry");
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }
}

/// POST one chunk body with per-chunk retries; returns the response body.
pub(crate) async fn post_with_retry(
    http: &reqwest::Client,
    url: &str,
    body: Vec<u8>,
    retries: u32,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut backoff = CHUNK_BACKOFF;
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let failure = match http.post(url).body(body.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                return resp
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| Error::Http(e.to_string()));
            }
            Ok(resp) if resp.status().is_server_error() => {
                Error::Http(format!("chunk POST status {}", resp.status()))
            }
            Ok(resp) => return Err(Error::Http(format!("chunk POST status {}", resp.status()))),
            Err(e) => Error::Http(e.to_string()),
        };
        attempt += 1;
        if attempt >= retries.max(1) {
            return Err(failure);
        }
        warn!(url, attempt, error = %failure, "chunk upload retry");
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }
}
