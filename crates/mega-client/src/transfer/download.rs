//! Chunked parallel download: ranged GETs through a bounded worker pool,
//! in-place CTR decryption, offset writes, and the end-to-end MAC check.
//!
//! The MAC verdict comes last: bytes are already on disk when a mismatch
//! is detected, and the caller gets `MacMismatch` rather than a silent
//! success. Decrypt-and-verify is atomic from the caller's perspective;
//! no success path exists on which the check was skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::debug;

use mega_api::messages::{Cmd, DownloadRequest, DownloadResponse};
use mega_api::Transport;
use mega_codec::words_to_bytes;
use mega_core::{ClientConfig, Error, Result};
use mega_crypto::{chunk_mac, ctr_crypt_chunk, decrypt_attr, meta_mac};
use mega_fs::{Node, NodeKind};

use super::{chunk_plan, enforce_transfer_tls, get_with_retry, join_workers, Chunk, TransferOptions};

pub(crate) async fn download_node(
    transport: &Transport,
    http: &reqwest::Client,
    config: &ClientConfig,
    node: &Node,
    dest: &Path,
    opts: &TransferOptions,
) -> Result<u64> {
    if node.kind != NodeKind::File {
        return Err(Error::BadArgs);
    }
    let keys = node.keys.clone().ok_or(Error::Decrypt)?;

    let resp: DownloadResponse = transport
        .request(&DownloadRequest {
            a: Cmd::Download,
            g: 1,
            n: Some(node.handle.clone()),
            p: None,
            ssl: config.ssl_flag(),
        })
        .await?;

    // opening the sealed attribute proves the key material is sane before
    // any bytes move
    if !resp.at.is_empty() {
        decrypt_attr(&keys.content_key, &resp.at)?;
    }

    let base_url = enforce_transfer_tls(resp.g, config);
    let plan = chunk_plan(resp.s);
    debug!(handle = %node.handle, size = resp.s, chunks = plan.len(), "download planned");

    let file = tokio::fs::File::create(dest).await?;
    file.set_len(resp.s).await?;
    drop(file);

    let semaphore = Arc::new(Semaphore::new(config.download_workers));
    let macs = Arc::new(Mutex::new(vec![[0u8; 16]; plan.len()]));
    let done = Arc::new(AtomicU64::new(0));
    let total = resp.s;

    let mut tasks = Vec::with_capacity(plan.len());
    for (index, chunk) in plan.iter().copied().enumerate() {
        let semaphore = semaphore.clone();
        let macs = macs.clone();
        let done = done.clone();
        let http = http.clone();
        let base_url = base_url.clone();
        let dest: PathBuf = dest.to_path_buf();
        let opts = opts.clone();
        let content_key = keys.content_key;
        let iv = keys.iv;
        let retries = config.retries;

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let url = format!("{}/{}-{}", base_url, chunk.offset, chunk.end() - 1);
            let mut buf = get_with_retry(&http, &url, retries, &opts.cancel).await?;
            if buf.len() as u64 != chunk.len {
                return Err(Error::BadResponse(format!(
                    "chunk at {} returned {} bytes, wanted {}",
                    chunk.offset,
                    buf.len(),
                    chunk.len
                )));
            }

            ctr_crypt_chunk(&content_key, iv, chunk.offset, &mut buf);
            let mac = chunk_mac(&content_key, iv, &buf);

            write_at(&dest, chunk, &buf).await?;

            // indices are keyed by chunk order, not completion order
            macs.lock().expect("mac array lock poisoned")[index] = mac;
            let written = done.fetch_add(chunk.len, Ordering::SeqCst) + chunk.len;
            opts.report(written, total);
            Ok(())
        }));
    }

    if let Some(e) = join_workers(tasks, &opts.cancel).await {
        return Err(e);
    }

    let macs = macs.lock().expect("mac array lock poisoned");
    let folded = meta_mac(&keys.content_key, &macs);
    if words_to_bytes(&folded) != keys.mac {
        // the plaintext is already on disk; never claim success for it
        return Err(Error::MacMismatch);
    }

    Ok(total)
}

async fn write_at(dest: &Path, chunk: Chunk, buf: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).open(dest).await?;
    file.seek(std::io::SeekFrom::Start(chunk.offset)).await?;
    file.write_all(buf).await?;
    Ok(())
}
