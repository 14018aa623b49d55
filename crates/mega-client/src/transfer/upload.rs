//! Chunked parallel upload: plaintext CBC-MAC, in-place CTR encryption,
//! offset POSTs, completion-handle collection, and the `p` commit that
//! turns the streamed bytes into a node.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tracing::debug;

use mega_api::messages::{request_id, Cmd, PutNode, PutRequest, PutResponse, UploadRequest, UploadResponse, WireNode};
use mega_api::Transport;
use mega_codec::{b64url_encode, words_to_bytes};
use mega_core::{ClientConfig, Error, Result};
use mega_crypto::{block, build_composite, chunk_mac, ctr_crypt_chunk, encrypt_attr, meta_mac, MasterKey, NodeAttr};

use super::{chunk_plan, enforce_transfer_tls, post_with_retry, Chunk, TransferOptions};

pub(crate) async fn upload_file(
    transport: &Transport,
    http: &reqwest::Client,
    config: &ClientConfig,
    master: &MasterKey,
    source: &Path,
    parent_handle: &str,
    name: &str,
    opts: &TransferOptions,
) -> Result<WireNode> {
    let size = tokio::fs::metadata(source).await?.len();

    let resp: UploadResponse = transport
        .request(&UploadRequest {
            a: Cmd::Upload,
            s: size,
            ssl: config.ssl_flag(),
        })
        .await?;
    let base_url = enforce_transfer_tls(resp.p, config);

    // 192-bit upload key: words 0..4 are the content key, 4..6 the base IV
    let upload_key: [u32; 6] = {
        let mut rng = rand::thread_rng();
        core::array::from_fn(|_| rng.gen())
    };
    let mut content_key = [0u8; 16];
    content_key.copy_from_slice(&words_to_bytes(&upload_key[..4]));
    let iv = [upload_key[4], upload_key[5]];

    let plan = chunk_plan(size);
    debug!(size, chunks = plan.len(), "upload planned");

    let completion: Arc<Mutex<Vec<u8>>> = Arc::default();
    let macs = Arc::new(Mutex::new(vec![[0u8; 16]; plan.len()]));
    let semaphore = Arc::new(Semaphore::new(config.upload_workers));
    let done = Arc::new(AtomicU64::new(0));

    if plan.is_empty() {
        // zero-byte file: a single empty POST still yields the handle
        let body = post_with_retry(
            http,
            &format!("{base_url}/0"),
            Vec::new(),
            config.retries,
            &opts.cancel,
        )
        .await?;
        *completion.lock().expect("completion lock poisoned") = body;
    }

    let mut tasks = Vec::with_capacity(plan.len());
    for (index, chunk) in plan.iter().copied().enumerate() {
        let semaphore = semaphore.clone();
        let macs = macs.clone();
        let completion = completion.clone();
        let done = done.clone();
        let http = http.clone();
        let base_url = base_url.clone();
        let source: PathBuf = source.to_path_buf();
        let opts = opts.clone();
        let retries = config.retries;

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut buf = read_at(&source, chunk).await?;

            // MAC over plaintext, then encrypt in place
            let mac = chunk_mac(&content_key, iv, &buf);
            ctr_crypt_chunk(&content_key, iv, chunk.offset, &mut buf);

            let url = format!("{}/{}", base_url, chunk.offset);
            let body = post_with_retry(&http, &url, buf, retries, &opts.cancel).await?;

            macs.lock().expect("mac array lock poisoned")[index] = mac;
            if !body.is_empty() {
                // usually only the final chunk answers; last non-empty wins
                *completion.lock().expect("completion lock poisoned") = body;
            }
            let sent = done.fetch_add(chunk.len, Ordering::SeqCst) + chunk.len;
            opts.report(sent, size);
            Ok(())
        }));
    }

    if let Some(e) = super::join_workers(tasks, &opts.cancel).await {
        return Err(e);
    }

    let handle_bytes = completion.lock().expect("completion lock poisoned").clone();
    if handle_bytes.is_empty() {
        return Err(Error::UploadFailed);
    }
    let completion_handle = String::from_utf8(handle_bytes)
        .map_err(|_| Error::BadResponse("non-UTF-8 completion handle".into()))?;

    let folded = {
        let macs = macs.lock().expect("mac array lock poisoned");
        meta_mac(&content_key, &macs)
    };

    let composite = build_composite(&upload_key, &folded);
    let mut sealed_key = words_to_bytes(&composite);
    block::encrypt_in_place(&master.cipher(), &mut sealed_key)?;

    let attr = encrypt_attr(&content_key, &NodeAttr { name: name.to_string() })?;

    let commit: PutResponse = transport
        .request(&PutRequest {
            a: Cmd::Put,
            t: parent_handle.to_string(),
            n: [PutNode {
                h: completion_handle,
                t: 0,
                a: attr,
                k: b64url_encode(&sealed_key),
            }],
            i: Some(request_id()),
        })
        .await?;

    commit
        .f
        .into_iter()
        .next()
        .ok_or_else(|| Error::BadResponse("upload commit returned no node".into()))
}

async fn read_at(source: &Path, chunk: Chunk) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(source).await?;
    file.seek(std::io::SeekFrom::Start(chunk.offset)).await?;
    let mut buf = vec![0u8; chunk.len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}
