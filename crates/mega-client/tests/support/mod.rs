//! In-process mock of the service: the `/cs` command endpoint, the
//! `/sc` + wait event endpoints, and the presigned chunk upload/download
//! URLs. Ciphertext is stored as uploaded, so round-trip and tamper tests
//! exercise the real chunk layout, CTR transform, and MAC fold.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};

use mega_codec::b64url_encode;
use mega_crypto::{block, password_key};

pub const EMAIL: &str = "u@example.com";
pub const PASSWORD: &str = "pw";
pub const OWNER: &str = "testuser000";
pub const ROOT: &str = "root0001";
pub const INBOX: &str = "inbox001";
pub const TRASH: &str = "trash001";

/// Account master key and its RSA login fixture: the private key blob is
/// sealed under MASTER, and CSID decrypts to the session id SID.
pub const MASTER: [u8; 16] = [
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e,
    0x1f,
];
pub const PRIVK: &str = "iwwi11LE1MEsa6s4yy4x7fwL5lR2-01twi3rfnKwpMFyYypIA0n8i-4-qeAsOB_WlJdFI1PtMmT4yCGZBkPm-L_y0ODDrn8gCUHbSR_BA6WRnu8j0Xp9Ry7GLabtl9TYZvYk-ytz7QJuX4mAoETmesW8jtGMwNkppEZykAVfAQa42Fdcf-2zPIm9FV4JMJYUOxQGCGKyawUuaWKX9sJ2FcpJQ6PAYuHQOP0kLZZeCRDWItW2rVxweYqG2rbANvmdmvBtWr-L9Ee8quW2FI2nSL7h9duSkLTabVOhDSMrfrKfzDO8bBDytGAG1YcWdia9O2eMIcFVR1O4lLicmlMaSVpbgp8V8I16ZCoem7ZIp10";
pub const CSID: &str = "BACATsrJuhJSozXLoxvzqalFpiR7RhfIe5RoXN3dWH1SEoXOby-L95FBNZe6_g6v7Em8hpEHFPoldMhzTECUEag8gmA7dVIg9BuUosKgp1QZf2uCGiaeV4njv4ZjA0ETPrexfBbC7ytSRzw-1hbQBG86y7WTfXtXzM83pgjJquelQg";
pub const SID: &str = "BxQhLjtIVWJvfImWo7C9ytfk8f4LGCUyP0xZZnOAjZqntMHO2-j1Ag8cKQ";

pub struct UploadSlot {
    pub expected: u64,
    pub data: Vec<u8>,
    pub received: u64,
}

pub struct StoredFile {
    pub data: Vec<u8>,
    pub attr: String,
}

#[derive(Default)]
pub struct ServerState {
    pub base: Mutex<String>,
    pub uploads: Mutex<HashMap<u32, UploadSlot>>,
    pub files: Mutex<HashMap<String, StoredFile>>,
    pub next_id: AtomicU32,
    /// `uh` field observed on the login command
    pub seen_uh: Mutex<Option<String>>,
    /// events handed out by the next `/sc` poll
    pub pending_events: Mutex<VecDeque<Value>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

/// The `k` field of the login response: the account master key sealed as
/// one ECB block under the password-derived key.
pub fn login_k() -> String {
    let pass_key = password_key(PASSWORD);
    let mut sealed = MASTER.to_vec();
    block::encrypt_in_place(&pass_key.cipher(), &mut sealed).unwrap();
    b64url_encode(&sealed)
}

pub async fn spawn() -> TestServer {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/cs", post(cs))
        .route("/sc", post(sc))
        .route("/wait", get(wait))
        .route("/up/:id/:offset", post(upload_chunk))
        .route("/dl/:handle/:range", get(download_chunk))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    *state.base.lock().unwrap() = format!("http://{addr}");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, state }
}

async fn cs(State(state): State<Arc<ServerState>>, body: Bytes) -> String {
    let msgs: Vec<Value> = serde_json::from_slice(&body).expect("command body is JSON");
    let msg = &msgs[0];
    let base = state.base.lock().unwrap().clone();
    match msg["a"].as_str().unwrap_or_default() {
        "us0" => json!([{ "v": 1 }]).to_string(),
        "us" => {
            *state.seen_uh.lock().unwrap() =
                msg.get("uh").and_then(Value::as_str).map(String::from);
            json!([{ "k": login_k(), "privk": PRIVK, "csid": CSID, "u": OWNER }]).to_string()
        }
        "f" => json!([{
            "f": [
                { "h": ROOT, "t": 2, "u": OWNER },
                { "h": INBOX, "t": 3, "u": OWNER },
                { "h": TRASH, "t": 4, "u": OWNER },
            ],
            "sn": "sn-initial",
        }])
        .to_string(),
        "u" => {
            let expected = msg["s"].as_u64().unwrap();
            let id = state.next_id.fetch_add(1, Ordering::SeqCst);
            state.uploads.lock().unwrap().insert(
                id,
                UploadSlot {
                    expected,
                    data: vec![0u8; expected as usize],
                    received: 0,
                },
            );
            json!([{ "p": format!("{base}/up/{id}") }]).to_string()
        }
        "p" => {
            let target = msg["t"].as_str().unwrap().to_string();
            let put = &msg["n"][0];
            let token = put["h"].as_str().unwrap();
            let kind = put["t"].as_i64().unwrap();
            let attr = put["a"].as_str().unwrap().to_string();
            let key = put["k"].as_str().unwrap();

            let id = state.next_id.fetch_add(1, Ordering::SeqCst);
            let handle = format!("node{id:04}");
            let mut size = 0u64;
            if kind == 0 {
                let upload_id: u32 = token
                    .strip_prefix("done-")
                    .expect("file commit carries a completion handle")
                    .parse()
                    .unwrap();
                let slot = state
                    .uploads
                    .lock()
                    .unwrap()
                    .remove(&upload_id)
                    .expect("completion handle names a live upload");
                assert_eq!(slot.received, slot.expected, "upload incomplete at commit");
                size = slot.expected;
                state
                    .files
                    .lock()
                    .unwrap()
                    .insert(handle.clone(), StoredFile { data: slot.data, attr: attr.clone() });
            }
            json!([{ "f": [{
                "h": handle,
                "p": target,
                "u": OWNER,
                "t": kind,
                "a": attr,
                "k": format!("{OWNER}:{key}"),
                "ts": 1_712_345_678u64,
                "s": size,
            }] }])
            .to_string()
        }
        "g" => {
            let handle = msg["n"].as_str().unwrap();
            let files = state.files.lock().unwrap();
            let file = files.get(handle).expect("download of a known handle");
            json!([{
                "g": format!("{base}/dl/{handle}"),
                "s": file.data.len(),
                "at": file.attr,
            }])
            .to_string()
        }
        "l" => json!(["pubh1234"]).to_string(),
        "ug" => json!([{ "u": OWNER, "email": EMAIL, "name": "Test User" }]).to_string(),
        "uq" => json!([{ "mstrg": 1_000_000u64, "cstrg": 1234u64 }]).to_string(),
        "m" | "a" | "d" | "sml" => "0".to_string(),
        _ => "[-2]".to_string(),
    }
}

async fn sc(State(state): State<Arc<ServerState>>) -> String {
    let base = state.base.lock().unwrap().clone();
    let pending: Vec<Value> = state.pending_events.lock().unwrap().drain(..).collect();
    if pending.is_empty() {
        json!({ "w": format!("{base}/wait"), "sn": "sn-idle" }).to_string()
    } else {
        json!({ "a": pending, "sn": "sn-idle" }).to_string()
    }
}

async fn wait() -> &'static str {
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    "0"
}

async fn upload_chunk(
    State(state): State<Arc<ServerState>>,
    Path((id, offset)): Path<(u32, u64)>,
    body: Bytes,
) -> String {
    let mut uploads = state.uploads.lock().unwrap();
    let slot = uploads.get_mut(&id).expect("chunk for a live upload");
    let offset = offset as usize;
    slot.data[offset..offset + body.len()].copy_from_slice(&body);
    slot.received += body.len() as u64;
    if slot.received >= slot.expected {
        format!("done-{id}")
    } else {
        String::new()
    }
}

async fn download_chunk(
    State(state): State<Arc<ServerState>>,
    Path((handle, range)): Path<(String, String)>,
) -> Vec<u8> {
    let (from, to) = range.split_once('-').expect("range is from-to");
    let from: usize = from.parse().unwrap();
    let to: usize = to.parse().unwrap();
    let files = state.files.lock().unwrap();
    files.get(&handle).expect("known handle").data[from..=to].to_vec()
}
