//! Wire message shapes.
//!
//! Every command object carries its discriminant in the `a` field; event
//! objects reuse the same field name, so event decoding goes
//! discriminant-first before committing to a shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command discriminants accepted by the `/cs` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    #[serde(rename = "us0")]
    Prelogin,
    #[serde(rename = "us")]
    Login,
    #[serde(rename = "sml")]
    Logout,
    #[serde(rename = "ug")]
    GetUser,
    #[serde(rename = "uq")]
    Quota,
    #[serde(rename = "f")]
    Files,
    #[serde(rename = "g")]
    Download,
    #[serde(rename = "u")]
    Upload,
    #[serde(rename = "p")]
    Put,
    #[serde(rename = "m")]
    Move,
    #[serde(rename = "a")]
    SetAttr,
    #[serde(rename = "d")]
    Delete,
    #[serde(rename = "l")]
    Link,
}

impl Default for Cmd {
    fn default() -> Self {
        Cmd::Login
    }
}

#[derive(Debug, Serialize)]
pub struct PreloginRequest {
    pub a: Cmd,
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct PreloginResponse {
    #[serde(default)]
    pub v: i32,
    #[serde(default)]
    pub s: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct LoginRequest {
    pub a: Cmd,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uh: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sek: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub si: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub csid: Option<String>,
    #[serde(default)]
    pub privk: String,
    #[serde(default)]
    pub k: String,
    #[serde(default)]
    pub sek: Option<String>,
    #[serde(default)]
    pub u: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutRequest {
    pub a: Cmd,
}

#[derive(Debug, Serialize)]
pub struct UserRequest {
    pub a: Cmd,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserResponse {
    #[serde(default)]
    pub u: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub k: String,
    #[serde(default)]
    pub pubk: String,
    #[serde(default)]
    pub privk: String,
}

#[derive(Debug, Serialize)]
pub struct QuotaRequest {
    pub a: Cmd,
    pub xfer: i32,
    pub strg: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuotaResponse {
    /// Total capacity in bytes
    #[serde(default)]
    pub mstrg: u64,
    /// Used capacity in bytes
    #[serde(default)]
    pub cstrg: u64,
}

#[derive(Debug, Serialize)]
pub struct FilesRequest {
    pub a: Cmd,
    pub c: i32,
}

/// A node as the service serializes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireNode {
    /// Node handle
    pub h: String,
    /// Parent handle
    #[serde(default)]
    pub p: String,
    /// Owner user id
    #[serde(default)]
    pub u: String,
    /// Node type
    pub t: i32,
    /// Sealed attribute blob
    #[serde(default)]
    pub a: String,
    /// `<owner>:<sealed key>` composite key reference
    #[serde(default)]
    pub k: String,
    #[serde(default)]
    pub ts: i64,
    /// Sharing user (set on share roots)
    #[serde(default)]
    pub su: String,
    /// Share key (set on share roots)
    #[serde(default)]
    pub sk: String,
    /// Size in bytes (files)
    #[serde(default)]
    pub s: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareKey {
    pub h: String,
    pub k: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilesResponse {
    #[serde(default)]
    pub f: Vec<WireNode>,
    #[serde(default)]
    pub ok: Vec<ShareKey>,
    #[serde(default)]
    pub sn: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadRequest {
    pub a: Cmd,
    pub g: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub ssl: i32,
}

#[derive(Debug, Deserialize)]
pub struct DownloadResponse {
    /// Presigned base URL for ranged chunk GETs
    pub g: String,
    /// File size in bytes
    pub s: u64,
    /// Sealed attribute blob
    #[serde(default)]
    pub at: String,
}

#[derive(Debug, Serialize)]
pub struct UploadRequest {
    pub a: Cmd,
    pub s: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub ssl: i32,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Presigned upload URL; chunks POST to `<p>/<offset>`
    pub p: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PutNode {
    pub h: String,
    pub t: i32,
    pub a: String,
    pub k: String,
}

#[derive(Debug, Serialize)]
pub struct PutRequest {
    pub a: Cmd,
    /// Target (parent) handle
    pub t: String,
    pub n: [PutNode; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PutResponse {
    #[serde(default)]
    pub f: Vec<WireNode>,
}

#[derive(Debug, Serialize)]
pub struct MoveRequest {
    pub a: Cmd,
    pub n: String,
    pub t: String,
    pub i: String,
}

#[derive(Debug, Serialize)]
pub struct SetAttrRequest {
    pub a: Cmd,
    pub attr: String,
    pub key: String,
    pub n: String,
    pub i: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteRequest {
    pub a: Cmd,
    pub n: String,
    pub i: String,
}

#[derive(Debug, Serialize)]
pub struct LinkRequest {
    pub a: Cmd,
    pub n: String,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

// ── Event stream ─────────────────────────────────────────────────────────────

/// One `/sc` poll result: a wait URL, a new server-sequence token, and raw
/// event objects (decoded individually, discriminant-first).
#[derive(Debug, Default, Deserialize)]
pub struct EventBatch {
    #[serde(default)]
    pub w: Option<String>,
    #[serde(default)]
    pub sn: Option<String>,
    #[serde(default, rename = "a")]
    pub events: Vec<Value>,
}

/// Decoded event kinds. Unknown discriminants keep the raw object.
#[derive(Debug)]
pub enum Event {
    /// `t`: new nodes embedded in the event
    NewNodes(Vec<WireNode>),
    /// `u`: attribute (name) update on an existing node
    AttrUpdate { handle: String, attr: String },
    /// `d`: node removal
    Delete { handle: String },
    /// `s`/`s2`: sharing metadata update
    Share { handle: Option<String>, key: Option<String> },
    /// anything else: preserved raw, logged at debug by the pump
    Unknown { kind: String, raw: Value },
}

#[derive(Debug, Default, Deserialize)]
struct TreeEventBody {
    #[serde(default)]
    t: TreeEventNodes,
}

#[derive(Debug, Default, Deserialize)]
struct TreeEventNodes {
    #[serde(default)]
    f: Vec<WireNode>,
}

#[derive(Debug, Deserialize)]
struct AttrEventBody {
    n: String,
    #[serde(default)]
    at: String,
}

#[derive(Debug, Deserialize)]
struct DeleteEventBody {
    n: String,
}

#[derive(Debug, Default, Deserialize)]
struct ShareEventBody {
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    k: Option<String>,
}

impl Event {
    /// Decode a raw event object by its `a` discriminant.
    pub fn parse(raw: &Value) -> Event {
        let kind = raw.get("a").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "t" => match serde_json::from_value::<TreeEventBody>(raw.clone()) {
                Ok(body) => Event::NewNodes(body.t.f),
                Err(_) => Event::unknown(kind, raw),
            },
            "u" => match serde_json::from_value::<AttrEventBody>(raw.clone()) {
                Ok(body) => Event::AttrUpdate {
                    handle: body.n,
                    attr: body.at,
                },
                Err(_) => Event::unknown(kind, raw),
            },
            "d" => match serde_json::from_value::<DeleteEventBody>(raw.clone()) {
                Ok(body) => Event::Delete { handle: body.n },
                Err(_) => Event::unknown(kind, raw),
            },
            "s" | "s2" => match serde_json::from_value::<ShareEventBody>(raw.clone()) {
                Ok(body) => Event::Share {
                    handle: body.n,
                    key: body.k,
                },
                Err(_) => Event::unknown(kind, raw),
            },
            _ => Event::unknown(kind, raw),
        }
    }

    fn unknown(kind: &str, raw: &Value) -> Event {
        Event::Unknown {
            kind: kind.to_string(),
            raw: raw.clone(),
        }
    }
}

/// Random 10-character idempotency id attached to mutation commands.
pub fn request_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
