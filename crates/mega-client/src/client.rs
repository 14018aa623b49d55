//! The public session façade.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mega_api::messages::{
    request_id, Cmd, DeleteRequest, FilesRequest, FilesResponse, LinkRequest, LoginRequest,
    LoginResponse, LogoutRequest, MoveRequest, PreloginRequest, PreloginResponse, PutNode,
    PutRequest, PutResponse, QuotaRequest, QuotaResponse, SetAttrRequest, UserRequest,
    UserResponse,
};
use mega_api::Transport;
use mega_codec::{b64url_encode, words_to_bytes};
use mega_core::{ClientConfig, Error, Result};
use mega_crypto::{block, encrypt_attr, rsa, string_hash, MasterKey, NodeAttr};
use mega_fs::{Node, NodeGraph};

use crate::events::{self, EventWaiters};
use crate::session::{
    combine_session_keys, derive_password_key, format_session_dump, fresh_session_key,
    parse_session_dump, unseal_account_key, SessionState,
};
use crate::transfer::{self, TransferOptions};

/// Account information from the `ug` command.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Storage quota from the `uq` command.
#[derive(Debug, Clone, Copy)]
pub struct QuotaInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// One authenticated session. Multiple sessions may coexist in a process;
/// there is no global state.
pub struct Mega {
    config: ClientConfig,
    transport: Arc<Transport>,
    /// Plain client for presigned chunk URLs; those are not sequenced.
    chunk_http: reqwest::Client,
    graph: Arc<NodeGraph>,
    state: RwLock<Option<SessionState>>,
    waiters: EventWaiters,
    pump: Mutex<Option<(CancellationToken, tokio::task::JoinHandle<()>)>>,
}

impl Mega {
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(Transport::new(&config)?);
        let chunk_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            config,
            transport,
            chunk_http,
            graph: Arc::new(NodeGraph::new()),
            state: RwLock::new(None),
            waiters: EventWaiters::new(),
            pump: Mutex::new(None),
        })
    }

    /// The decrypted filesystem graph.
    pub fn fs(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    /// The account's user handle (set after login).
    pub fn user_handle(&self) -> Option<String> {
        self.state
            .read()
            .expect("state lock poisoned")
            .as_ref()
            .map(|s| s.user_handle.clone())
    }

    fn master(&self) -> Result<MasterKey> {
        self.state
            .read()
            .expect("state lock poisoned")
            .as_ref()
            .map(|s| s.master.clone())
            .ok_or(Error::NotLoggedIn)
    }

    // ── Login variants ───────────────────────────────────────────────────────

    /// Classic email + password login.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        self.login_with(email, password, None).await
    }

    /// Login with a TOTP code for MFA-enabled accounts.
    pub async fn multi_factor_login(
        &self,
        email: &str,
        password: &str,
        mfa_code: &str,
    ) -> Result<()> {
        self.login_with(email, password, Some(mfa_code.to_string()))
            .await
    }

    async fn login_with(&self, email: &str, password: &str, mfa: Option<String>) -> Result<()> {
        let pre: PreloginResponse = self
            .transport
            .request(&PreloginRequest {
                a: Cmd::Prelogin,
                user: email.to_string(),
            })
            .await?;
        let password_key = derive_password_key(&pre, password)?;
        let user_handle = string_hash(email, &password_key);

        let client_sek = fresh_session_key();
        let resp: LoginResponse = self
            .transport
            .request(&LoginRequest {
                a: Cmd::Login,
                user: Some(email.to_string()),
                uh: Some(user_handle.clone()),
                sek: Some(b64url_encode(&client_sek)),
                si: None,
                mfa,
            })
            .await?;

        let master = unseal_account_key(&password_key, &resp.k)?;
        let csid = resp
            .csid
            .ok_or_else(|| Error::BadResponse("login response without csid".into()))?;
        let session_id = rsa::decrypt_session_id(&master, &resp.privk, &csid)?;
        self.transport.set_session_id(Some(session_id));

        let session_key = resp
            .sek
            .as_deref()
            .and_then(|s| combine_session_keys(&client_sek, s));

        *self.state.write().expect("state lock poisoned") = Some(SessionState {
            master,
            user_handle,
            session_key,
        });
        info!(email, "logged in");

        self.load_file_tree().await
    }

    /// Resume from a [`dump_session`](Self::dump_session) blob: no password
    /// round trip, the private key is merely re-verified.
    pub async fn session_login(&self, dump: &str) -> Result<()> {
        let (master, session_id) = parse_session_dump(dump)?;
        self.transport.set_session_id(Some(session_id));

        let client_sek = fresh_session_key();
        let resp: LoginResponse = self
            .transport
            .request(&LoginRequest {
                a: Cmd::Login,
                sek: Some(b64url_encode(&client_sek)),
                ..Default::default()
            })
            .await?;
        rsa::verify_private_key(&master, &resp.privk)?;

        let session_key = resp
            .sek
            .as_deref()
            .and_then(|s| combine_session_keys(&client_sek, s));

        *self.state.write().expect("state lock poisoned") = Some(SessionState {
            master,
            user_handle: resp.u.unwrap_or_default(),
            session_key,
        });
        info!("session resumed");

        self.load_file_tree().await
    }

    /// `base64url(master_key || sid_len || sid)`; feed to
    /// [`session_login`](Self::session_login) later.
    pub fn dump_session(&self) -> Result<String> {
        let sid = self.transport.session_id().ok_or(Error::NotLoggedIn)?;
        let state = self.state.read().expect("state lock poisoned");
        let state = state.as_ref().ok_or(Error::NotLoggedIn)?;
        Ok(format_session_dump(&state.master, &sid))
    }

    /// Invalidate the session on the service and locally.
    pub async fn logout(&self) -> Result<()> {
        self.transport
            .request_status(&LogoutRequest { a: Cmd::Logout })
            .await?;
        self.stop_pump();
        self.transport.set_session_id(None);
        *self.state.write().expect("state lock poisoned") = None;
        Ok(())
    }

    // ── Tree bootstrap and events ────────────────────────────────────────────

    /// Fetch the full node tree, register share keys, and start the event
    /// pump from the returned server sequence token.
    pub async fn load_file_tree(&self) -> Result<()> {
        let master = self.master()?;
        let resp: FilesResponse = self
            .transport
            .request(&FilesRequest { a: Cmd::Files, c: 1 })
            .await?;

        for share in &resp.ok {
            if let Err(e) = self.graph.register_share_key(&share.h, &share.k, &master) {
                warn!(handle = %share.h, error = %e, "share key rejected");
            }
        }
        for node in &resp.f {
            if let Err(e) = self.graph.add_or_update(node, &master) {
                warn!(handle = %node.h, error = %e, "tree node rejected");
            }
        }
        info!(nodes = resp.f.len(), "file tree loaded");

        if !resp.sn.is_empty() {
            self.start_pump(resp.sn);
        }
        Ok(())
    }

    fn start_pump(&self, server_sn: String) {
        let master = match self.master() {
            Ok(m) => m,
            Err(_) => return,
        };
        let mut pump = self.pump.lock().expect("pump lock poisoned");
        if let Some((cancel, _)) = pump.take() {
            cancel.cancel();
        }
        let cancel = CancellationToken::new();
        let handle = events::spawn_pump(
            self.transport.clone(),
            self.graph.clone(),
            master,
            self.waiters.clone(),
            server_sn,
            cancel.clone(),
        );
        *pump = Some((cancel, handle));
    }

    fn stop_pump(&self) {
        if let Some((cancel, _)) = self.pump.lock().expect("pump lock poisoned").take() {
            cancel.cancel();
        }
    }

    /// Register for the event rendezvous before submitting an action.
    pub fn wait_events_start(&self) -> u64 {
        self.waiters.register()
    }

    /// `true` iff any event batch arrived after `token` within `timeout`.
    pub async fn wait_events(&self, token: u64, timeout: Duration) -> bool {
        self.waiters.wait(token, timeout).await
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub async fn get_user(&self) -> Result<UserInfo> {
        let resp: UserResponse = self
            .transport
            .request(&UserRequest { a: Cmd::GetUser })
            .await?;
        Ok(UserInfo {
            id: resp.u,
            email: resp.email,
            name: resp.name,
        })
    }

    pub async fn quota(&self) -> Result<QuotaInfo> {
        let resp: QuotaResponse = self
            .transport
            .request(&QuotaRequest {
                a: Cmd::Quota,
                xfer: 1,
                strg: 1,
            })
            .await?;
        Ok(QuotaInfo {
            total_bytes: resp.mstrg,
            used_bytes: resp.cstrg,
        })
    }

    pub fn root(&self) -> Result<Node> {
        self.graph.root()
    }

    pub fn trash(&self) -> Result<Node> {
        self.graph.trash()
    }

    pub fn inbox(&self) -> Result<Node> {
        self.graph.inbox()
    }

    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        self.graph.children(&node.handle)
    }

    /// Resolve a slash-separated path from the root. `""`, `"."` and `"/"`
    /// name the root itself.
    pub fn resolve_path(&self, path: &str) -> Result<Node> {
        let root = self.graph.root()?;
        let segments: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if segments.is_empty() {
            return Ok(root);
        }
        let nodes = self.graph.path_lookup(&root.handle, &segments)?;
        Ok(nodes.last().cloned().expect("non-empty lookup"))
    }

    /// Create a folder under `parent`.
    pub async fn mkdir(&self, parent: &Node, name: &str) -> Result<Node> {
        let master = self.master()?;
        let key_words: [u32; 4] = {
            let mut rng = rand::thread_rng();
            core::array::from_fn(|_| rng.gen())
        };
        let mut key = [0u8; 16];
        key.copy_from_slice(&words_to_bytes(&key_words));
        let attr = encrypt_attr(&key, &NodeAttr { name: name.to_string() })?;
        let mut sealed = key.to_vec();
        block::encrypt_in_place(&master.cipher(), &mut sealed)?;

        let resp: PutResponse = self
            .transport
            .request(&PutRequest {
                a: Cmd::Put,
                t: parent.handle.clone(),
                n: [PutNode {
                    h: "xxxxxxxx".to_string(),
                    t: 1,
                    a: attr,
                    k: b64url_encode(&sealed),
                }],
                i: Some(request_id()),
            })
            .await?;
        let wire = resp
            .f
            .first()
            .ok_or_else(|| Error::BadResponse("mkdir returned no node".into()))?;
        self.graph.add_or_update(wire, &master)
    }

    /// Re-seal the node's name under its own key.
    pub async fn rename(&self, node: &Node, new_name: &str) -> Result<()> {
        let master = self.master()?;
        let keys = node.keys.as_ref().ok_or(Error::Decrypt)?;
        let attr = encrypt_attr(&keys.content_key, &NodeAttr { name: new_name.to_string() })?;
        let mut sealed = keys.composite.clone();
        block::encrypt_in_place(&master.cipher(), &mut sealed)?;

        self.transport
            .request_status(&SetAttrRequest {
                a: Cmd::SetAttr,
                attr: attr.clone(),
                key: b64url_encode(&sealed),
                n: node.handle.clone(),
                i: request_id(),
            })
            .await?;
        self.graph.update_attr(&node.handle, &attr)
    }

    /// Reparent a node.
    pub async fn move_node(&self, node: &Node, new_parent: &Node) -> Result<()> {
        self.transport
            .request_status(&MoveRequest {
                a: Cmd::Move,
                n: node.handle.clone(),
                t: new_parent.handle.clone(),
                i: request_id(),
            })
            .await?;
        self.graph.move_node(&node.handle, &new_parent.handle)
    }

    /// Soft delete moves to trash; `destroy` removes for good.
    pub async fn delete(&self, node: &Node, destroy: bool) -> Result<()> {
        if !destroy {
            let trash = self.graph.trash()?;
            return self.move_node(node, &trash).await;
        }
        self.transport
            .request_status(&DeleteRequest {
                a: Cmd::Delete,
                n: node.handle.clone(),
                i: request_id(),
            })
            .await?;
        self.graph.remove(&node.handle)
    }

    /// Public link for a file; with the key embedded anyone holding the
    /// link can decrypt.
    pub async fn export_link(&self, node: &Node, include_key: bool) -> Result<String> {
        let public: String = self
            .transport
            .request(&LinkRequest {
                a: Cmd::Link,
                n: node.handle.clone(),
            })
            .await?;
        if include_key {
            let keys = node.keys.as_ref().ok_or(Error::Decrypt)?;
            Ok(format!(
                "https://mega.nz/#!{}!{}",
                public,
                b64url_encode(&keys.composite)
            ))
        } else {
            Ok(format!("https://mega.nz/#!{public}"))
        }
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    /// Download a file node to `dest`. Bytes are written as chunks land;
    /// the MAC verdict comes after the last chunk, and a mismatch is
    /// reported as [`Error::MacMismatch`] with the file left on disk.
    pub async fn download_to(
        &self,
        node: &Node,
        dest: impl AsRef<Path>,
        opts: &TransferOptions,
    ) -> Result<u64> {
        transfer::download::download_node(
            &self.transport,
            &self.chunk_http,
            &self.config,
            node,
            dest.as_ref(),
            opts,
        )
        .await
    }

    /// Upload a local file under `parent`; `name` defaults to the source
    /// basename. Returns the committed node.
    pub async fn upload(
        &self,
        source: impl AsRef<Path>,
        parent: &Node,
        name: Option<&str>,
        opts: &TransferOptions,
    ) -> Result<Node> {
        let master = self.master()?;
        let source = source.as_ref();
        let name = match name {
            Some(n) => n.to_string(),
            None => source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(Error::BadArgs)?
                .to_string(),
        };
        let wire = transfer::upload::upload_file(
            &self.transport,
            &self.chunk_http,
            &self.config,
            &master,
            source,
            &parent.handle,
            &name,
            opts,
        )
        .await?;
        self.graph.add_or_update(&wire, &master)
    }
}

impl Drop for Mega {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
