//! Session state and the login-time key plumbing.
//!
//! All login variants end in the same place: a master key, a session id on
//! the transport, and the user handle. The dump format round-trips the
//! master key and session id so a later process can resume without the
//! password.

use rand::Rng;

use mega_api::messages::PreloginResponse;
use mega_codec::{b64url_decode, b64url_encode};
use mega_core::{Error, Result};
use mega_crypto::{block, derive_key_v2, password_key, MasterKey};

pub(crate) struct SessionState {
    pub master: MasterKey,
    pub user_handle: String,
    /// Ephemeral session key agreed at login (modern accounts)
    pub session_key: Option<[u8; 16]>,
}

/// Account KDF selection: a version-2 prelogin carries a salt for PBKDF2;
/// anything else uses the legacy construction.
pub(crate) fn derive_password_key(pre: &PreloginResponse, password: &str) -> Result<MasterKey> {
    if pre.v == 2 {
        let salt = pre
            .s
            .as_deref()
            .ok_or_else(|| Error::BadResponse("v2 prelogin without salt".into()))?;
        let salt = b64url_decode(salt)?;
        Ok(derive_key_v2(password, &salt))
    } else {
        Ok(password_key(password))
    }
}

/// Unseal the account master key returned at login: a single AES-ECB block
/// under the password-derived key.
pub(crate) fn unseal_account_key(password_key: &MasterKey, k: &str) -> Result<MasterKey> {
    let mut blob = b64url_decode(k)?;
    if blob.len() < 16 {
        return Err(Error::Decrypt);
    }
    block::decrypt_in_place(&password_key.cipher(), &mut blob)?;
    let mut key = [0u8; 16];
    key.copy_from_slice(&blob[..16]);
    Ok(MasterKey::from_bytes(key))
}

/// Fresh client-side session key, sent base64url with the login message.
pub(crate) fn fresh_session_key() -> [u8; 16] {
    let mut rng = rand::thread_rng();
    core::array::from_fn(|_| rng.gen())
}

/// Combine our session key with the one the service returned.
pub(crate) fn combine_session_keys(ours: &[u8; 16], theirs_b64: &str) -> Option<[u8; 16]> {
    let theirs = b64url_decode(theirs_b64).ok()?;
    if theirs.len() < 16 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ours[i] ^ theirs[i];
    }
    Some(out)
}

/// `base64url(master_key[16] || sid_len[1] || sid_bytes)`
pub(crate) fn format_session_dump(master: &MasterKey, session_id: &str) -> String {
    let sid = session_id.as_bytes();
    let mut raw = Vec::with_capacity(17 + sid.len());
    raw.extend_from_slice(master.as_bytes());
    raw.push(sid.len() as u8);
    raw.extend_from_slice(sid);
    b64url_encode(&raw)
}

pub(crate) fn parse_session_dump(dump: &str) -> Result<(MasterKey, String)> {
    let raw = b64url_decode(dump.trim())?;
    if raw.len() < 17 {
        return Err(Error::BadResponse("session dump too short".into()));
    }
    let sid_len = raw[16] as usize;
    if raw.len() < 17 + sid_len {
        return Err(Error::BadResponse("session dump truncated".into()));
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(&raw[..16]);
    let sid = String::from_utf8(raw[17..17 + sid_len].to_vec())
        .map_err(|_| Error::BadResponse("session id is not UTF-8".into()))?;
    Ok((MasterKey::from_bytes(key), sid))
}
