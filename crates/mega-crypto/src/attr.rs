//! The attribute seal: node names travel as AES-CBC blobs with a magic
//! prefix.
//!
//! Plaintext layout is `"MEGA" || JSON || zero padding to 16`. Decryption
//! only trusts blobs whose first four plaintext bytes are the magic; any
//! other outcome (bad base64, bad length, bad magic, bad JSON) is a
//! `BadAttribute`, which callers degrade to an `UNKNOWN` display name
//! rather than dropping the node.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

use mega_codec::{b64url_decode, b64url_encode, pad_null};
use mega_core::{Error, Result};

use crate::BLOCK_SIZE;

type CbcEnc = cbc::Encryptor<Aes128>;
type CbcDec = cbc::Decryptor<Aes128>;

const ATTR_MAGIC: &[u8; 4] = b"MEGA";
const ZERO_IV: [u8; 16] = [0u8; 16];

/// Decrypted node attribute payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttr {
    #[serde(rename = "n")]
    pub name: String,
}

/// Seal an attribute under the node's content key; returns base64url.
pub fn encrypt_attr(key: &[u8; 16], attr: &NodeAttr) -> Result<String> {
    let mut plain = ATTR_MAGIC.to_vec();
    plain.extend_from_slice(&serde_json::to_vec(attr)?);
    let mut buf = pad_null(plain, BLOCK_SIZE);
    let len = buf.len();

    CbcEnc::new(key.into(), &ZERO_IV.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| Error::BadAttribute)?;

    Ok(b64url_encode(&buf))
}

/// Open a sealed attribute. Fails with `BadAttribute` unless the magic and
/// the embedded JSON both check out.
pub fn decrypt_attr(key: &[u8; 16], data: &str) -> Result<NodeAttr> {
    let mut buf = b64url_decode(data).map_err(|_| Error::BadAttribute)?;
    if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::BadAttribute);
    }

    CbcDec::new(key.into(), &ZERO_IV.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| Error::BadAttribute)?;

    if &buf[..4] != ATTR_MAGIC {
        return Err(Error::BadAttribute);
    }

    let json: &[u8] = &buf[4..];
    let json = json
        .split(|&b| b == 0)
        .next()
        .unwrap_or_default();
    serde_json::from_slice(json).map_err(|_| Error::BadAttribute)
}
