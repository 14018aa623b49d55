//! Node key material and the composite-key folds.
//!
//! A file's on-wire composite key is 8 words; XOR-folding the halves
//! recovers the 16-byte content key, and the upper half carries the base
//! IV and the expected meta-MAC tag. Folders carry a plain 4-word key.

use mega_codec::{words_to_bytes, bytes_to_words};
use mega_core::{Error, Result};

/// Decrypted key material attached to a node.
///
/// Transfers copy this out of the graph so a node can be mutated or
/// dropped while a download is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKeys {
    /// AES key for file bytes (folders: the folder key itself)
    pub content_key: [u8; 16],
    /// Base CTR IV words (files only, zero for folders)
    pub iv: [u32; 2],
    /// Expected meta-MAC tag (files only, zero for folders)
    pub mac: [u8; 8],
    /// Decrypted on-wire composite key (32 bytes for files, 16 for folders)
    pub composite: Vec<u8>,
}

/// Recover file key material from a decrypted 8-word composite key.
pub fn file_keys_from_composite(words: &[u32]) -> Result<NodeKeys> {
    if words.len() < 8 {
        return Err(Error::Decrypt);
    }
    let folded = [
        words[0] ^ words[4],
        words[1] ^ words[5],
        words[2] ^ words[6],
        words[3] ^ words[7],
    ];
    let mut content_key = [0u8; 16];
    content_key.copy_from_slice(&words_to_bytes(&folded));
    let mut mac = [0u8; 8];
    mac.copy_from_slice(&words_to_bytes(&[words[6], words[7]]));

    Ok(NodeKeys {
        content_key,
        iv: [words[4], words[5]],
        mac,
        composite: words_to_bytes(&words[..8]),
    })
}

/// Folder key material: the 4-word composite key is the content key.
pub fn folder_keys_from_composite(words: &[u32]) -> Result<NodeKeys> {
    if words.len() < 4 {
        return Err(Error::Decrypt);
    }
    let mut content_key = [0u8; 16];
    content_key.copy_from_slice(&words_to_bytes(&words[..4]));

    Ok(NodeKeys {
        content_key,
        iv: [0, 0],
        mac: [0u8; 8],
        composite: words_to_bytes(&words[..4]),
    })
}

/// Build the 8-word composite key committed at the end of an upload:
/// `[uk0^uk4, uk1^uk5, uk2^mm0, uk3^mm1, uk4, uk5, mm0, mm1]`.
pub fn build_composite(upload_key: &[u32; 6], meta_mac: &[u32; 2]) -> [u32; 8] {
    [
        upload_key[0] ^ upload_key[4],
        upload_key[1] ^ upload_key[5],
        upload_key[2] ^ meta_mac[0],
        upload_key[3] ^ meta_mac[1],
        upload_key[4],
        upload_key[5],
        meta_mac[0],
        meta_mac[1],
    ]
}

impl NodeKeys {
    /// Re-derive the key material from raw composite bytes (as stored in
    /// the graph) based on the blob length.
    pub fn from_composite_bytes(composite: &[u8]) -> Result<Self> {
        let words = bytes_to_words(composite);
        match composite.len() {
            32 => file_keys_from_composite(&words),
            16 => folder_keys_from_composite(&words),
            _ => Err(Error::Decrypt),
        }
    }
}
