//! mega-crypto: the cryptographic layer of the client.
//!
//! Everything the service stores is opaque to it; this crate implements the
//! scheme that makes that true:
//!
//! ```text
//! password ──KDF──▶ master key (AES-128)
//!   ├── decrypts the account key blob and the RSA private key at login
//!   ├── seals each node's composite key (AES-ECB)
//!   └── composite key ──XOR fold──▶ content key + base IV + MAC tag
//!         ├── file bytes: AES-CTR per chunk (IV derived from chunk offset)
//!         ├── integrity: per-chunk CBC-MAC, folded into an 8-byte meta-MAC
//!         └── node name: AES-CBC "attribute seal" with the "MEGA" magic
//! ```
//!
//! All word-level operations are big-endian 32-bit, see `mega-codec`.

pub mod attr;
pub mod block;
pub mod kdf;
pub mod keys;
pub mod mac;
pub mod rsa;

pub use attr::{decrypt_attr, encrypt_attr, NodeAttr};
pub use kdf::{derive_key_v2, password_key, string_hash, MasterKey};
pub use keys::{build_composite, file_keys_from_composite, folder_keys_from_composite, NodeKeys};
pub use mac::{chunk_mac, ctr_crypt_chunk, ctr_iv_for_offset, meta_mac, MacFold};
pub use rsa::decrypt_session_id;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of the base64url-encoded session id payload before encoding.
pub const SESSION_ID_LEN: usize = 43;
