//! Password-to-master-key derivation and the keyed string hash.
//!
//! Two KDF generations coexist on the service. Version 1 accounts derive
//! the master key with the legacy 65,536-round AES construction below;
//! version 2 accounts (prelogin returns a salt) use PBKDF2-HMAC-SHA512.
//! Both must be bit-exact with the deployed scheme or login simply fails
//! with garbage keys, so the known-answer tests here are load-bearing.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use sha2::Sha512;
use zeroize::Zeroize;

use mega_codec::{bytes_to_words, pad_null, words_to_b64url, words_to_bytes};

const KDF_ROUNDS: usize = 65_536;
const KDF_SEED: [u32; 4] = [0x93C4_67E3, 0x7DB0_C7A4, 0xD1BE_3F81, 0x0152_CB56];
const STRING_HASH_ROUNDS: usize = 16_384;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// The 16-byte AES master key derived from the account password.
///
/// Wiped on drop; `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey {
    bytes: [u8; 16],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn cipher(&self) -> Aes128 {
        Aes128::new(&self.bytes.into())
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Version-1 password KDF.
///
/// The padded password is viewed as big-endian words; each 4-word group
/// (zero-extended) acts as an AES key that repeatedly encrypts a constant
/// seed block, 65,536 rounds over all groups.
pub fn password_key(password: &str) -> MasterKey {
    let words = bytes_to_words(&pad_null(password.as_bytes().to_vec(), 4));

    // Key schedules are round-invariant, so build each group's cipher once.
    let mut group_ciphers = Vec::with_capacity((words.len() + 3) / 4);
    for group in words.chunks(4) {
        let mut kw = [0u32; 4];
        kw[..group.len()].copy_from_slice(group);
        let kb = words_to_bytes(&kw);
        group_ciphers.push(Aes128::new(GenericArray::from_slice(&kb)));
    }

    let mut state = GenericArray::clone_from_slice(&words_to_bytes(&KDF_SEED));
    for _ in 0..KDF_ROUNDS {
        for cipher in &group_ciphers {
            cipher.encrypt_block(&mut state);
        }
    }

    let mut out = [0u8; 16];
    out.copy_from_slice(&state);
    MasterKey::from_bytes(out)
}

/// Version-2 password KDF: PBKDF2-HMAC-SHA512, 100,000 iterations over the
/// prelogin salt; the first 16 of 32 derived bytes become the master key.
pub fn derive_key_v2(password: &str, salt: &[u8]) -> MasterKey {
    let mut derived = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut derived);
    let mut out = [0u8; 16];
    out.copy_from_slice(&derived[..16]);
    derived.zeroize();
    MasterKey::from_bytes(out)
}

/// Keyed string hash used for the user handle.
///
/// XOR-folds the padded string into a 4-word accumulator (index mod 4),
/// encrypts it 16,384 times under `key`, and emits words 0 and 2 as
/// base64url.
pub fn string_hash(s: &str, key: &MasterKey) -> String {
    let words = bytes_to_words(&pad_null(s.as_bytes().to_vec(), 4));
    let mut acc = [0u32; 4];
    for (i, w) in words.iter().enumerate() {
        acc[i & 3] ^= *w;
    }

    let cipher = key.cipher();
    let mut state = GenericArray::clone_from_slice(&words_to_bytes(&acc));
    for _ in 0..STRING_HASH_ROUNDS {
        cipher.encrypt_block(&mut state);
    }

    let out = bytes_to_words(&state);
    words_to_b64url(&[out[0], out[2]])
}
