//! Chunk integrity: CBC-MAC per chunk, meta-MAC over the chunk MACs, and
//! the per-chunk CTR counter derivation.
//!
//! The MAC always runs over plaintext (before CTR on upload, after CTR on
//! download) so both sides fold identical bytes. The meta-MAC chain is
//! order-sensitive; callers key their MAC array by chunk index, never by
//! completion order.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use ctr::Ctr128BE;

use mega_codec::{bytes_to_words, words_to_bytes};

use crate::BLOCK_SIZE;

type AesCtr = Ctr128BE<Aes128>;

/// Running CBC-MAC state (ciphertext of the last block folded so far).
pub struct MacFold {
    cipher: Aes128,
    state: [u8; 16],
}

impl MacFold {
    pub fn new(key: &[u8; 16], iv: [u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(key.into()),
            state: iv,
        }
    }

    /// Absorb one 16-byte block: `state = E(block XOR state)`.
    pub fn update(&mut self, block: &[u8]) {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        for (s, b) in self.state.iter_mut().zip(block) {
            *s ^= b;
        }
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(&mut self.state));
    }

    pub fn finish(self) -> [u8; 16] {
        self.state
    }
}

/// CBC-MAC of one plaintext chunk.
///
/// The IV duplicates the file's two base IV words into all four word
/// slots; the chunk is zero-padded to the block size.
pub fn chunk_mac(key: &[u8; 16], iv: [u32; 2], chunk: &[u8]) -> [u8; 16] {
    let mut iv_bytes = [0u8; 16];
    iv_bytes.copy_from_slice(&words_to_bytes(&[iv[0], iv[1], iv[0], iv[1]]));

    let mut fold = MacFold::new(key, iv_bytes);
    let mut iter = chunk.chunks_exact(BLOCK_SIZE);
    for block in &mut iter {
        fold.update(block);
    }
    let rem = iter.remainder();
    if !rem.is_empty() {
        let mut last = [0u8; BLOCK_SIZE];
        last[..rem.len()].copy_from_slice(rem);
        fold.update(&last);
    }
    fold.finish()
}

/// Fold per-chunk MACs (in chunk order) into the 2-word meta-MAC:
/// CBC-MAC with zero IV, final block folded `[w0^w1, w2^w3]`.
pub fn meta_mac(key: &[u8; 16], chunk_macs: &[[u8; 16]]) -> [u32; 2] {
    let mut fold = MacFold::new(key, [0u8; 16]);
    for mac in chunk_macs {
        fold.update(mac);
    }
    let words = bytes_to_words(&fold.finish());
    [words[0] ^ words[1], words[2] ^ words[3]]
}

/// CTR counter block for the chunk starting at byte `offset`.
pub fn ctr_iv_for_offset(iv: [u32; 2], offset: u64) -> [u8; 16] {
    let words = [
        iv[0],
        iv[1],
        (offset / 0x10_0000_0000) as u32,
        (offset / 16) as u32,
    ];
    let mut out = [0u8; 16];
    out.copy_from_slice(&words_to_bytes(&words));
    out
}

/// Encrypt or decrypt a chunk in place with AES-CTR keyed to its offset.
pub fn ctr_crypt_chunk(key: &[u8; 16], iv: [u32; 2], offset: u64, buf: &mut [u8]) {
    let counter = ctr_iv_for_offset(iv, offset);
    let mut ctr = AesCtr::new(key.into(), &counter.into());
    ctr.apply_keystream(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [1u8; 16];
    const IV: [u32; 2] = [0x1111_1111, 0x2222_2222];

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) ^ (i >> 3)) as u8).collect()
    }

    #[test]
    fn test_chunk_mac_vectors() {
        // 300,000-byte file split at the canonical first boundary
        let data = pattern(300_000);
        let m0 = chunk_mac(&KEY, IV, &data[..131_072]);
        let m1 = chunk_mac(&KEY, IV, &data[131_072..]);
        assert_eq!(
            m0,
            [
                0x24, 0x72, 0xe4, 0x17, 0x1b, 0x58, 0x85, 0x3a, 0x72, 0xae, 0xc5, 0xa7, 0x05,
                0xb2, 0x9d, 0x72
            ]
        );
        assert_eq!(
            m1,
            [
                0x39, 0x26, 0xea, 0xc4, 0xeb, 0x7b, 0xd5, 0x6f, 0xa3, 0x16, 0x4d, 0xf2, 0x9b,
                0x88, 0x31, 0x58
            ]
        );
        assert_eq!(meta_mac(&KEY, &[m0, m1]), [0x762c_2c1e, 0x0672_b0d1]);
    }

    #[test]
    fn test_tiny_chunk_vector() {
        let m = chunk_mac(&KEY, IV, b"hello world");
        assert_eq!(
            m,
            [
                0xb5, 0xf8, 0x2b, 0xb7, 0xcd, 0x5b, 0xec, 0x3e, 0xa7, 0xc7, 0x04, 0xb4, 0x16,
                0x8b, 0x3e, 0x97
            ]
        );
        assert_eq!(meta_mac(&KEY, &[m]), [0x34d2_3f7a, 0xdfd5_43da]);
    }

    #[test]
    fn test_ctr_vectors() {
        let data = pattern(300_000);

        let mut chunk0 = data[..131_072].to_vec();
        ctr_crypt_chunk(&KEY, IV, 0, &mut chunk0);
        assert_eq!(
            &chunk0[..16],
            &[
                0x4c, 0x18, 0x03, 0xde, 0xee, 0x23, 0xbd, 0x83, 0x91, 0xb8, 0x8e, 0x35, 0xc9,
                0xfc, 0xa1, 0x6a
            ]
        );

        let mut chunk1 = data[131_072..].to_vec();
        ctr_crypt_chunk(&KEY, IV, 131_072, &mut chunk1);
        assert_eq!(
            &chunk1[..16],
            &[
                0x1c, 0xae, 0x1f, 0x31, 0xd7, 0x24, 0xbb, 0x1e, 0x3f, 0xde, 0x5c, 0x53, 0x98,
                0x61, 0xbb, 0x1a
            ]
        );

        // CTR is an involution
        ctr_crypt_chunk(&KEY, IV, 131_072, &mut chunk1);
        assert_eq!(chunk1.as_slice(), &data[131_072..]);
    }

    #[test]
    fn test_ctr_iv_offset_words() {
        let iv = ctr_iv_for_offset(IV, 0x23_4567_8910);
        let words = bytes_to_words(&iv);
        assert_eq!(words[0], IV[0]);
        assert_eq!(words[1], IV[1]);
        assert_eq!(words[2], (0x23_4567_8910u64 / 0x10_0000_0000) as u32);
        assert_eq!(words[3], (0x23_4567_8910u64 / 16) as u32);
    }

    #[test]
    fn test_meta_mac_is_order_sensitive() {
        let a = chunk_mac(&KEY, IV, b"first chunk");
        let b = chunk_mac(&KEY, IV, b"second chunk");
        assert_ne!(meta_mac(&KEY, &[a, b]), meta_mac(&KEY, &[b, a]));
    }
}
