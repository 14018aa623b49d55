//! Multi-block AES-ECB helpers.
//!
//! The wire format ECB-encrypts key blobs block by block (composite keys,
//! the private-key container). Destination buffers larger than the source
//! are accepted; trailing destination bytes are left untouched. A source
//! that is not block-aligned is an error, never padded here.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::Aes128;
use mega_core::{Error, Result};

use crate::BLOCK_SIZE;

/// Build a block cipher from raw key bytes.
pub fn cipher_for(key: &[u8; 16]) -> Aes128 {
    use aes::cipher::KeyInit;
    Aes128::new(key.into())
}

pub fn encrypt_blocks(cipher: &Aes128, dst: &mut [u8], src: &[u8]) -> Result<()> {
    check_lengths(dst, src)?;
    for (d, s) in dst.chunks_mut(BLOCK_SIZE).zip(src.chunks(BLOCK_SIZE)) {
        d.copy_from_slice(s);
        cipher.encrypt_block(GenericArray::from_mut_slice(d));
    }
    Ok(())
}

pub fn decrypt_blocks(cipher: &Aes128, dst: &mut [u8], src: &[u8]) -> Result<()> {
    check_lengths(dst, src)?;
    for (d, s) in dst.chunks_mut(BLOCK_SIZE).zip(src.chunks(BLOCK_SIZE)) {
        d.copy_from_slice(s);
        cipher.decrypt_block(GenericArray::from_mut_slice(d));
    }
    Ok(())
}

pub fn encrypt_in_place(cipher: &Aes128, buf: &mut [u8]) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decrypt);
    }
    for block in buf.chunks_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

pub fn decrypt_in_place(cipher: &Aes128, buf: &mut [u8]) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decrypt);
    }
    for block in buf.chunks_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn check_lengths(dst: &[u8], src: &[u8]) -> Result<()> {
    if src.len() > dst.len() || src.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decrypt);
    }
    Ok(())
}
