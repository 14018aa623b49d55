//! Session-id recovery.
//!
//! At login the service returns the account's RSA private key, ECB-sealed
//! under the master key, plus a challenge ciphertext (`csid`). The private
//! key blob is a stream of MPIs, a 16-bit big-endian bit length followed
//! by the magnitude bytes, carrying `p`, `q`, `d` in that order. Decrypting
//! the challenge modulo `n = p*q` and base64url-encoding the first 43
//! plaintext bytes yields the session id sent on every request.

use num_bigint::BigUint;

use mega_codec::{b64url_decode, b64url_encode};
use mega_core::{Error, Result};

use crate::block;
use crate::kdf::MasterKey;
use crate::SESSION_ID_LEN;

/// Read one MPI; returns the integer and the remaining stream.
fn read_mpi(stream: &[u8]) -> Result<(BigUint, &[u8])> {
    if stream.len() < 2 {
        return Err(Error::Decrypt);
    }
    let bits = u16::from_be_bytes([stream[0], stream[1]]) as usize;
    let len = (bits + 7) / 8;
    if stream.len() < 2 + len {
        return Err(Error::Decrypt);
    }
    Ok((BigUint::from_bytes_be(&stream[2..2 + len]), &stream[2 + len..]))
}

/// Parse `p`, `q`, `d` out of a decrypted private-key blob.
fn read_private_key(blob: &[u8]) -> Result<(BigUint, BigUint, BigUint)> {
    let (p, rest) = read_mpi(blob)?;
    let (q, rest) = read_mpi(rest)?;
    let (d, _) = read_mpi(rest)?;
    if p.bits() == 0 || q.bits() == 0 || d.bits() == 0 {
        return Err(Error::Decrypt);
    }
    Ok((p, q, d))
}

/// Recover the session id from the sealed private key and the `csid`
/// challenge, both base64url as received.
pub fn decrypt_session_id(master: &MasterKey, privk: &str, csid: &str) -> Result<String> {
    let sealed = b64url_decode(privk).map_err(|_| Error::Decrypt)?;
    let mut blob = vec![0u8; sealed.len()];
    block::decrypt_blocks(&master.cipher(), &mut blob, &sealed)?;
    let (p, q, d) = read_private_key(&blob)?;

    let challenge = b64url_decode(csid).map_err(|_| Error::Decrypt)?;
    let (c, _) = read_mpi(&challenge)?;

    let n = &p * &q;
    let m = c.modpow(&d, &n);
    let bytes = m.to_bytes_be();
    if bytes.len() < SESSION_ID_LEN {
        return Err(Error::Decrypt);
    }
    Ok(b64url_encode(&bytes[..SESSION_ID_LEN]))
}

/// Sanity-check a sealed private key blob: it must decrypt into three
/// well-formed MPIs. Used when resuming a dumped session.
pub fn verify_private_key(master: &MasterKey, privk: &str) -> Result<()> {
    let sealed = b64url_decode(privk).map_err(|_| Error::Decrypt)?;
    let mut blob = vec![0u8; sealed.len()];
    block::decrypt_blocks(&master.cipher(), &mut blob, &sealed)?;
    read_private_key(&blob).map(|_| ())
}
