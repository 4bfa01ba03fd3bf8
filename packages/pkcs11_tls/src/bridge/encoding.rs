//! Wire-format conversions between the TLS engine and the token
//!
//! The token's RSA mechanism pads whatever bytes it receives, so the SHA-256
//! `DigestInfo` header has to be prepended here. Its ECDSA mechanism returns
//! a raw `r || s` pair, which the engine only accepts as a DER
//! `Ecdsa-Sig-Value`.

use der::asn1::UintRef;
use der::{Encode, Sequence};

use super::KeyOpError;

/// Capacity of the hash working buffer
pub const HASH_CAPACITY: usize = 256;

/// `DigestInfo` header identifying SHA-256 (RFC 8017, section 9.2, note 1)
pub const SHA256_DIGEST_INFO_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

/// Capacity of the to-be-signed buffer handed to the token
pub const TO_BE_SIGNED_CAPACITY: usize = SHA256_DIGEST_INFO_PREFIX.len() + HASH_CAPACITY;

/// Bytes handed to the token's sign primitive
pub type ToBeSigned = heapless::Vec<u8, TO_BE_SIGNED_CAPACITY>;

/// `Ecdsa-Sig-Value ::= SEQUENCE { r INTEGER, s INTEGER }`
#[derive(Debug, Sequence)]
pub(crate) struct EcdsaSigValue<'a> {
    pub r: UintRef<'a>,
    pub s: UintRef<'a>,
}

/// Prefix `hash` with the SHA-256 `DigestInfo` header
///
/// # Errors
///
/// Returns `ArgumentsBad` if `hash` exceeds [`HASH_CAPACITY`].
pub fn digest_info_sha256(hash: &[u8]) -> Result<ToBeSigned, KeyOpError> {
    check_hash_len(hash)?;
    let mut to_be_signed = ToBeSigned::new();
    to_be_signed
        .extend_from_slice(&SHA256_DIGEST_INFO_PREFIX)
        .and_then(|()| to_be_signed.extend_from_slice(hash))
        .map_err(|()| KeyOpError::ArgumentsBad(format!("{} byte hash overflows buffer", hash.len())))?;
    Ok(to_be_signed)
}

/// Copy a raw hash for the ECDSA mechanism
///
/// # Errors
///
/// Returns `ArgumentsBad` if `hash` exceeds [`HASH_CAPACITY`].
pub fn raw_hash(hash: &[u8]) -> Result<ToBeSigned, KeyOpError> {
    check_hash_len(hash)?;
    ToBeSigned::from_slice(hash)
        .map_err(|()| KeyOpError::ArgumentsBad(format!("{} byte hash overflows buffer", hash.len())))
}

/// Re-encode a raw `r || s` ECDSA signature as DER
///
/// `expected_len` is the raw signature length of the key's curve (64 for
/// P-256); any other length is rejected without attempting a conversion.
///
/// # Errors
///
/// Returns `OperationFailed` on a length mismatch or encoding failure.
pub fn ecdsa_raw_to_der(raw: &[u8], expected_len: usize) -> Result<Vec<u8>, KeyOpError> {
    if raw.len() != expected_len || expected_len % 2 != 0 {
        return Err(KeyOpError::OperationFailed(format!(
            "token returned a {} byte ECDSA signature, expected {}",
            raw.len(),
            expected_len
        )));
    }

    let (r, s) = raw.split_at(expected_len / 2);
    let encode_failed = |e: der::Error| KeyOpError::OperationFailed(format!("DER encoding failed: {e}"));
    let value = EcdsaSigValue {
        r: UintRef::new(r).map_err(encode_failed)?,
        s: UintRef::new(s).map_err(encode_failed)?,
    };
    value.to_der().map_err(encode_failed)
}

fn check_hash_len(hash: &[u8]) -> Result<(), KeyOpError> {
    if hash.len() > HASH_CAPACITY {
        return Err(KeyOpError::ArgumentsBad(format!(
            "{} byte hash exceeds the {} byte working buffer",
            hash.len(),
            HASH_CAPACITY
        )));
    }
    Ok(())
}
