//! Key operation bridge
//!
//! Turns the TLS engine's "sign this hash" and "give me randomness" requests
//! into token operations. The engine never sees key material, only a
//! [`TokenKey`]: a token session, the private key's object handle and the
//! cached key type that decides the signing mechanism.
//!
//! - `encoding`: DigestInfo prefixing and raw-to-DER ECDSA conversion
//! - `random`: process-wide engine RNG that dispatches to the active token
//! - `signer`: `rustls` signing-key and client-identity adapters

pub mod encoding;
pub(crate) mod random;
pub(crate) mod signer;

use std::fmt;
use std::sync::Arc;

use rustls::SignatureScheme;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::token::{
    AttributeType, Mechanism, ObjectClass, ObjectHandle, TokenError, TokenSession, CKK_EC,
    CKK_RSA,
};

/// Capacity of the buffer the token writes signatures into
pub const SIGNATURE_CAPACITY: usize = 512;

/// Raw `r || s` length of a P-256 signature
pub const P256_RAW_SIGNATURE_LEN: usize = 64;

/// Errors of the key operation bridge
#[derive(Debug, Error)]
pub enum KeyOpError {
    /// The request cannot be expressed for this key
    #[error("Bad arguments: {0}")]
    ArgumentsBad(String),

    /// The token produced output the engine cannot use
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// No private key with the configured label is visible
    #[error("No private key labelled {0:?} on the token")]
    KeyNotFound(String),

    /// The private key is neither RSA nor EC
    #[error("Unsupported key type {0:#x}")]
    UnsupportedKeyType(u64),

    /// The token rejected the operation
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

/// Private key family as reported by the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// `CKK_RSA`
    Rsa,
    /// `CKK_EC`
    Ec,
    /// Any other `CK_KEY_TYPE` value
    Other(u64),
}

impl KeyType {
    /// Decode a raw `CK_KEY_TYPE` value
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            CKK_RSA => Self::Rsa,
            CKK_EC => Self::Ec,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => f.write_str("RSA"),
            Self::Ec => f.write_str("EC"),
            Self::Other(raw) => write!(f, "key type {raw:#x}"),
        }
    }
}

/// Cached facts about the bound private key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMetadata {
    /// Key family, which selects the signing mechanism
    pub key_type: KeyType,
    /// Raw signature length the token must return for EC keys
    pub ec_raw_signature_len: usize,
}

impl KeyMetadata {
    /// Metadata for a key of `key_type`
    ///
    /// EC keys are P-256, the only curve the token profile provisions.
    #[must_use]
    pub fn for_key_type(key_type: KeyType) -> Self {
        Self {
            key_type,
            ec_raw_signature_len: P256_RAW_SIGNATURE_LEN,
        }
    }

    /// Signature scheme the engine should negotiate for this key
    #[must_use]
    pub fn signature_scheme(&self) -> Option<SignatureScheme> {
        match self.key_type {
            KeyType::Rsa => Some(SignatureScheme::RSA_PKCS1_SHA256),
            KeyType::Ec => Some(SignatureScheme::ECDSA_NISTP256_SHA256),
            KeyType::Other(_) => None,
        }
    }
}

/// Opaque private key capability backed by a token object
#[derive(Debug)]
pub struct TokenKey {
    session: Arc<TokenSession>,
    handle: ObjectHandle,
    metadata: KeyMetadata,
}

impl TokenKey {
    /// Log in, find the private key labelled `label` and cache its type
    ///
    /// # Errors
    ///
    /// Returns `Token` if login or a lookup fails, `KeyNotFound` if no key
    /// carries the label and `UnsupportedKeyType` for keys that are neither
    /// RSA nor EC.
    pub fn resolve(
        session: Arc<TokenSession>,
        label: &str,
        user_pin: Option<&SecretString>,
    ) -> Result<Self, KeyOpError> {
        if let Some(pin) = user_pin {
            match session.login(pin.expose_secret().as_bytes()) {
                Ok(()) => tracing::debug!("Logged in to token session {}", session.handle().0),
                Err(TokenError::UserAlreadyLoggedIn) => {
                    tracing::debug!("Token already logged in");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let handle = session.find_object(label, ObjectClass::PrivateKey)?;
        if !handle.is_valid() {
            return Err(KeyOpError::KeyNotFound(label.to_string()));
        }

        let mut raw = [0u8; 8];
        let len = session.read_attribute(handle, AttributeType::KeyType, &mut raw)?;
        if len != raw.len() {
            return Err(KeyOpError::OperationFailed(format!(
                "key type attribute has {len} bytes, expected {}",
                raw.len()
            )));
        }

        let key_type = KeyType::from_raw(u64::from_le_bytes(raw));
        if let KeyType::Other(raw) = key_type {
            return Err(KeyOpError::UnsupportedKeyType(raw));
        }

        tracing::debug!("Resolved {} private key {:?} as object {}", key_type, label, handle.0);
        Ok(Self {
            session,
            handle,
            metadata: KeyMetadata::for_key_type(key_type),
        })
    }

    /// Cached key metadata
    #[must_use]
    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    /// Key family
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.metadata.key_type
    }

    /// Fill `buf` from the token's random generator
    ///
    /// # Errors
    ///
    /// Returns `Token` if the generator fails.
    pub fn generate_random(&self, buf: &mut [u8]) -> Result<(), KeyOpError> {
        self.session.generate_random(buf)?;
        Ok(())
    }

    /// Sign `hash` with the token key
    ///
    /// The mechanism follows the cached key type; `_digest_hint` only
    /// records what the engine asked for. RSA signatures come back as the
    /// token produced them, ECDSA signatures are re-encoded as DER.
    ///
    /// # Errors
    ///
    /// Returns `ArgumentsBad` for oversized hashes or unsupported key types
    /// (without touching the token), `Token` if `sign_init` or `sign` fails
    /// and `OperationFailed` if the token's output has the wrong shape.
    pub fn sign(
        &self,
        _digest_hint: SignatureScheme,
        hash: &[u8],
    ) -> Result<Vec<u8>, KeyOpError> {
        let (mechanism, to_be_signed) = match self.metadata.key_type {
            KeyType::Rsa => (Mechanism::RsaPkcs, encoding::digest_info_sha256(hash)?),
            KeyType::Ec => (Mechanism::Ecdsa, encoding::raw_hash(hash)?),
            KeyType::Other(raw) => {
                return Err(KeyOpError::ArgumentsBad(format!(
                    "no signing mechanism for key type {raw:#x}"
                )))
            }
        };

        self.session.sign_init(mechanism, self.handle)?;
        let mut signature = [0u8; SIGNATURE_CAPACITY];
        let len = self.session.sign(&to_be_signed, &mut signature)?;
        let produced = signature.get(..len).ok_or_else(|| {
            KeyOpError::OperationFailed(format!(
                "token reported {len} signature bytes, buffer holds {SIGNATURE_CAPACITY}"
            ))
        })?;

        match self.metadata.key_type {
            KeyType::Ec => encoding::ecdsa_raw_to_der(produced, self.metadata.ec_raw_signature_len),
            _ => Ok(produced.to_vec()),
        }
    }
}
