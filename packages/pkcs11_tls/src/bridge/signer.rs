//! `rustls` adapters over a token key
//!
//! The engine hands a `Signer` the full handshake message; the token signs a
//! hash, so SHA-256 is computed here and the rest is left to
//! [`TokenKey::sign`]. Every failure becomes `rustls::Error::General` with
//! the token detail logged.

use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::pki_types::CertificateDer;
use rustls::sign::{CertifiedKey, Signer, SigningKey};
use rustls::{SignatureAlgorithm, SignatureScheme};

use super::{KeyType, TokenKey};

/// `rustls` signing key whose private half lives on the token
#[derive(Debug)]
pub(crate) struct TokenSigningKey {
    key: Arc<TokenKey>,
    scheme: SignatureScheme,
}

impl TokenSigningKey {
    /// Wrap `key`; `None` for key types the engine cannot negotiate
    pub(crate) fn new(key: Arc<TokenKey>) -> Option<Self> {
        let scheme = key.metadata().signature_scheme()?;
        Some(Self { key, scheme })
    }
}

impl SigningKey for TokenSigningKey {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        if !offered.contains(&self.scheme) {
            tracing::warn!(
                "Peer did not offer {:?} for the token key, offered {:?}",
                self.scheme,
                offered
            );
            return None;
        }
        Some(Box::new(TokenSigner {
            key: Arc::clone(&self.key),
            scheme: self.scheme,
        }))
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        match self.key.key_type() {
            KeyType::Rsa => SignatureAlgorithm::RSA,
            KeyType::Ec => SignatureAlgorithm::ECDSA,
            KeyType::Other(_) => SignatureAlgorithm::Unknown(0),
        }
    }
}

#[derive(Debug)]
struct TokenSigner {
    key: Arc<TokenKey>,
    scheme: SignatureScheme,
}

impl Signer for TokenSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, rustls::Error> {
        let hash = ring::digest::digest(&ring::digest::SHA256, message);
        self.key.sign(self.scheme, hash.as_ref()).map_err(|e| {
            tracing::error!("Token signing failed: {}", e);
            rustls::Error::General("token signing failed".to_string())
        })
    }

    fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

/// Client identity: the token certificate chain plus the token key
#[derive(Debug)]
pub(crate) struct TokenIdentity {
    certified: Arc<CertifiedKey>,
}

impl TokenIdentity {
    pub(crate) fn new(chain: Vec<CertificateDer<'static>>, signing_key: TokenSigningKey) -> Self {
        Self {
            certified: Arc::new(CertifiedKey::new(chain, Arc::new(signing_key))),
        }
    }
}

impl ResolvesClientCert for TokenIdentity {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.certified))
    }

    fn has_certs(&self) -> bool {
        true
    }
}
