//! Process-wide TLS engine state
//!
//! The `ring` provider with its random source replaced by the token-backed
//! [`TokenRandom`](crate::bridge::random::TokenRandom). Built once per
//! process on first use and shared by every connection; it is not installed
//! as the process default provider.

use std::sync::Arc;

use once_cell::sync::Lazy;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, SupportedProtocolVersion};

use crate::bridge::random::TOKEN_RANDOM;
use crate::bridge::KeyType;

static PROVIDER: Lazy<Arc<CryptoProvider>> = Lazy::new(|| {
    tracing::debug!("Initializing token-backed TLS crypto provider");
    Arc::new(CryptoProvider {
        secure_random: &TOKEN_RANDOM,
        ..rustls::crypto::ring::default_provider()
    })
});

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_AND_TLS12: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Shared engine provider
pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::clone(&PROVIDER)
}

/// Check that the provider supports the default client stream profile
pub(crate) fn check_client_defaults() -> Result<(), rustls::Error> {
    ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map(|_| ())
}

/// Protocol versions a client identity of `key_type` can sign for
///
/// RSA token keys only do PKCS #1 v1.5, which TLS 1.3 does not allow in
/// `CertificateVerify`.
pub(crate) fn protocol_versions(key_type: KeyType) -> &'static [&'static SupportedProtocolVersion] {
    match key_type {
        KeyType::Rsa => TLS12_ONLY,
        KeyType::Ec | KeyType::Other(_) => TLS13_AND_TLS12,
    }
}
