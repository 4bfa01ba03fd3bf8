//! Certificate acceptance profile
//!
//! Minimum key strength for every certificate the server presents, applied
//! on top of the engine's own chain validation. A profile can only be
//! relaxed for endpoints listed explicitly in the connection configuration.

use std::iter;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{VerifierBuilderError, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::certificate::decode_x509;
use crate::certificate::key_info::{public_key_info, KeyAlgorithm, PublicKeyInfo};

/// Minimum accepted key sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertProfile {
    /// Smallest accepted RSA modulus in bits
    pub rsa_min_bits: u32,
    /// Smallest accepted EC curve size in bits
    pub ec_min_bits: u32,
}

impl Default for CertProfile {
    fn default() -> Self {
        Self {
            rsa_min_bits: 2048,
            ec_min_bits: 256,
        }
    }
}

impl CertProfile {
    /// Whether a key with `info` meets this profile
    pub(crate) fn permits(&self, info: PublicKeyInfo) -> bool {
        match (info.algorithm, info.bits) {
            (KeyAlgorithm::Rsa, Some(bits)) => bits >= self.rsa_min_bits,
            (KeyAlgorithm::Ec, Some(bits)) => bits >= self.ec_min_bits,
            (KeyAlgorithm::Rsa | KeyAlgorithm::Ec, None) => false,
            // Edwards curves are fixed-size; anything else is left to the engine.
            (KeyAlgorithm::Ed25519 | KeyAlgorithm::Ed448 | KeyAlgorithm::Unknown, _) => true,
        }
    }
}

/// Endpoint allowed to present weaker RSA keys than the profile permits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEndpoint {
    /// Hostname, matched exactly and case-insensitively
    pub hostname: String,
    /// RSA modulus floor for this endpoint
    pub rsa_min_bits: u32,
}

impl LegacyEndpoint {
    /// Allow `hostname` to present RSA keys of at least `rsa_min_bits`
    pub fn new(hostname: impl Into<String>, rsa_min_bits: u32) -> Self {
        Self {
            hostname: hostname.into(),
            rsa_min_bits,
        }
    }
}

/// Profile to enforce for a connection to `hostname`
fn effective_profile(
    base: CertProfile,
    legacy_endpoints: &[LegacyEndpoint],
    hostname: &str,
) -> CertProfile {
    match legacy::relaxation(legacy_endpoints, hostname) {
        Some(endpoint) => {
            let rsa_min_bits = endpoint.rsa_min_bits.min(base.rsa_min_bits);
            tracing::warn!(
                "Relaxing RSA minimum to {} bits for legacy endpoint {}",
                rsa_min_bits,
                hostname
            );
            CertProfile {
                rsa_min_bits,
                ..base
            }
        }
        None => base,
    }
}

/// Verifier for a connection to `hostname`
///
/// Allowlisted endpoints relaxed below the engine's 2048-bit RSA floor also
/// get legacy RSA signature verification, so their chains can validate.
pub(crate) fn server_verifier(
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
    base: CertProfile,
    legacy_endpoints: &[LegacyEndpoint],
    hostname: &str,
) -> Result<ProfileVerifier, VerifierBuilderError> {
    let profile = effective_profile(base, legacy_endpoints, hostname);
    let provider = if profile.rsa_min_bits < legacy::ENGINE_RSA_FLOOR {
        legacy::with_legacy_rsa(&provider)
    } else {
        provider
    };
    ProfileVerifier::new(roots, provider, profile)
}

mod legacy {
    use std::sync::Arc;

    use once_cell::sync::Lazy;
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY};
    use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
    use rustls::pki_types::{alg_id, AlgorithmIdentifier, InvalidSignature, SignatureVerificationAlgorithm};
    use rustls::SignatureScheme;

    use super::LegacyEndpoint;

    /// Smallest RSA modulus the engine's own verification algorithms accept
    pub(super) const ENGINE_RSA_FLOOR: u32 = 2048;

    /// Allowlist entry for `hostname`, if any
    pub(super) fn relaxation<'a>(
        legacy_endpoints: &'a [LegacyEndpoint],
        hostname: &str,
    ) -> Option<&'a LegacyEndpoint> {
        legacy_endpoints
            .iter()
            .find(|endpoint| endpoint.hostname.eq_ignore_ascii_case(hostname))
    }

    /// `sha256WithRSAEncryption` for 1024 to 8192 bit moduli
    #[derive(Debug)]
    struct LegacyRsaPkcs1Sha256;

    impl SignatureVerificationAlgorithm for LegacyRsaPkcs1Sha256 {
        fn verify_signature(
            &self,
            public_key: &[u8],
            message: &[u8],
            signature: &[u8],
        ) -> Result<(), InvalidSignature> {
            UnparsedPublicKey::new(&RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY, public_key)
                .verify(message, signature)
                .map_err(|_| InvalidSignature)
        }

        fn public_key_alg_id(&self) -> AlgorithmIdentifier {
            alg_id::RSA_ENCRYPTION
        }

        fn signature_alg_id(&self) -> AlgorithmIdentifier {
            alg_id::RSA_PKCS1_SHA256
        }
    }

    static LEGACY_RSA_PKCS1_SHA256: &[&dyn SignatureVerificationAlgorithm] =
        &[&LegacyRsaPkcs1Sha256];

    fn engine_algorithms() -> WebPkiSupportedAlgorithms {
        rustls::crypto::ring::default_provider().signature_verification_algorithms
    }

    // The engine verifier stops at the first algorithm whose identifiers
    // match, so the legacy one has to come first.
    static ALL: Lazy<Vec<&'static dyn SignatureVerificationAlgorithm>> = Lazy::new(|| {
        LEGACY_RSA_PKCS1_SHA256
            .iter()
            .chain(engine_algorithms().all)
            .copied()
            .collect()
    });

    static MAPPING: Lazy<Vec<(SignatureScheme, &'static [&'static dyn SignatureVerificationAlgorithm])>> =
        Lazy::new(|| {
            engine_algorithms()
                .mapping
                .iter()
                .map(|&(scheme, algorithms)| match scheme {
                    SignatureScheme::RSA_PKCS1_SHA256 => (scheme, LEGACY_RSA_PKCS1_SHA256),
                    _ => (scheme, algorithms),
                })
                .collect()
        });

    /// `provider` with legacy RSA PKCS #1 SHA-256 verification added
    pub(super) fn with_legacy_rsa(provider: &CryptoProvider) -> Arc<CryptoProvider> {
        Arc::new(CryptoProvider {
            signature_verification_algorithms: WebPkiSupportedAlgorithms {
                all: ALL.as_slice(),
                mapping: MAPPING.as_slice(),
            },
            ..provider.clone()
        })
    }
}

/// Full WebPKI verification followed by the key strength profile
#[derive(Debug)]
pub(crate) struct ProfileVerifier {
    inner: Arc<WebPkiServerVerifier>,
    profile: CertProfile,
}

impl ProfileVerifier {
    pub(crate) fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
        profile: CertProfile,
    ) -> Result<Self, VerifierBuilderError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider).build()?;
        Ok(Self { inner, profile })
    }

    fn check_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<(), rustls::Error> {
        for cert in iter::once(end_entity).chain(intermediates) {
            let parsed = decode_x509(cert).map_err(|e| {
                tracing::warn!("Cannot inspect server certificate: {}", e);
                rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
            })?;
            let info = public_key_info(&parsed);
            if !self.profile.permits(info) {
                tracing::warn!(
                    "Server certificate {} key {:?} ({:?} bits) is below the acceptance profile",
                    parsed.tbs_certificate.subject,
                    info.algorithm,
                    info.bits
                );
                return Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ));
            }
        }
        Ok(())
    }
}

impl ServerCertVerifier for ProfileVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;
        self.check_chain(end_entity, intermediates)?;
        tracing::debug!("Certificate profile check passed for {:?}", server_name);
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &[u8] = include_bytes!("../tests/fixtures/ca.der");
    const SERVER: &[u8] = include_bytes!("../tests/fixtures/server_cert.der");
    const LEGACY: &[u8] = include_bytes!("../tests/fixtures/legacy_rsa1024_cert.der");
    const LEGACY_ROOT_PEM: &[u8] = include_bytes!("../tests/fixtures/legacy_ca.pem");
    const LEGACY_ROOT_SERVER: &[u8] = include_bytes!("../tests/fixtures/legacy_server_cert.der");

    fn verifier(profile: CertProfile) -> ProfileVerifier {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(CA)).unwrap();
        ProfileVerifier::new(
            Arc::new(roots),
            Arc::new(rustls::crypto::ring::default_provider()),
            profile,
        )
        .unwrap()
    }

    #[test]
    fn default_profile_rejects_short_rsa() {
        let verifier = verifier(CertProfile::default());
        assert!(verifier.check_chain(&CertificateDer::from(SERVER), &[]).is_ok());
        assert!(verifier
            .check_chain(&CertificateDer::from(SERVER), &[CertificateDer::from(CA)])
            .is_ok());
        assert!(matches!(
            verifier.check_chain(&CertificateDer::from(LEGACY), &[]),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure
            ))
        ));
    }

    #[test]
    fn intermediates_are_checked_too() {
        let verifier = verifier(CertProfile {
            rsa_min_bits: 4096,
            ec_min_bits: 256,
        });
        assert!(verifier
            .check_chain(&CertificateDer::from(SERVER), &[CertificateDer::from(CA)])
            .is_err());
    }

    #[test]
    fn full_verification_then_profile() {
        let name = ServerName::try_from("localhost").unwrap();
        let server = CertificateDer::from(SERVER);

        verifier(CertProfile::default())
            .verify_server_cert(&server, &[], &name, &[], UnixTime::now())
            .unwrap();

        let strict = verifier(CertProfile {
            rsa_min_bits: 2048,
            ec_min_bits: 384,
        });
        assert!(matches!(
            strict.verify_server_cert(&server, &[], &name, &[], UnixTime::now()),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure
            ))
        ));

        let wrong_name = ServerName::try_from("example.com").unwrap();
        assert!(verifier(CertProfile::default())
            .verify_server_cert(&server, &[], &wrong_name, &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn legacy_relaxation_needs_an_exact_hostname_match() {
        let legacy = [LegacyEndpoint::new("Legacy.Example.com", 1024)];
        let base = CertProfile::default();

        let relaxed = effective_profile(base, &legacy, "legacy.example.com");
        assert_eq!(relaxed.rsa_min_bits, 1024);
        assert_eq!(relaxed.ec_min_bits, base.ec_min_bits);

        assert_eq!(effective_profile(base, &legacy, "example.com"), base);
        assert_eq!(effective_profile(base, &legacy, "other.legacy.example.com"), base);
        assert_eq!(effective_profile(base, &[], "legacy.example.com"), base);
    }

    #[test]
    fn legacy_entries_never_tighten_the_profile() {
        let legacy = [LegacyEndpoint::new("legacy.example.com", 4096)];
        let base = CertProfile::default();
        assert_eq!(effective_profile(base, &legacy, "legacy.example.com"), base);
    }

    fn legacy_root_verifier(legacy_endpoints: &[LegacyEndpoint]) -> ProfileVerifier {
        let mut roots = RootCertStore::empty();
        for cert in crate::certificate::parse_certificates(LEGACY_ROOT_PEM).unwrap() {
            roots.add(cert).unwrap();
        }
        server_verifier(
            Arc::new(roots),
            Arc::new(rustls::crypto::ring::default_provider()),
            CertProfile::default(),
            legacy_endpoints,
            "localhost",
        )
        .unwrap()
    }

    #[test]
    fn weak_root_signature_needs_an_allowlist_entry() {
        let name = ServerName::try_from("localhost").unwrap();
        let server = CertificateDer::from(LEGACY_ROOT_SERVER);

        assert!(legacy_root_verifier(&[])
            .verify_server_cert(&server, &[], &name, &[], UnixTime::now())
            .is_err());

        legacy_root_verifier(&[LegacyEndpoint::new("localhost", 1024)])
            .verify_server_cert(&server, &[], &name, &[], UnixTime::now())
            .unwrap();

        // An entry that keeps the 2048-bit floor grants nothing.
        assert!(legacy_root_verifier(&[LegacyEndpoint::new("localhost", 2048)])
            .verify_server_cert(&server, &[], &name, &[], UnixTime::now())
            .is_err());
    }
}
