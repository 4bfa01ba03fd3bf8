//! Certificate parsing into the TLS engine's representation
//!
//! Trust anchors and token-exported client certificates arrive as raw bytes
//! in either PEM (one or more `CERTIFICATE` blocks) or DER form. Both paths
//! end in `CertificateDer` values that have been checked to decode as X.509.
//!
//! - `key_info`: public key algorithm and strength extraction

pub(crate) mod key_info;

use der::Decode;
use rustls::pki_types::CertificateDer;
use x509_cert::Certificate as X509Certificate;

/// Errors produced while turning bytes into certificates
#[derive(Debug, thiserror::Error)]
pub(crate) enum CertificateParseError {
    #[error("no certificate found in input")]
    Empty,
    #[error("PEM decoding failed: {0}")]
    Pem(String),
    #[error("X.509 decoding failed: {0}")]
    X509(String),
}

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// Parse one or more certificates from PEM or DER bytes
pub(crate) fn parse_certificates(
    bytes: &[u8],
) -> Result<Vec<CertificateDer<'static>>, CertificateParseError> {
    // C-string style buffers carry their terminator in the length.
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    if bytes.is_empty() {
        return Err(CertificateParseError::Empty);
    }

    let certs = if contains(bytes, PEM_MARKER) {
        let mut reader = bytes;
        rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertificateParseError::Pem(e.to_string()))?
    } else {
        vec![CertificateDer::from(bytes.to_vec())]
    };

    if certs.is_empty() {
        return Err(CertificateParseError::Empty);
    }
    for cert in &certs {
        decode_x509(cert)?;
    }
    Ok(certs)
}

/// Decode a DER certificate with x509-cert
pub(crate) fn decode_x509(der: &[u8]) -> Result<X509Certificate, CertificateParseError> {
    X509Certificate::from_der(der).map_err(|e| CertificateParseError::X509(e.to_string()))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
