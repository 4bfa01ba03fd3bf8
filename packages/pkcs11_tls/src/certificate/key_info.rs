//! Public key algorithm and strength extraction
//!
//! Used by the certificate acceptance profile to compare a peer's key against
//! the configured minimum strength.

use const_oid::db::rfc5912::{
    ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_224_R_1, SECP_256_R_1, SECP_384_R_1, SECP_521_R_1,
};
use const_oid::db::rfc8410::{ID_ED_25519, ID_ED_448};
use const_oid::ObjectIdentifier;
use der::asn1::UintRef;
use der::{Decode, Sequence, Tag, Tagged};
use x509_cert::Certificate as X509Certificate;

/// Public key family of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyAlgorithm {
    Rsa,
    Ec,
    Ed25519,
    Ed448,
    Unknown,
}

/// Algorithm and size of a certificate's subject public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PublicKeyInfo {
    pub algorithm: KeyAlgorithm,
    /// RSA modulus length or EC field size in bits, when it could be determined
    pub bits: Option<u32>,
}

/// `RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }`
#[derive(Sequence)]
struct RsaPublicKey<'a> {
    modulus: UintRef<'a>,
    public_exponent: UintRef<'a>,
}

/// Extract key algorithm and size from an X.509 certificate
pub(crate) fn public_key_info(cert: &X509Certificate) -> PublicKeyInfo {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    let oid = spki.algorithm.oid;

    if oid == RSA_ENCRYPTION {
        let bits = spki
            .subject_public_key
            .as_bytes()
            .and_then(|key| RsaPublicKey::from_der(key).ok())
            .and_then(|key| compute_bit_length(key.modulus.as_bytes()));
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Rsa,
            bits,
        }
    } else if oid == ID_EC_PUBLIC_KEY {
        let bits = spki
            .algorithm
            .parameters
            .as_ref()
            .filter(|params| params.tag() == Tag::ObjectIdentifier)
            .and_then(|params| ObjectIdentifier::from_bytes(params.value()).ok())
            .and_then(named_curve_bits);
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Ec,
            bits,
        }
    } else if oid == ID_ED_25519 {
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Ed25519,
            bits: Some(256),
        }
    } else if oid == ID_ED_448 {
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Ed448,
            bits: Some(448),
        }
    } else {
        tracing::debug!("Unrecognised public key algorithm {}", oid);
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Unknown,
            bits: None,
        }
    }
}

/// Named curves by field size; the k1 and P-192 arcs are not in the OID database
const NAMED_CURVES: &[(ObjectIdentifier, u32)] = &[
    (ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.1"), 192),
    (ObjectIdentifier::new_unwrap("1.3.132.0.31"), 192),
    (SECP_224_R_1, 224),
    (ObjectIdentifier::new_unwrap("1.3.132.0.32"), 224),
    (SECP_256_R_1, 256),
    (ObjectIdentifier::new_unwrap("1.3.132.0.10"), 256),
    (SECP_384_R_1, 384),
    (SECP_521_R_1, 521),
];

fn named_curve_bits(curve: ObjectIdentifier) -> Option<u32> {
    NAMED_CURVES
        .iter()
        .find(|(oid, _)| *oid == curve)
        .map(|&(_, bits)| bits)
}

/// Compute the bit length of a big-endian byte slice representing a positive integer
fn compute_bit_length(bytes: &[u8]) -> Option<u32> {
    let start = bytes.iter().position(|&b| b != 0)?;
    let effective = &bytes[start..];
    let high_bits = 8u32 - effective[0].leading_zeros();
    let rest_bits = u32::try_from((effective.len() - 1) * 8).ok()?;
    Some(high_bits + rest_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::decode_x509;

    fn info(der: &[u8]) -> PublicKeyInfo {
        public_key_info(&decode_x509(der).unwrap())
    }

    #[test]
    fn reads_rsa_modulus_length() {
        let ca = info(include_bytes!("../../tests/fixtures/ca.der"));
        assert_eq!(ca.algorithm, KeyAlgorithm::Rsa);
        assert_eq!(ca.bits, Some(2048));

        let legacy = info(include_bytes!("../../tests/fixtures/legacy_rsa1024_cert.der"));
        assert_eq!(legacy.bits, Some(1024));
    }

    #[test]
    fn reads_named_curve_size() {
        let server = info(include_bytes!("../../tests/fixtures/server_cert.der"));
        assert_eq!(server.algorithm, KeyAlgorithm::Ec);
        assert_eq!(server.bits, Some(256));
    }

    #[test]
    fn bit_length_ignores_leading_zeros() {
        assert_eq!(compute_bit_length(&[0x00, 0x80, 0x00]), Some(16));
        assert_eq!(compute_bit_length(&[0x01]), Some(1));
        assert_eq!(compute_bit_length(&[0x00, 0x00]), None);
    }
}
