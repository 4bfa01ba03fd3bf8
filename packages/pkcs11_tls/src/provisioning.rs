//! Credential provisioning from the token
//!
//! Certificates are exported with the two-phase attribute protocol: a
//! zero-length size query for the value, an exact allocation, then the read.

use rustls::pki_types::CertificateDer;
use thiserror::Error;

use crate::certificate::parse_certificates;
use crate::token::{AttributeType, ObjectClass, TokenError, TokenSession};

/// Errors of certificate provisioning
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// No object with this label and class is visible to the session
    #[error("No {class:?} object labelled {label:?} on the token")]
    ObjectNotFound {
        /// Label searched for
        label: String,
        /// Class searched for
        class: ObjectClass,
    },

    /// The value buffer could not be allocated
    #[error("Cannot allocate {0} bytes for the object value")]
    InsufficientMemory(usize),

    /// The exported value is not a usable certificate
    #[error("Object value is not a valid certificate: {0}")]
    InvalidCredentials(String),

    /// The token rejected a lookup or read
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

/// Export the certificate(s) stored under `(label, object_class)`
///
/// The object value may be DER or PEM; a PEM value may carry a chain, which
/// is returned leaf first as stored.
///
/// # Errors
///
/// Returns `ObjectNotFound` when the token has no such object,
/// `InsufficientMemory` if the value buffer cannot be allocated,
/// `InvalidCredentials` when the value does not parse and `Token` for any
/// other token failure.
pub fn load_certificate(
    session: &TokenSession,
    label: &str,
    object_class: ObjectClass,
) -> Result<Vec<CertificateDer<'static>>, ProvisioningError> {
    let handle = session.find_object(label, object_class)?;
    if !handle.is_valid() {
        return Err(ProvisioningError::ObjectNotFound {
            label: label.to_string(),
            class: object_class,
        });
    }

    let size = session.attribute_len(handle, AttributeType::Value)?;
    if size == 0 {
        return Err(ProvisioningError::InvalidCredentials(format!(
            "object {label:?} has an empty value"
        )));
    }

    let mut value = Vec::new();
    value
        .try_reserve_exact(size)
        .map_err(|_| ProvisioningError::InsufficientMemory(size))?;
    value.resize(size, 0);

    let written = session.read_attribute(handle, AttributeType::Value, &mut value)?;
    value.truncate(written);

    let chain = parse_certificates(&value)
        .map_err(|e| ProvisioningError::InvalidCredentials(e.to_string()))?;
    tracing::debug!(
        "Loaded {} certificate(s) from token object {:?}",
        chain.len(),
        label
    );
    Ok(chain)
}
