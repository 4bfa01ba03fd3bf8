//! Session setup pipeline
//!
//! Builds the engine configuration around the token identity and drives the
//! handshake. Stages run in order and stop at the first failure; each stage
//! classifies its own error and any failure releases the whole context.

use std::sync::Arc;
use std::time::Instant;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use crate::bridge::random::RandomScope;
use crate::bridge::signer::{TokenIdentity, TokenSigningKey};
use crate::bridge::TokenKey;
use crate::certificate::parse_certificates;
use crate::config::ConnectionConfig;
use crate::connection::NetworkCredentials;
use crate::context::SessionContext;
use crate::engine;
use crate::error::{Result, TlsTransportError};
use crate::handshake;
use crate::profile;
use crate::provisioning;
use crate::token::{ObjectClass, Token};
use crate::transport::Transport;

/// Longest protocol name ALPN can carry
const MAX_ALPN_PROTOCOL_LEN: usize = 255;

/// Establish a TLS session with the token identity over `transport`
pub(crate) fn establish<T: Transport>(
    token: &Arc<dyn Token>,
    config: &ConnectionConfig,
    transport: &mut T,
    hostname: &str,
    credentials: &NetworkCredentials<'_>,
) -> Result<SessionContext> {
    let mut context = SessionContext::create(Arc::clone(token))?;
    match run(&mut context, config, transport, hostname, credentials) {
        Ok(()) => Ok(context),
        Err(e) => {
            tracing::warn!("TLS session setup for {} failed: {}", hostname, e);
            context.destroy();
            Err(e)
        }
    }
}

fn run<T: Transport>(
    context: &mut SessionContext,
    config: &ConnectionConfig,
    transport: &mut T,
    hostname: &str,
    credentials: &NetworkCredentials<'_>,
) -> Result<()> {
    engine::check_client_defaults().map_err(|e| {
        TlsTransportError::insufficient_memory(format!("client defaults unavailable: {e}"))
    })?;

    context.roots = Arc::new(trust_anchors(&credentials.root_ca)?);
    let verifier = profile::server_verifier(
        Arc::clone(&context.roots),
        engine::provider(),
        config.cert_profile,
        &config.legacy_endpoints,
        hostname,
    )
    .map_err(|e| TlsTransportError::invalid_credentials(format!("trust anchors unusable: {e}")))?;

    let key = TokenKey::resolve(
        Arc::clone(&context.session),
        &config.private_key_label,
        config.user_pin.as_ref(),
    )
    .map_err(|e| TlsTransportError::invalid_credentials(format!("client key unavailable: {e}")))?;
    let key = Arc::new(key);
    context.key = Some(Arc::clone(&key));
    let signing_key = TokenSigningKey::new(Arc::clone(&key)).ok_or_else(|| {
        TlsTransportError::invalid_credentials(format!("{} keys cannot sign TLS handshakes", key.key_type()))
    })?;

    context.chain = provisioning::load_certificate(
        &context.session,
        &config.certificate_label,
        ObjectClass::Certificate,
    )
    .map_err(|e| TlsTransportError::invalid_credentials(format!("client certificate unavailable: {e}")))?;

    let mut client_config = ClientConfig::builder_with_provider(engine::provider())
        .with_protocol_versions(engine::protocol_versions(key.key_type()))
        .map_err(|e| TlsTransportError::internal(format!("protocol versions rejected: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_cert_resolver(Arc::new(TokenIdentity::new(context.chain.clone(), signing_key)));

    if let Some(protocols) = &credentials.alpn_protocols {
        validate_alpn(protocols)?;
        client_config.alpn_protocols.clone_from(protocols);
    }
    client_config.enable_sni = !credentials.disable_sni;
    let client_config = Arc::new(client_config);
    context.config = Some(Arc::clone(&client_config));

    // Client random and session id come from the token from here on.
    let _random = RandomScope::enter(Arc::clone(&key));

    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| TlsTransportError::internal(format!("invalid server name {hostname:?}: {e}")))?;
    let tls = context.tls.insert(
        ClientConnection::new(client_config, server_name)
            .map_err(|e| TlsTransportError::internal(format!("engine connection setup failed: {e}")))?,
    );

    if credentials.disable_sni {
        tracing::debug!("SNI disabled for {}", hostname);
    }

    let deadline = Instant::now() + config.handshake_timeout;
    handshake::drive(tls, transport, deadline)?;
    tracing::info!(
        "TLS session with {} established ({:?}, {:?})",
        hostname,
        tls.protocol_version(),
        tls.negotiated_cipher_suite().map(|suite| suite.suite())
    );
    Ok(())
}

fn trust_anchors(root_ca: &[u8]) -> Result<RootCertStore> {
    let certs = parse_certificates(root_ca)
        .map_err(|e| TlsTransportError::invalid_credentials(format!("trust anchors: {e}")))?;
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| TlsTransportError::invalid_credentials(format!("trust anchor rejected: {e}")))?;
    }
    Ok(roots)
}

fn validate_alpn(protocols: &[Vec<u8>]) -> Result<()> {
    match protocols
        .iter()
        .find(|protocol| protocol.is_empty() || protocol.len() > MAX_ALPN_PROTOCOL_LEN)
    {
        Some(protocol) => Err(TlsTransportError::internal(format!(
            "ALPN protocol of {} bytes rejected",
            protocol.len()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_anchors_accept_pem_and_reject_garbage() {
        let roots = trust_anchors(include_bytes!("../tests/fixtures/ca.pem")).unwrap();
        assert_eq!(roots.len(), 1);
        assert!(matches!(
            trust_anchors(b"-----BEGIN CERTIFICATE-----\nnope\n-----END CERTIFICATE-----\n"),
            Err(TlsTransportError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn alpn_entries_must_fit_the_wire_format() {
        assert!(validate_alpn(&[b"h2".to_vec(), b"mqtt".to_vec()]).is_ok());
        assert!(matches!(
            validate_alpn(&[Vec::new()]),
            Err(TlsTransportError::InternalError(_))
        ));
        assert!(validate_alpn(&[vec![b'x'; 256]]).is_err());
    }
}
