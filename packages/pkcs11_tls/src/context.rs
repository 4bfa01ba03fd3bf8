//! Per-connection session context
//!
//! Owns everything a connection holds on to: engine configuration and
//! connection state, trust anchors, the client chain, the key handle and the
//! token session. Fields drop in declaration order, so the engine state goes
//! first and the token session last.

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use crate::bridge::{KeyMetadata, TokenKey};
use crate::error::{Result, TlsTransportError};
use crate::token::{Token, TokenSession};

pub(crate) struct SessionContext {
    pub(crate) tls: Option<ClientConnection>,
    pub(crate) config: Option<Arc<ClientConfig>>,
    pub(crate) roots: Arc<RootCertStore>,
    pub(crate) chain: Vec<CertificateDer<'static>>,
    pub(crate) key: Option<Arc<TokenKey>>,
    pub(crate) session: Arc<TokenSession>,
}

impl SessionContext {
    /// Empty context with a freshly opened token session
    pub(crate) fn create(token: Arc<dyn Token>) -> Result<Self> {
        let session = TokenSession::open(token)
            .map_err(|e| TlsTransportError::internal(format!("cannot open token session: {e}")))?;
        Ok(Self {
            tls: None,
            config: None,
            roots: Arc::new(RootCertStore::empty()),
            chain: Vec::new(),
            key: None,
            session: Arc::new(session),
        })
    }

    pub(crate) fn key_metadata(&self) -> Option<&KeyMetadata> {
        self.key.as_deref().map(TokenKey::metadata)
    }

    /// Release every resource held by the context, engine state first
    pub(crate) fn destroy(self) {
        let Self {
            tls,
            config,
            roots,
            chain,
            key,
            session,
        } = self;
        tracing::debug!(
            "Releasing session context for token session {} ({} trust anchors, {} client certificates)",
            session.handle().0,
            roots.len(),
            chain.len()
        );
        drop(tls);
        drop(config);
        drop(key);
        drop(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SoftToken;

    #[test]
    fn create_opens_and_destroy_closes_a_session() {
        let token = Arc::new(SoftToken::new("0000"));
        let context = SessionContext::create(Arc::clone(&token) as Arc<dyn Token>).unwrap();
        assert_eq!(token.open_session_count(), 1);
        assert!(context.tls.is_none());
        assert!(context.key_metadata().is_none());

        context.destroy();
        assert_eq!(token.open_session_count(), 0);
    }
}
