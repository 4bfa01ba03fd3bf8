//! Engine random source backed by the token
//!
//! The engine's provider wants a `'static` random source, while the token
//! generator is reached through a per-connection session. `TokenRandom` is
//! the single static source; it forwards to whichever key the current
//! thread has bound with [`RandomScope::enter`]. Outside a scope every
//! request fails, so the engine never silently falls back to another RNG.

use std::cell::RefCell;
use std::sync::Arc;

use rustls::crypto::{GetRandomFailed, SecureRandom};

use super::TokenKey;

thread_local! {
    static ACTIVE_KEY: RefCell<Option<Arc<TokenKey>>> = const { RefCell::new(None) };
}

/// Process-wide random source installed in the engine provider
#[derive(Debug)]
pub(crate) struct TokenRandom;

pub(crate) static TOKEN_RANDOM: TokenRandom = TokenRandom;

impl SecureRandom for TokenRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed> {
        ACTIVE_KEY.with(|active| {
            let active = active.borrow();
            let Some(key) = active.as_ref() else {
                tracing::error!("Engine requested randomness with no token session bound");
                return Err(GetRandomFailed);
            };
            key.generate_random(buf).map_err(|e| {
                tracing::error!("Token random generation failed: {}", e);
                GetRandomFailed
            })
        })
    }
}

/// Binds a token key as the engine RNG for the current thread
///
/// The previous binding is restored on drop, so scopes nest.
#[must_use = "the binding ends when the scope is dropped"]
pub(crate) struct RandomScope {
    previous: Option<Arc<TokenKey>>,
}

impl RandomScope {
    pub(crate) fn enter(key: Arc<TokenKey>) -> Self {
        let previous = ACTIVE_KEY.with(|active| active.borrow_mut().replace(key));
        Self { previous }
    }
}

impl Drop for RandomScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_KEY.with(|active| *active.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{SoftToken, Token, TokenSession};
    use secrecy::SecretString;

    fn soft_key() -> Arc<TokenKey> {
        let token = SoftToken::new("0000");
        token
            .import_private_key(
                "Device Priv TLS Key",
                include_bytes!("../../tests/fixtures/client_ec_key.der"),
            )
            .unwrap();
        let token: Arc<dyn Token> = Arc::new(token);
        let session = Arc::new(TokenSession::open(token).unwrap());
        Arc::new(
            TokenKey::resolve(session, "Device Priv TLS Key", Some(&SecretString::from("0000".to_string())))
                .unwrap(),
        )
    }

    #[test]
    fn fails_without_a_bound_key() {
        let mut buf = [0u8; 8];
        assert!(TOKEN_RANDOM.fill(&mut buf).is_err());
    }

    #[test]
    fn scope_binds_and_restores() {
        let key = soft_key();
        let mut buf = [0u8; 32];
        {
            let _scope = RandomScope::enter(Arc::clone(&key));
            TOKEN_RANDOM.fill(&mut buf).unwrap();
            {
                let _inner = RandomScope::enter(soft_key());
                assert!(TOKEN_RANDOM.fill(&mut buf).is_ok());
            }
            assert!(TOKEN_RANDOM.fill(&mut buf).is_ok());
        }
        assert!(TOKEN_RANDOM.fill(&mut buf).is_err());
        assert_eq!(Arc::strong_count(&key), 1);
    }
}
