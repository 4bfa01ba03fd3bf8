//! Owned token session
//!
//! A `TokenSession` is opened once per connection and closed exactly once,
//! when the last owner drops it. The session context, the key handle bound
//! into the TLS engine and the random source all share it through `Arc`, so
//! the session outlives every engine object that can still call into it.

use std::fmt;
use std::sync::Arc;

use super::{
    AttributeType, Mechanism, ObjectClass, ObjectHandle, SessionHandle, Token, TokenError,
};

/// An open session on a [`Token`]
pub struct TokenSession {
    token: Arc<dyn Token>,
    handle: SessionHandle,
}

impl TokenSession {
    /// Open a fresh session on `token`
    ///
    /// # Errors
    ///
    /// Returns the token's error if no session can be opened.
    pub fn open(token: Arc<dyn Token>) -> Result<Self, TokenError> {
        let handle = token.open_session()?;
        tracing::debug!("Opened token session {}", handle.0);
        Ok(Self { token, handle })
    }

    /// Raw session handle
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Authenticate the normal user
    ///
    /// # Errors
    ///
    /// Returns the token's login error.
    pub fn login(&self, pin: &[u8]) -> Result<(), TokenError> {
        self.token.login(self.handle, pin)
    }

    /// Resolve `(label, class)` to an object handle
    ///
    /// # Errors
    ///
    /// Returns the token's search error. A missing object is not an error
    /// here; it comes back as [`ObjectHandle::INVALID`].
    pub fn find_object(&self, label: &str, class: ObjectClass) -> Result<ObjectHandle, TokenError> {
        self.token.find_object(self.handle, label, class)
    }

    /// Zero-length query for the size of an attribute value
    ///
    /// # Errors
    ///
    /// Returns the token's attribute error.
    pub fn attribute_len(
        &self,
        object: ObjectHandle,
        attribute: AttributeType,
    ) -> Result<usize, TokenError> {
        self.token.get_attribute(self.handle, object, attribute, None)
    }

    /// Read an attribute value into `buf`, returning the bytes written
    ///
    /// # Errors
    ///
    /// Returns the token's attribute error.
    pub fn read_attribute(
        &self,
        object: ObjectHandle,
        attribute: AttributeType,
        buf: &mut [u8],
    ) -> Result<usize, TokenError> {
        self.token
            .get_attribute(self.handle, object, attribute, Some(buf))
    }

    /// Fill `buf` from the token's random generator
    ///
    /// # Errors
    ///
    /// Returns the token's generator error.
    pub fn generate_random(&self, buf: &mut [u8]) -> Result<(), TokenError> {
        self.token.generate_random(self.handle, buf)
    }

    /// Start a signing operation
    ///
    /// # Errors
    ///
    /// Returns the token's error for unusable keys or mechanisms.
    pub fn sign_init(&self, mechanism: Mechanism, key: ObjectHandle) -> Result<(), TokenError> {
        self.token.sign_init(self.handle, mechanism, key)
    }

    /// Complete the pending signing operation
    ///
    /// # Errors
    ///
    /// Returns the token's signing error.
    pub fn sign(&self, data: &[u8], signature: &mut [u8]) -> Result<usize, TokenError> {
        self.token.sign(self.handle, data, signature)
    }
}

impl fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSession")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Drop for TokenSession {
    fn drop(&mut self) {
        match self.token.close_session(self.handle) {
            Ok(()) => tracing::debug!("Closed token session {}", self.handle.0),
            Err(e) => tracing::warn!("Failed to close token session {}: {}", self.handle.0, e),
        }
    }
}
