//! Cryptographic token interface
//!
//! The token holds the client's private key and certificate and performs
//! every private-key operation itself. This module defines the narrow,
//! PKCS #11 shaped contract the transport relies on:
//!
//! - `session`: RAII session handle that closes itself on drop
//! - `soft`: in-process software token for development and tests

use thiserror::Error;

pub mod session;
pub mod soft;

pub use session::TokenSession;
pub use soft::SoftToken;

/// `CKK_RSA` key type value
pub const CKK_RSA: u64 = 0x0000_0000;
/// `CKK_EC` key type value
pub const CKK_EC: u64 = 0x0000_0003;

/// Handle of an open token session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Handle of an object stored on the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

impl ObjectHandle {
    /// `CK_INVALID_HANDLE`
    pub const INVALID: Self = Self(0);

    /// Whether the handle refers to an object at all
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Object classes the transport looks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// `CKO_CERTIFICATE`
    Certificate,
    /// `CKO_PUBLIC_KEY`
    PublicKey,
    /// `CKO_PRIVATE_KEY`
    PrivateKey,
}

impl ObjectClass {
    /// `CK_OBJECT_CLASS` value
    #[must_use]
    pub fn as_raw(self) -> u64 {
        match self {
            Self::Certificate => 0x01,
            Self::PublicKey => 0x02,
            Self::PrivateKey => 0x03,
        }
    }
}

/// Attributes readable through [`Token::get_attribute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    /// `CKA_CLASS`, encoded as a little-endian `u64`
    Class,
    /// `CKA_LABEL`, UTF-8 bytes
    Label,
    /// `CKA_VALUE`, the object's exported value
    Value,
    /// `CKA_KEY_TYPE`, encoded as a little-endian `u64`
    KeyType,
}

/// Signing mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// `CKM_RSA_PKCS`: PKCS #1 v1.5 padding over caller-supplied bytes, no hashing
    RsaPkcs,
    /// `CKM_ECDSA`: ECDSA over a caller-supplied hash, raw `r || s` output
    Ecdsa,
}

/// Token return values other than `CKR_OK`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// `CKR_ARGUMENTS_BAD`
    #[error("arguments bad")]
    ArgumentsBad,
    /// `CKR_FUNCTION_FAILED`
    #[error("function failed")]
    FunctionFailed,
    /// `CKR_HOST_MEMORY`
    #[error("host memory exhausted")]
    HostMemory,
    /// `CKR_SESSION_HANDLE_INVALID`
    #[error("session handle invalid")]
    SessionHandleInvalid,
    /// `CKR_OBJECT_HANDLE_INVALID`
    #[error("object handle invalid")]
    ObjectHandleInvalid,
    /// `CKR_KEY_HANDLE_INVALID`
    #[error("key handle invalid")]
    KeyHandleInvalid,
    /// `CKR_ATTRIBUTE_SENSITIVE`
    #[error("attribute is sensitive and cannot be revealed")]
    AttributeSensitive,
    /// `CKR_ATTRIBUTE_TYPE_INVALID`
    #[error("attribute type invalid")]
    AttributeTypeInvalid,
    /// `CKR_ATTRIBUTE_VALUE_INVALID`
    #[error("attribute value invalid")]
    AttributeValueInvalid,
    /// `CKR_BUFFER_TOO_SMALL`
    #[error("buffer too small")]
    BufferTooSmall,
    /// `CKR_MECHANISM_INVALID`
    #[error("mechanism invalid")]
    MechanismInvalid,
    /// `CKR_KEY_TYPE_INCONSISTENT`
    #[error("key type inconsistent with mechanism")]
    KeyTypeInconsistent,
    /// `CKR_OPERATION_NOT_INITIALIZED`
    #[error("operation not initialized")]
    OperationNotInitialized,
    /// `CKR_PIN_INCORRECT`
    #[error("PIN incorrect")]
    PinIncorrect,
    /// `CKR_USER_NOT_LOGGED_IN`
    #[error("user not logged in")]
    UserNotLoggedIn,
    /// `CKR_USER_ALREADY_LOGGED_IN`
    #[error("user already logged in")]
    UserAlreadyLoggedIn,
    /// `CKR_DEVICE_ERROR` and other device failures, with detail
    #[error("device error: {0}")]
    Device(String),
}

/// Narrow operation contract of a cryptographic token
///
/// Handles are plain values; the token owns all object state and never hands
/// out private key material. Implementations must be usable from any thread,
/// but a single session is only ever driven from one thread at a time.
pub trait Token: Send + Sync {
    /// Open a new session
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot allocate another session.
    fn open_session(&self) -> Result<SessionHandle, TokenError>;

    /// Close a session previously returned by [`Token::open_session`]
    ///
    /// # Errors
    ///
    /// Returns `SessionHandleInvalid` for unknown handles.
    fn close_session(&self, session: SessionHandle) -> Result<(), TokenError>;

    /// Authenticate the normal user
    ///
    /// # Errors
    ///
    /// Returns `PinIncorrect` on a wrong PIN and `UserAlreadyLoggedIn` if the
    /// token is already authenticated.
    fn login(&self, session: SessionHandle, pin: &[u8]) -> Result<(), TokenError>;

    /// Find the object with the given label and class
    ///
    /// Returns [`ObjectHandle::INVALID`] when no object matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is invalid or the search fails.
    fn find_object(
        &self,
        session: SessionHandle,
        label: &str,
        class: ObjectClass,
    ) -> Result<ObjectHandle, TokenError>;

    /// Read an attribute value
    ///
    /// With `value == None` this is a size query and returns the attribute
    /// length. With a buffer it copies the value and returns the bytes written.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` when the buffer cannot hold the value and
    /// `AttributeSensitive` for values that never leave the token.
    fn get_attribute(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        attribute: AttributeType,
        value: Option<&mut [u8]>,
    ) -> Result<usize, TokenError>;

    /// Fill `buf` with random bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the token's generator fails.
    fn generate_random(&self, session: SessionHandle, buf: &mut [u8]) -> Result<(), TokenError>;

    /// Start a signing operation with `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the key or mechanism cannot be used.
    fn sign_init(
        &self,
        session: SessionHandle,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), TokenError>;

    /// Finish the signing operation started by [`Token::sign_init`]
    ///
    /// Returns the signature length written into `signature`.
    ///
    /// # Errors
    ///
    /// Returns `OperationNotInitialized` without a preceding `sign_init` and
    /// `BufferTooSmall` when `signature` is too short.
    fn sign(
        &self,
        session: SessionHandle,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<usize, TokenError>;
}
