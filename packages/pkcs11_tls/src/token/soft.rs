//! In-process software token
//!
//! `SoftToken` implements the [`Token`] contract over key material held in
//! process memory. It behaves like a small PKCS #11 module: sessions are
//! tracked in a session table, private keys become visible only after login,
//! private key values are never readable, and signing is a two-step
//! `sign_init`/`sign` operation with raw mechanisms (no hashing inside the
//! token).
//!
//! It is meant for development and tests; it offers no isolation of the key
//! from the host.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey as _;
use rsa::pkcs8::DecodePrivateKey as _;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use super::{
    AttributeType, Mechanism, ObjectClass, ObjectHandle, SessionHandle, Token, TokenError,
    CKK_EC, CKK_RSA,
};

enum SoftObjectValue {
    Certificate(Vec<u8>),
    RsaKey(Box<RsaPrivateKey>),
    EcKey(Box<SigningKey>),
}

struct SoftObject {
    label: String,
    class: ObjectClass,
    value: SoftObjectValue,
}

impl SoftObject {
    fn is_private(&self) -> bool {
        self.class == ObjectClass::PrivateKey
    }
}

#[derive(Default)]
struct SessionState {
    pending_sign: Option<(Mechanism, ObjectHandle)>,
}

#[derive(Default)]
struct SoftTokenState {
    objects: BTreeMap<u64, SoftObject>,
    next_object: u64,
    sessions: HashMap<u64, SessionState>,
    next_session: u64,
    logged_in: bool,
}

impl SoftTokenState {
    fn session_mut(&mut self, session: SessionHandle) -> Result<&mut SessionState, TokenError> {
        self.sessions
            .get_mut(&session.0)
            .ok_or(TokenError::SessionHandleInvalid)
    }

    fn check_session(&self, session: SessionHandle) -> Result<(), TokenError> {
        if self.sessions.contains_key(&session.0) {
            Ok(())
        } else {
            Err(TokenError::SessionHandleInvalid)
        }
    }

    /// Objects the current login state can see
    fn visible_object(&self, object: ObjectHandle) -> Result<&SoftObject, TokenError> {
        match self.objects.get(&object.0) {
            Some(found) if !found.is_private() || self.logged_in => Ok(found),
            _ => Err(TokenError::ObjectHandleInvalid),
        }
    }

    fn insert(&mut self, object: SoftObject) -> ObjectHandle {
        self.next_object += 1;
        let handle = self.next_object;
        self.objects.insert(handle, object);
        ObjectHandle(handle)
    }
}

/// Software implementation of [`Token`]
pub struct SoftToken {
    user_pin: SecretString,
    state: Mutex<SoftTokenState>,
}

impl SoftToken {
    /// Create an empty token protected by `user_pin`
    pub fn new(user_pin: impl Into<String>) -> Self {
        Self {
            user_pin: SecretString::from(user_pin.into()),
            state: Mutex::new(SoftTokenState::default()),
        }
    }

    /// Store a certificate object (DER or PEM) under `label`
    ///
    /// # Errors
    ///
    /// Returns an error if the token state is unavailable.
    pub fn import_certificate(
        &self,
        label: &str,
        value: impl Into<Vec<u8>>,
    ) -> Result<ObjectHandle, TokenError> {
        let mut state = self.state()?;
        Ok(state.insert(SoftObject {
            label: label.to_string(),
            class: ObjectClass::Certificate,
            value: SoftObjectValue::Certificate(value.into()),
        }))
    }

    /// Store a PKCS #8 DER private key (RSA or ECDSA P-256) under `label`
    ///
    /// # Errors
    ///
    /// Returns `AttributeValueInvalid` if the key is neither an RSA nor a
    /// P-256 key.
    pub fn import_private_key(
        &self,
        label: &str,
        pkcs8_der: &[u8],
    ) -> Result<ObjectHandle, TokenError> {
        let value = if let Ok(key) = RsaPrivateKey::from_pkcs8_der(pkcs8_der) {
            SoftObjectValue::RsaKey(Box::new(key))
        } else if let Ok(key) = SigningKey::from_pkcs8_der(pkcs8_der) {
            SoftObjectValue::EcKey(Box::new(key))
        } else {
            return Err(TokenError::AttributeValueInvalid);
        };

        let mut state = self.state()?;
        Ok(state.insert(SoftObject {
            label: label.to_string(),
            class: ObjectClass::PrivateKey,
            value,
        }))
    }

    /// Number of sessions currently open
    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.state().map(|state| state.sessions.len()).unwrap_or(0)
    }

    fn state(&self) -> Result<MutexGuard<'_, SoftTokenState>, TokenError> {
        self.state
            .lock()
            .map_err(|_| TokenError::Device("token state lock poisoned".to_string()))
    }
}

impl fmt::Debug for SoftToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftToken")
            .field("open_sessions", &self.open_session_count())
            .finish_non_exhaustive()
    }
}

impl Token for SoftToken {
    fn open_session(&self) -> Result<SessionHandle, TokenError> {
        let mut state = self.state()?;
        state.next_session += 1;
        let handle = state.next_session;
        state.sessions.insert(handle, SessionState::default());
        Ok(SessionHandle(handle))
    }

    fn close_session(&self, session: SessionHandle) -> Result<(), TokenError> {
        let mut state = self.state()?;
        state
            .sessions
            .remove(&session.0)
            .ok_or(TokenError::SessionHandleInvalid)?;
        // Login state belongs to the application and ends with its last session.
        if state.sessions.is_empty() {
            state.logged_in = false;
        }
        Ok(())
    }

    fn login(&self, session: SessionHandle, pin: &[u8]) -> Result<(), TokenError> {
        let mut state = self.state()?;
        state.check_session(session)?;
        if state.logged_in {
            return Err(TokenError::UserAlreadyLoggedIn);
        }
        if !bool::from(self.user_pin.expose_secret().as_bytes().ct_eq(pin)) {
            return Err(TokenError::PinIncorrect);
        }
        state.logged_in = true;
        Ok(())
    }

    fn find_object(
        &self,
        session: SessionHandle,
        label: &str,
        class: ObjectClass,
    ) -> Result<ObjectHandle, TokenError> {
        let state = self.state()?;
        state.check_session(session)?;
        let found = state
            .objects
            .iter()
            .filter(|(_, object)| !object.is_private() || state.logged_in)
            .find(|(_, object)| object.class == class && object.label == label)
            .map_or(ObjectHandle::INVALID, |(handle, _)| ObjectHandle(*handle));
        Ok(found)
    }

    fn get_attribute(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        attribute: AttributeType,
        value: Option<&mut [u8]>,
    ) -> Result<usize, TokenError> {
        let state = self.state()?;
        state.check_session(session)?;
        let object = state.visible_object(object)?;

        let attribute_value = match (attribute, &object.value) {
            (AttributeType::Class, _) => object.class.as_raw().to_le_bytes().to_vec(),
            (AttributeType::Label, _) => object.label.as_bytes().to_vec(),
            (AttributeType::Value, SoftObjectValue::Certificate(der)) => der.clone(),
            (AttributeType::Value, _) => return Err(TokenError::AttributeSensitive),
            (AttributeType::KeyType, SoftObjectValue::RsaKey(_)) => CKK_RSA.to_le_bytes().to_vec(),
            (AttributeType::KeyType, SoftObjectValue::EcKey(_)) => CKK_EC.to_le_bytes().to_vec(),
            (AttributeType::KeyType, SoftObjectValue::Certificate(_)) => {
                return Err(TokenError::AttributeTypeInvalid)
            }
        };

        let len = attribute_value.len();
        if let Some(buf) = value {
            let dst = buf.get_mut(..len).ok_or(TokenError::BufferTooSmall)?;
            dst.copy_from_slice(&attribute_value);
        }
        Ok(len)
    }

    fn generate_random(&self, session: SessionHandle, buf: &mut [u8]) -> Result<(), TokenError> {
        self.state()?.check_session(session)?;
        getrandom::fill(buf).map_err(|e| TokenError::Device(format!("entropy source failed: {e}")))
    }

    fn sign_init(
        &self,
        session: SessionHandle,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), TokenError> {
        let mut state = self.state()?;
        state.check_session(session)?;
        if !state.logged_in {
            return Err(TokenError::UserNotLoggedIn);
        }
        let object = state
            .visible_object(key)
            .map_err(|_| TokenError::KeyHandleInvalid)?;
        match (mechanism, &object.value) {
            (Mechanism::RsaPkcs, SoftObjectValue::RsaKey(_))
            | (Mechanism::Ecdsa, SoftObjectValue::EcKey(_)) => {}
            (_, SoftObjectValue::Certificate(_)) => return Err(TokenError::KeyHandleInvalid),
            _ => return Err(TokenError::KeyTypeInconsistent),
        }
        state.session_mut(session)?.pending_sign = Some((mechanism, key));
        Ok(())
    }

    fn sign(
        &self,
        session: SessionHandle,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<usize, TokenError> {
        let mut state = self.state()?;
        let (mechanism, key) = state
            .session_mut(session)?
            .pending_sign
            .take()
            .ok_or(TokenError::OperationNotInitialized)?;
        let object = state
            .visible_object(key)
            .map_err(|_| TokenError::KeyHandleInvalid)?;

        let produced = match (mechanism, &object.value) {
            (Mechanism::RsaPkcs, SoftObjectValue::RsaKey(key)) => key
                .sign(Pkcs1v15Sign::new_unprefixed(), data)
                .map_err(|_| TokenError::FunctionFailed)?,
            (Mechanism::Ecdsa, SoftObjectValue::EcKey(key)) => {
                let raw: Signature = key
                    .sign_prehash(data)
                    .map_err(|_| TokenError::FunctionFailed)?;
                raw.to_bytes().to_vec()
            }
            _ => return Err(TokenError::KeyTypeInconsistent),
        };

        let dst = signature
            .get_mut(..produced.len())
            .ok_or(TokenError::BufferTooSmall)?;
        dst.copy_from_slice(&produced);
        Ok(produced.len())
    }
}
