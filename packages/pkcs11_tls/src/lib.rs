#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]

//! TLS client transport with a token-resident private key
//!
//! The client's private key never leaves a PKCS #11 style cryptographic
//! token. `rustls` drives the protocol; every handshake signature and all of
//! the engine's randomness are delegated to the token through a narrow
//! operation contract ([`Token`]).
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cryypt_pkcs11_tls::{NetworkCredentials, SoftToken, TlsConnector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let token = SoftToken::new("0000");
//! token.import_certificate("Device Cert", std::fs::read("device.der")?)?;
//! token.import_private_key("Device Priv TLS Key", &std::fs::read("device.key.der")?)?;
//!
//! let root_ca = std::fs::read("root-ca.pem")?;
//! let connector = TlsConnector::new(Arc::new(token));
//! let mut connection = connector.connect(
//!     "broker.example.com",
//!     8883,
//!     &NetworkCredentials::new(root_ca.as_slice()).with_alpn_protocols(["mqtt"]),
//!     Duration::from_secs(5),
//!     Duration::from_secs(5),
//! )?;
//! connection.send(b"hello")?;
//! connection.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
mod certificate;
pub mod config;
pub mod connection;
mod context;
mod engine;
pub mod error;
mod handshake;
pub mod profile;
pub mod provisioning;
mod setup;
pub mod token;
pub mod transport;

pub use bridge::{KeyMetadata, KeyOpError, KeyType, TokenKey};
pub use config::ConnectionConfig;
pub use connection::{NetworkCredentials, TlsConnection, TlsConnector};
pub use error::{Result, TlsTransportError};
pub use profile::{CertProfile, LegacyEndpoint};
pub use provisioning::{load_certificate, ProvisioningError};
pub use token::{SoftToken, Token, TokenError, TokenSession};
pub use transport::{TcpTransport, Transport};
