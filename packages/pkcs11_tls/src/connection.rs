//! Connection lifecycle
//!
//! [`TlsConnector`] owns the token and configuration and opens
//! [`TlsConnection`]s. A connection is used from one thread at a time and is
//! torn down with [`TlsConnection::disconnect`].

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConnection, ProtocolVersion};

use crate::bridge::random::RandomScope;
use crate::bridge::KeyType;
use crate::config::ConnectionConfig;
use crate::context::SessionContext;
use crate::error::{Result, TlsTransportError};
use crate::setup;
use crate::token::Token;
use crate::transport::{is_retryable, TcpTransport, Transport};

/// Caller-supplied trust material and handshake options
///
/// Only read during setup; nothing is retained afterwards.
#[derive(Debug, Clone)]
pub struct NetworkCredentials<'a> {
    /// Trust anchors, PEM (one or more certificates) or DER
    pub root_ca: Cow<'a, [u8]>,
    /// ALPN protocols to offer, in preference order
    pub alpn_protocols: Option<Vec<Vec<u8>>>,
    /// Omit the server name indication
    pub disable_sni: bool,
}

impl<'a> NetworkCredentials<'a> {
    /// Credentials trusting `root_ca`, with SNI and no ALPN
    pub fn new(root_ca: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            root_ca: root_ca.into(),
            alpn_protocols: None,
            disable_sni: false,
        }
    }

    /// Offer `protocols` via ALPN
    #[must_use]
    pub fn with_alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        self.alpn_protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    /// Do not send the server name indication
    #[must_use]
    pub fn without_sni(mut self) -> Self {
        self.disable_sni = true;
        self
    }

    /// Detach from borrowed trust material
    #[must_use]
    pub fn into_owned(self) -> NetworkCredentials<'static> {
        NetworkCredentials {
            root_ca: Cow::Owned(self.root_ca.into_owned()),
            alpn_protocols: self.alpn_protocols,
            disable_sni: self.disable_sni,
        }
    }
}

/// Opens token-authenticated TLS connections
#[derive(Clone)]
pub struct TlsConnector {
    token: Arc<dyn Token>,
    config: Arc<ConnectionConfig>,
}

impl TlsConnector {
    /// Connector with the default configuration
    pub fn new(token: Arc<dyn Token>) -> Self {
        Self::with_config(token, ConnectionConfig::default())
    }

    /// Connector with `config`
    pub fn with_config(token: Arc<dyn Token>, config: ConnectionConfig) -> Self {
        Self {
            token,
            config: Arc::new(config),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect over TCP to `hostname:port` and establish a TLS session
    ///
    /// Zero timeouts disable the corresponding socket timeout.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty hostname or trust anchor,
    /// `ConnectFailure` if no address accepts the connection, otherwise the
    /// classification of the failing setup stage. The socket is closed on
    /// every failure.
    pub fn connect(
        &self,
        hostname: &str,
        port: u16,
        credentials: &NetworkCredentials<'_>,
        recv_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<TlsConnection<TcpTransport>> {
        check_parameters(hostname, credentials)?;
        let transport = TcpTransport::connect(
            hostname,
            port,
            recv_timeout,
            send_timeout,
            self.config.connect_timeout,
        )
        .map_err(|e| {
            tracing::error!("Failed to connect to {}:{}: {}", hostname, port, e);
            TlsTransportError::connect_failure(format!("{hostname}:{port}: {e}"))
        })?;
        self.connect_with_transport(transport, hostname, credentials)
    }

    /// Establish a TLS session over an already connected transport
    ///
    /// # Errors
    ///
    /// As [`TlsConnector::connect`], without `ConnectFailure`. The transport
    /// is closed on every failure.
    pub fn connect_with_transport<T: Transport>(
        &self,
        mut transport: T,
        hostname: &str,
        credentials: &NetworkCredentials<'_>,
    ) -> Result<TlsConnection<T>> {
        let established = check_parameters(hostname, credentials).and_then(|()| {
            setup::establish(&self.token, &self.config, &mut transport, hostname, credentials)
        });
        match established {
            Ok(context) => Ok(TlsConnection {
                transport,
                context,
                hostname: hostname.to_string(),
            }),
            Err(e) => {
                if let Err(close_err) = transport.close() {
                    tracing::debug!("Closing transport after failed setup: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// [`TlsConnector::connect`] on a blocking worker thread
    ///
    /// # Errors
    ///
    /// As [`TlsConnector::connect`]; `InternalError` if the worker dies.
    pub async fn connect_async(
        &self,
        hostname: String,
        port: u16,
        credentials: NetworkCredentials<'static>,
        recv_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<TlsConnection<TcpTransport>> {
        let connector = self.clone();
        tokio::task::spawn_blocking(move || {
            connector.connect(&hostname, port, &credentials, recv_timeout, send_timeout)
        })
        .await
        .map_err(|e| TlsTransportError::internal(format!("connect worker failed: {e}")))?
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn check_parameters(hostname: &str, credentials: &NetworkCredentials<'_>) -> Result<()> {
    if hostname.is_empty() {
        return Err(TlsTransportError::invalid_parameter("hostname is required"));
    }
    if credentials.root_ca.is_empty() {
        return Err(TlsTransportError::invalid_parameter("root CA is required"));
    }
    Ok(())
}

/// An established TLS session over a transport
pub struct TlsConnection<T: Transport> {
    transport: T,
    context: SessionContext,
    hostname: String,
}

impl<T: Transport> TlsConnection<T> {
    /// Send application data
    ///
    /// Returns the number of bytes accepted, or `0` when the transport would
    /// block or timed out before earlier records could be flushed. Accepted
    /// bytes that could not be written yet stay queued and go out on the
    /// next `send` or `recv`.
    ///
    /// # Errors
    ///
    /// Returns transport and engine errors other than would-block/timeout.
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let (tls, transport) = self.parts()?;
        if let Err(e) = flush(tls, transport) {
            return normalize_io(Err(e));
        }

        let accepted = tls.writer().write(data)?;
        match flush(tls, transport) {
            // Queued in the engine; the next send or recv flushes it.
            Err(e) if is_retryable(&e) => {}
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        Ok(accepted)
    }

    /// Receive application data into `buf`
    ///
    /// Returns `0` when the transport would block or timed out, and when
    /// the peer closed the session cleanly.
    ///
    /// # Errors
    ///
    /// Returns transport and engine errors other than would-block/timeout.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let key = self.context.key.clone();
        let (tls, transport) = self.parts()?;
        loop {
            match tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            // Records a blocked send left queued go out before waiting for a reply.
            match flush(tls, transport) {
                Err(e) if !is_retryable(&e) => return Err(e),
                _ => {}
            }

            if let Err(e) = tls.read_tls(transport) {
                return normalize_io(Err(e));
            }

            let processed = {
                let _random = key.clone().map(RandomScope::enter);
                tls.process_new_packets()
            };
            if let Err(e) = processed {
                let _ = tls.write_tls(transport);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }

            // Post-handshake messages (key updates, alerts) may need a reply.
            match flush(tls, transport) {
                Err(e) if !is_retryable(&e) => return Err(e),
                _ => {}
            }
        }
    }

    /// Change the transport's receive timeout
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.transport.set_receive_timeout(timeout)
    }

    /// Send close-notify, close the transport and release the session
    ///
    /// Never fails: a close-notify that would block is logged and the
    /// teardown continues.
    pub fn disconnect(self) {
        let Self {
            mut transport,
            mut context,
            hostname,
        } = self;

        if let Some(tls) = context.tls.as_mut() {
            tls.send_close_notify();
            match flush(tls, &mut transport) {
                Ok(()) => tracing::debug!("Sent close-notify to {}", hostname),
                Err(e) if is_retryable(&e) => {
                    tracing::info!("Close-notify to {} would block: {}", hostname, e);
                }
                Err(e) => tracing::error!("Failed to send close-notify to {}: {}", hostname, e),
            }
        }

        if let Err(e) = transport.close() {
            tracing::warn!("Failed to close transport to {}: {}", hostname, e);
        }
        context.destroy();
        tracing::info!("Disconnected from {}", hostname);
    }

    /// Server hostname
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Negotiated TLS version
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.context.tls.as_ref()?.protocol_version()
    }

    /// Protocol agreed via ALPN
    #[must_use]
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.context.tls.as_ref()?.alpn_protocol()
    }

    /// Type of the token key authenticating this session
    #[must_use]
    pub fn key_type(&self) -> Option<KeyType> {
        self.context.key_metadata().map(|metadata| metadata.key_type)
    }

    /// Underlying transport
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn parts(&mut self) -> io::Result<(&mut ClientConnection, &mut T)> {
        let tls = self
            .context
            .tls
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no TLS session"))?;
        Ok((tls, &mut self.transport))
    }
}

impl<T: Transport> fmt::Debug for TlsConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnection")
            .field("hostname", &self.hostname)
            .field("protocol_version", &self.protocol_version())
            .finish_non_exhaustive()
    }
}

/// Write every queued record to the transport
fn flush<T: Write>(tls: &mut ClientConnection, transport: &mut T) -> io::Result<()> {
    while tls.wants_write() {
        if tls.write_tls(transport)? == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
    }
    Ok(())
}

/// Would-block, timeout and interrupt become `Ok(0)`
fn normalize_io(result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Err(e) if is_retryable(&e) => Ok(0),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_become_zero() {
        for kind in [
            io::ErrorKind::WouldBlock,
            io::ErrorKind::TimedOut,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(normalize_io(Err(kind.into())).unwrap(), 0);
        }
    }

    #[test]
    fn counts_and_hard_errors_pass_through() {
        assert_eq!(normalize_io(Ok(17)).unwrap(), 17);
        let err = normalize_io(Err(io::ErrorKind::ConnectionReset.into())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn credentials_builders() {
        let pem = b"-----BEGIN CERTIFICATE-----".to_vec();
        let credentials = NetworkCredentials::new(pem.as_slice())
            .with_alpn_protocols(["mqtt", "x-amzn-mqtt-ca"])
            .without_sni()
            .into_owned();
        assert!(matches!(credentials.root_ca, Cow::Owned(_)));
        assert_eq!(
            credentials.alpn_protocols,
            Some(vec![b"mqtt".to_vec(), b"x-amzn-mqtt-ca".to_vec()])
        );
        assert!(credentials.disable_sni);
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let credentials = NetworkCredentials::new(&b"ca"[..]);
        assert!(matches!(
            check_parameters("", &credentials),
            Err(TlsTransportError::InvalidParameter(_))
        ));
        assert!(matches!(
            check_parameters("localhost", &NetworkCredentials::new(&b""[..])),
            Err(TlsTransportError::InvalidParameter(_))
        ));
        assert!(check_parameters("localhost", &credentials).is_ok());
    }
}
