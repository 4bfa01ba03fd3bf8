#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cryypt_pkcs11_tls::{SoftToken, TlsConnection, Transport};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

pub const CA_PEM: &[u8] = include_bytes!("../fixtures/ca.pem");
pub const CA_DER: &[u8] = include_bytes!("../fixtures/ca.der");
pub const SERVER_CERT: &[u8] = include_bytes!("../fixtures/server_cert.der");
pub const SERVER_KEY: &[u8] = include_bytes!("../fixtures/server_key.der");
pub const CLIENT_RSA_CERT: &[u8] = include_bytes!("../fixtures/client_rsa_cert.der");
pub const CLIENT_RSA_KEY: &[u8] = include_bytes!("../fixtures/client_rsa_key.der");
pub const CLIENT_EC_CERT: &[u8] = include_bytes!("../fixtures/client_ec_cert.der");
pub const CLIENT_EC_KEY: &[u8] = include_bytes!("../fixtures/client_ec_key.der");
/// Root with a 1024-bit RSA key
pub const LEGACY_CA_PEM: &[u8] = include_bytes!("../fixtures/legacy_ca.pem");
/// `localhost` certificate for `SERVER_KEY`, issued by the legacy root
pub const LEGACY_SERVER_CERT: &[u8] = include_bytes!("../fixtures/legacy_server_cert.der");

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Token holding the RSA device identity
pub fn rsa_token() -> Arc<SoftToken> {
    token_with(CLIENT_RSA_CERT, CLIENT_RSA_KEY)
}

/// Token holding the P-256 device identity
pub fn ec_token() -> Arc<SoftToken> {
    token_with(CLIENT_EC_CERT, CLIENT_EC_KEY)
}

fn token_with(cert: &[u8], key: &[u8]) -> Arc<SoftToken> {
    let token = SoftToken::new("0000");
    token.import_certificate("Device Cert", cert).unwrap();
    token.import_private_key("Device Priv TLS Key", key).unwrap();
    Arc::new(token)
}

/// What the echo server saw of its single client
#[derive(Debug, Default)]
pub struct ServerOutcome {
    pub client_certificates: usize,
    pub echoed: usize,
    pub error: Option<String>,
}

pub struct EchoServer {
    pub port: u16,
    handle: JoinHandle<ServerOutcome>,
}

impl EchoServer {
    pub fn join(self) -> ServerOutcome {
        self.handle.join().unwrap()
    }
}

/// Mutual-TLS echo server for one connection, requiring a client
/// certificate issued by the test root
pub fn spawn_echo_server(alpn_protocols: Vec<Vec<u8>>) -> EchoServer {
    spawn_echo_server_with_chain(alpn_protocols, SERVER_CERT)
}

/// Echo server presenting `server_cert` instead of the default certificate
pub fn spawn_echo_server_with_chain(alpn_protocols: Vec<Vec<u8>>, server_cert: &[u8]) -> EchoServer {
    let config = Arc::new(server_config(alpn_protocols, server_cert));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut outcome = ServerOutcome::default();
        let (stream, _) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        let connection = ServerConnection::new(config).unwrap();
        let mut tls = StreamOwned::new(connection, stream);

        let mut buf = [0u8; 4096];
        loop {
            match tls.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    outcome.client_certificates =
                        tls.conn.peer_certificates().map_or(0, <[_]>::len);
                    if let Err(e) = tls.write_all(&buf[..n]).and_then(|()| tls.flush()) {
                        outcome.error = Some(e.to_string());
                        break;
                    }
                    outcome.echoed += n;
                }
                Err(e) => {
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
        }
        outcome
    });

    EchoServer { port, handle }
}

fn server_config(alpn_protocols: Vec<Vec<u8>>, server_cert: &[u8]) -> ServerConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(CA_DER.to_vec())).unwrap();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .unwrap();

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            vec![CertificateDer::from(server_cert.to_vec())],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(SERVER_KEY.to_vec())),
        )
        .unwrap();
    config.alpn_protocols = alpn_protocols;
    config
}

/// Listener that accepts one connection and never answers
pub fn spawn_silent_server(hold_for: Duration) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            thread::sleep(hold_for);
            drop(stream);
        }
    });
    (port, handle)
}

/// TCP transport that reports `close` and can be told to fail writes
pub struct ObservedTransport {
    stream: TcpStream,
    pub closed: Arc<AtomicBool>,
    pub write_failure: Arc<Mutex<Option<io::ErrorKind>>>,
}

impl ObservedTransport {
    pub fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        Self {
            stream,
            closed: Arc::new(AtomicBool::new(false)),
            write_failure: Arc::new(Mutex::new(None)),
        }
    }
}

impl Read for ObservedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for ObservedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = *self.write_failure.lock().unwrap() {
            return Err(kind.into());
        }
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for ObservedTransport {
    fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
        Ok(())
    }
}

/// Send all of `data`, retrying while the transport reports would-block
pub fn send_all<T: Transport>(connection: &mut TlsConnection<T>, mut data: &[u8]) {
    let deadline = Instant::now() + IO_TIMEOUT;
    while !data.is_empty() {
        assert!(Instant::now() < deadline, "send timed out");
        let n = connection.send(data).unwrap();
        data = &data[n..];
    }
}

/// Receive exactly `len` bytes
pub fn recv_exact<T: Transport>(connection: &mut TlsConnection<T>, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + IO_TIMEOUT;
    let mut received = Vec::with_capacity(len);
    let mut buf = [0u8; 1024];
    while received.len() < len {
        assert!(Instant::now() < deadline, "recv timed out");
        let n = connection.recv(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    received
}
