//! Byte-stream transport under the TLS engine

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Blocking byte stream carrying TLS records
pub trait Transport: Read + Write + Send {
    /// Bound blocking reads; `None` blocks indefinitely
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut the stream down in both directions
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    fn close(&mut self) -> io::Result<()>;
}

/// TCP transport with per-direction socket timeouts
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `host:port`, trying each resolved address in turn
    ///
    /// Zero timeouts mean "no timeout".
    ///
    /// # Errors
    ///
    /// Returns the last connect error, or `NotFound` if `host` resolves to
    /// nothing.
    pub fn connect(
        host: &str,
        port: u16,
        recv_timeout: Duration,
        send_timeout: Duration,
        connect_timeout: Duration,
    ) -> io::Result<Self> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            let attempt = match non_zero(connect_timeout) {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    tracing::debug!("Connected to {} ({})", host, addr);
                    stream.set_read_timeout(non_zero(recv_timeout))?;
                    stream.set_write_timeout(non_zero(send_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(Self { stream });
                }
                Err(e) => {
                    tracing::debug!("Connect to {} ({}) failed: {}", host, addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{host} resolved to no address"))
        }))
    }

    /// Wrap an already connected stream
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout.and_then(non_zero))
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

fn non_zero(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Errors that mean "try again later" rather than failure
pub(crate) fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn zero_timeout_means_none() {
        assert_eq!(non_zero(Duration::ZERO), None);
        assert_eq!(non_zero(Duration::from_millis(5)), Some(Duration::from_millis(5)));
    }

    #[test]
    fn receive_timeout_surfaces_as_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::connect(
            "127.0.0.1",
            port,
            Duration::from_millis(20),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap();
        let _peer = listener.accept().unwrap();

        let mut buf = [0u8; 4];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(is_retryable(&err));

        transport.close().unwrap();
        transport.close().unwrap();
    }

    #[test]
    fn refused_connection_is_an_error() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(TcpTransport::connect(
            "127.0.0.1",
            port,
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(1)
        )
        .is_err());
    }
}
