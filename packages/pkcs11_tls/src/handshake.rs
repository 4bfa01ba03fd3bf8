//! Handshake driving
//!
//! The engine's state is read as one of three signals; the blocking driver
//! performs exactly the I/O each signal asks for until the handshake is
//! complete or the deadline passes.

use std::io::{Read, Write};
use std::time::Instant;

use rustls::ClientConnection;

use crate::error::{Result, TlsTransportError};
use crate::transport::is_retryable;

/// What the engine needs next to make handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeSignal {
    /// Handshake finished and nothing is waiting to be sent
    Complete,
    /// Records are queued for the transport
    NeedsFlush,
    /// The engine is waiting for peer records
    NeedsInput,
}

pub(crate) fn next_signal(tls: &ClientConnection) -> HandshakeSignal {
    if tls.wants_write() {
        HandshakeSignal::NeedsFlush
    } else if tls.is_handshaking() {
        HandshakeSignal::NeedsInput
    } else {
        HandshakeSignal::Complete
    }
}

/// Run the handshake over `transport` until complete
///
/// Timeouts and would-block from the transport are retried until
/// `deadline`. The caller must have the token bound as the engine RNG.
pub(crate) fn drive<T: Read + Write>(
    tls: &mut ClientConnection,
    transport: &mut T,
    deadline: Instant,
) -> Result<()> {
    loop {
        match next_signal(tls) {
            HandshakeSignal::Complete => return Ok(()),
            HandshakeSignal::NeedsFlush => match tls.write_tls(transport) {
                Ok(0) => {
                    return Err(TlsTransportError::handshake_failed(
                        "transport accepted no handshake bytes",
                    ))
                }
                Ok(_) => {}
                Err(e) if is_retryable(&e) => check_deadline(deadline)?,
                Err(e) => {
                    return Err(TlsTransportError::handshake_failed(format!(
                        "transport write failed: {e}"
                    )))
                }
            },
            HandshakeSignal::NeedsInput => match tls.read_tls(transport) {
                Ok(0) => {
                    return Err(TlsTransportError::handshake_failed(
                        "peer closed the connection during the handshake",
                    ))
                }
                Ok(_) => {
                    if let Err(e) = tls.process_new_packets() {
                        // Best effort: let the peer see our alert.
                        let _ = tls.write_tls(transport);
                        return Err(TlsTransportError::handshake_failed(e.to_string()));
                    }
                }
                Err(e) if is_retryable(&e) => check_deadline(deadline)?,
                Err(e) => {
                    return Err(TlsTransportError::handshake_failed(format!(
                        "transport read failed: {e}"
                    )))
                }
            },
        }
    }
}

fn check_deadline(deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        Err(TlsTransportError::handshake_failed("handshake timed out"))
    } else {
        Ok(())
    }
}
