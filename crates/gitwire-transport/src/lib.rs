//! Transport abstraction for git smart-protocol sessions.
//!
//! A transport is a byte duplex owned exclusively by one session: the
//! embedder supplies the outer framing (TCP, SSH subprocess, HTTP request
//! bodies) and hands the protocol core a reader, a writer, and a
//! cancellation token. Everything above the byte level — pkt-line framing,
//! negotiation, sideband — lives in `gitwire-protocol`.

mod memory;

pub use memory::MemoryTransport;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Errors that can occur at the transport level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Service type for git smart-protocol connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// git-upload-pack (serves fetch/clone).
    UploadPack,
    /// git-receive-pack (serves push).
    ReceivePack,
}

impl Service {
    /// Service name as used in the protocol (`# service=...`, command tags).
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    /// Look up a service by its wire name.
    pub fn from_name(name: &str) -> Result<Self, TransportError> {
        match name {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            _ => Err(TransportError::UnsupportedService(name.to_string())),
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag for a session.
///
/// Cloneable and shareable across threads; the protocol drivers check it
/// between pkt-lines, so cancellation never tears a frame in half.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Trait for transport connections.
///
/// A transport provides bidirectional I/O with the remote peer. The
/// connection lifecycle is: connect (embedder), read/write (protocol
/// drivers), close when the session ends.
pub trait Transport: Send {
    /// Get a reader for the peer's bytes.
    fn reader(&mut self) -> &mut dyn Read;

    /// Get a writer for sending bytes to the peer.
    fn writer(&mut self) -> &mut dyn Write;

    /// Borrow both halves at once, for drivers that interleave reads and
    /// writes within one negotiation phase.
    fn split(&mut self) -> (&mut dyn Read, &mut dyn Write);

    /// Close the transport connection.
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names_roundtrip() {
        for svc in [Service::UploadPack, Service::ReceivePack] {
            assert_eq!(Service::from_name(svc.as_str()).unwrap(), svc);
        }
    }

    #[test]
    fn unknown_service_rejected() {
        let err = Service::from_name("git-upload-archive").unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedService(s) if s == "git-upload-archive"));
    }

    #[test]
    fn cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
