use std::io::{Cursor, Read, Write};

use crate::{Transport, TransportError};

/// An in-process transport over byte buffers.
///
/// The "peer's" bytes are supplied up front; everything the session writes
/// is collected for inspection. Used by the protocol driver tests and by
/// embedders that splice the smart protocol into their own framing.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl MemoryTransport {
    /// Create a transport that will read `input` from the peer.
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    /// Everything written to the peer so far.
    pub fn written(&self) -> &[u8] {
        &self.output
    }

    /// Consume the transport and return the written bytes.
    pub fn into_written(self) -> Vec<u8> {
        self.output
    }
}

impl Transport for MemoryTransport {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.input
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.output
    }

    fn split(&mut self) -> (&mut dyn Read, &mut dyn Write) {
        (&mut self.input, &mut self.output)
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}
