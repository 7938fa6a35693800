//! Pkt-line protocol framing.
//!
//! The pkt-line format is the foundation of the git wire protocol. Each
//! frame is prefixed with a 4-hex-digit length covering the length field
//! itself plus the payload. Special frames:
//! - `0000`: flush packet (end of section)
//! - `0001`: delimiter packet (v2 only)
//! - `0002`: response-end packet (v2 only)
//!
//! Length `0003` is reserved and always invalid; `0004` is an *empty data
//! frame*, which is not the same thing as a flush.
//!
//! Payloads are read into a scratch buffer lent out by a process-wide pool,
//! so steady-state reading allocates nothing. A returned payload slice is
//! valid only until the next call on the same reader.

use std::fmt;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use crate::ProtocolError;

/// Maximum payload per data frame (65520 − 4 bytes of length field).
pub const MAX_PKT_DATA_LEN: usize = 65516;

/// Maximum frame length including the 4-byte length field.
pub const MAX_PKT_LEN: usize = 65520;

/// One pkt-line frame.
///
/// `Data` payloads borrow the reader's scratch buffer and stay valid until
/// the next codec call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktLine<'a> {
    /// Normal data frame.
    Data(&'a [u8]),
    /// Flush packet (0000) — end of section.
    Flush,
    /// Delimiter packet (0001) — v2 section separator.
    Delim,
    /// Response-end packet (0002) — v2 response terminator.
    ResponseEnd,
}

impl<'a> PktLine<'a> {
    /// The value of the wire length field for this frame.
    pub fn wire_len(&self) -> usize {
        match self {
            PktLine::Flush => 0,
            PktLine::Delim => 1,
            PktLine::ResponseEnd => 2,
            PktLine::Data(d) => d.len() + 4,
        }
    }

    /// The payload, for data frames.
    pub fn data(&self) -> Option<&'a [u8]> {
        match self {
            PktLine::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// Free-list of max-frame scratch buffers shared by every session.
static SCRATCH_POOL: Mutex<Vec<Box<[u8; MAX_PKT_LEN]>>> = Mutex::new(Vec::new());

/// A scratch buffer large enough for any pkt-line frame.
///
/// Pool-acquired buffers go back to the free-list when dropped, on every
/// exit path including errors and cancellation. Caller-provided storage is
/// never pooled.
pub struct ScratchBuffer {
    buf: Option<Box<[u8; MAX_PKT_LEN]>>,
    pooled: bool,
}

impl ScratchBuffer {
    /// Take a buffer from the shared pool, allocating if the pool is empty.
    pub fn acquire() -> Self {
        let recycled = SCRATCH_POOL.lock().map(|mut pool| pool.pop()).unwrap_or(None);
        Self {
            buf: Some(recycled.unwrap_or_else(|| Box::new([0u8; MAX_PKT_LEN]))),
            pooled: true,
        }
    }

    /// Wrap caller-provided storage instead of using the pool.
    pub fn from_storage(buf: Box<[u8; MAX_PKT_LEN]>) -> Self {
        Self {
            buf: Some(buf),
            pooled: false,
        }
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        if self.pooled {
            if let (Some(buf), Ok(mut pool)) = (self.buf.take(), SCRATCH_POOL.lock()) {
                pool.push(buf);
            }
        }
    }
}

impl Deref for ScratchBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Invariant: `buf` is only None inside Drop.
        &self.buf.as_ref().expect("scratch buffer present")[..]
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf.as_mut().expect("scratch buffer present")[..]
    }
}

/// A frame described without borrowing the scratch buffer, so peeked frames
/// can be stashed across calls.
#[derive(Debug, Clone, Copy)]
enum RawPkt {
    Flush,
    Delim,
    ResponseEnd,
    Data(usize),
}

/// Pkt-line reader.
///
/// Components that already own a `PktReader` hand out `&mut` access to it;
/// nothing in this crate wraps an already-wrapping reader a second time.
pub struct PktReader<R> {
    reader: R,
    scratch: ScratchBuffer,
    peeked: Option<RawPkt>,
}

impl<R: Read> PktReader<R> {
    /// Create a reader whose scratch buffer comes from the shared pool.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scratch: ScratchBuffer::acquire(),
            peeked: None,
        }
    }

    /// Create a reader with caller-provided scratch storage.
    pub fn with_storage(reader: R, storage: Box<[u8; MAX_PKT_LEN]>) -> Self {
        Self {
            reader,
            scratch: ScratchBuffer::from_storage(storage),
            peeked: None,
        }
    }

    /// Get a mutable reference to the inner reader.
    ///
    /// Bypassing the framing is how the receive-pack driver splices the raw
    /// packfile bytes that follow the last flush.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the reader and return the inner value.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read one pkt-line. Returns `None` on a clean EOF (no bytes left
    /// before a length field).
    pub fn read_line(&mut self) -> Result<Option<PktLine<'_>>, ProtocolError> {
        let raw = match self.peeked.take() {
            Some(raw) => Some(raw),
            None => self.read_raw()?,
        };
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(Self::frame(&self.scratch, raw))),
        }
    }

    /// Peek the next pkt-line without consuming it.
    ///
    /// The following `read_line` returns the same frame; a later peek sees
    /// the one after it.
    pub fn peek_line(&mut self) -> Result<Option<PktLine<'_>>, ProtocolError> {
        if self.peeked.is_none() {
            self.peeked = self.read_raw()?;
        }
        match self.peeked {
            None => Ok(None),
            Some(raw) => Ok(Some(Self::frame(&self.scratch, raw))),
        }
    }

    fn frame(scratch: &ScratchBuffer, raw: RawPkt) -> PktLine<'_> {
        match raw {
            RawPkt::Flush => PktLine::Flush,
            RawPkt::Delim => PktLine::Delim,
            RawPkt::ResponseEnd => PktLine::ResponseEnd,
            RawPkt::Data(len) => PktLine::Data(&scratch[..len]),
        }
    }

    fn read_raw(&mut self) -> Result<Option<RawPkt>, ProtocolError> {
        let mut len_buf = [0u8; 4];

        // EOF before the first length byte is a clean end of stream.
        loop {
            match self.reader.read(&mut len_buf[..1]) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        // A torn length field is a framing error, not an EOF.
        self.reader.read_exact(&mut len_buf[1..]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::InvalidPktLen("truncated length field".into())
            } else {
                ProtocolError::Io(e)
            }
        })?;

        let len = parse_len(&len_buf)?;
        match len {
            0 => Ok(Some(RawPkt::Flush)),
            1 => Ok(Some(RawPkt::Delim)),
            2 => Ok(Some(RawPkt::ResponseEnd)),
            3 => Err(ProtocolError::InvalidPktLen("length 3 is reserved".into())),
            _ if len > MAX_PKT_LEN => Err(ProtocolError::InvalidPktLen(format!(
                "length {} exceeds maximum {}",
                len, MAX_PKT_LEN
            ))),
            _ => {
                let data_len = len - 4;
                self.reader
                    .read_exact(&mut self.scratch[..data_len])
                    .map_err(|e| {
                        if e.kind() == std::io::ErrorKind::UnexpectedEof {
                            ProtocolError::InvalidPktLen(format!(
                                "length {} with truncated payload",
                                len
                            ))
                        } else {
                            ProtocolError::Io(e)
                        }
                    })?;

                // An ERR payload aborts the conversation wherever it shows up.
                if let Some(text) = self.scratch[..data_len].strip_prefix(b"ERR ") {
                    return Err(ProtocolError::ErrorLine(
                        String::from_utf8_lossy(text).trim().to_string(),
                    ));
                }
                Ok(Some(RawPkt::Data(data_len)))
            }
        }
    }
}

/// Parse the 4-digit ASCII-hex length field, accepting either case.
fn parse_len(buf: &[u8; 4]) -> Result<usize, ProtocolError> {
    let mut len = 0usize;
    for &b in buf {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(ProtocolError::InvalidPktLen(format!(
                    "invalid length bytes {:?}",
                    buf
                )))
            }
        };
        len = len * 16 + digit as usize;
    }
    Ok(len)
}

/// Pkt-line writer.
pub struct PktWriter<W> {
    writer: W,
}

impl<W: Write> PktWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get a mutable reference to the inner writer (for splicing raw
    /// packfile bytes after the framed section).
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume the writer and return the inner value.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write a data frame.
    pub fn write_data(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if payload.len() > MAX_PKT_DATA_LEN {
            return Err(ProtocolError::PayloadTooLong(payload.len()));
        }
        let len = payload.len() + 4;
        let mut header = [0u8; 4];
        for (i, slot) in header.iter_mut().enumerate() {
            *slot = b"0123456789abcdef"[(len >> (12 - 4 * i)) & 0xf];
        }
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)?;
        Ok(())
    }

    /// Write a text frame, appending `\n` if not already present.
    pub fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        if text.ends_with('\n') {
            self.write_data(text.as_bytes())
        } else {
            let mut data = Vec::with_capacity(text.len() + 1);
            data.extend_from_slice(text.as_bytes());
            data.push(b'\n');
            self.write_data(&data)
        }
    }

    /// Write a formatted data frame. `write!(w, ...)` resolves here, so the
    /// message codecs can format straight into frames.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), ProtocolError> {
        let text = fmt::format(args);
        self.write_data(text.as_bytes())
    }

    /// Write an error frame: a data pkt with payload `ERR <text>\n`.
    pub fn write_error(&mut self, text: &str) -> Result<(), ProtocolError> {
        let mut data = Vec::with_capacity(text.len() + 5);
        data.extend_from_slice(b"ERR ");
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.write_data(&data)
    }

    /// Write a flush packet (0000).
    pub fn write_flush(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(b"0000")?;
        Ok(())
    }

    /// Write a delimiter packet (0001, v2 only).
    pub fn write_delim(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(b"0001")?;
        Ok(())
    }

    /// Write a response-end packet (0002, v2 only).
    pub fn write_response_end(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(b"0002")?;
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.writer.flush()?;
        Ok(())
    }
}
