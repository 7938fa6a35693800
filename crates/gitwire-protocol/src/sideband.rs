//! Sideband multiplexing.
//!
//! During fetch, the server multiplexes packfile bytes, progress messages,
//! and fatal errors over one pkt-line stream. The first payload byte of
//! each frame is the channel tag:
//! - channel 1: packfile data
//! - channel 2: progress messages
//! - channel 3: fatal error, terminating the stream
//!
//! Sideband is a wrapper around a pkt-line reader/writer, not a mode bit on
//! the session: consumers of the packfile see a plain byte stream either
//! way.

use std::io::{self, Read, Write};

use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

/// Sideband channel identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Packfile data (channel 1).
    PackData = 1,
    /// Progress messages (channel 2).
    Progress = 2,
    /// Fatal error (channel 3).
    Error = 3,
}

/// Negotiated sideband flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandMode {
    /// `side-band`: at most 999 data bytes per frame after the channel tag.
    Sideband,
    /// `side-band-64k`: at most 65519 data bytes per frame.
    Sideband64k,
}

impl SidebandMode {
    /// Maximum data bytes per frame, excluding the one-byte channel tag.
    pub const fn max_payload(self) -> usize {
        match self {
            SidebandMode::Sideband => 999,
            SidebandMode::Sideband64k => 65519,
        }
    }
}

/// Sideband demultiplexer.
///
/// Borrows the session's pkt-line reader (never re-wraps it) and exposes
/// the channel-1 bytes as a `Read`. Progress frames go to an optional sink;
/// a channel-3 frame or `ERR` pkt surfaces as
/// [`ProtocolError::ErrorLine`] once all previously received pack bytes
/// have been handed out.
pub struct Demuxer<'a, R> {
    reader: &'a mut PktReader<R>,
    mode: SidebandMode,
    progress: Option<&'a mut dyn Write>,
    pending: Vec<u8>,
    offset: usize,
    frames: usize,
    done: bool,
}

impl<'a, R: Read> Demuxer<'a, R> {
    pub fn new(reader: &'a mut PktReader<R>, mode: SidebandMode) -> Self {
        Self {
            reader,
            mode,
            progress: None,
            pending: Vec::new(),
            offset: 0,
            frames: 0,
            done: false,
        }
    }

    /// Route channel-2 frames to `sink`. Without a sink they are dropped.
    pub fn with_progress(mut self, sink: &'a mut dyn Write) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Read the next packfile bytes into `buf`.
    ///
    /// Returns `Ok(0)` at end of stream (flush pkt or EOF). Progress frames
    /// are dispatched along the way.
    pub fn read_pack(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.offset < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.offset);
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }

            self.frames += 1;
            match self.reader.read_line()? {
                None | Some(PktLine::Flush) => {
                    self.done = true;
                    return Ok(0);
                }
                // v2 sentinels also end the pack section.
                Some(PktLine::Delim) | Some(PktLine::ResponseEnd) => {
                    self.done = true;
                    return Ok(0);
                }
                Some(PktLine::Data(frame)) => {
                    let Some((&tag, payload)) = frame.split_first() else {
                        continue;
                    };
                    if payload.len() > self.mode.max_payload() {
                        return Err(ProtocolError::UnexpectedData {
                            line: self.frames,
                            detail: format!(
                                "sideband frame carries {} bytes, mode maximum is {}",
                                payload.len(),
                                self.mode.max_payload()
                            ),
                        });
                    }
                    match tag {
                        1 => {
                            self.pending.clear();
                            self.pending.extend_from_slice(payload);
                            self.offset = 0;
                        }
                        2 => {
                            if let Some(sink) = self.progress.as_deref_mut() {
                                sink.write_all(payload)?;
                            }
                        }
                        3 => {
                            self.done = true;
                            return Err(ProtocolError::ErrorLine(
                                String::from_utf8_lossy(payload).trim().to_string(),
                            ));
                        }
                        other => {
                            return Err(ProtocolError::UnexpectedData {
                                line: self.frames,
                                detail: format!("unknown sideband channel {}", other),
                            });
                        }
                    }
                }
            }
        }
    }
}

impl<'a, R: Read> Read for Demuxer<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_pack(buf).map_err(|e| match e {
            ProtocolError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }
}

/// Sideband multiplexer (server side).
///
/// Borrows the session's pkt-line writer and chunks each channel's bytes to
/// the negotiated per-frame maximum. `Write` sends packfile data; progress
/// and errors have their own entry points.
pub struct Muxer<'a, W> {
    writer: &'a mut PktWriter<W>,
    mode: SidebandMode,
    frame: Vec<u8>,
}

impl<'a, W: Write> Muxer<'a, W> {
    pub fn new(writer: &'a mut PktWriter<W>, mode: SidebandMode) -> Self {
        Self {
            writer,
            mode,
            frame: Vec::new(),
        }
    }

    /// Write `data` on `channel`, split into as many frames as needed.
    pub fn write_channel(&mut self, channel: Channel, data: &[u8]) -> Result<(), ProtocolError> {
        for chunk in data.chunks(self.mode.max_payload()) {
            self.frame.clear();
            self.frame.push(channel as u8);
            self.frame.extend_from_slice(chunk);
            self.writer.write_data(&self.frame)?;
        }
        Ok(())
    }

    /// Send a progress message on channel 2.
    pub fn progress(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.write_channel(Channel::Progress, message.as_bytes())
    }

    /// Send a fatal error on channel 3.
    pub fn error(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.write_channel(Channel::Error, message.as_bytes())
    }
}

impl<'a, W: Write> Write for Muxer<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_channel(Channel::PackData, buf).map_err(|e| match e {
            ProtocolError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::Other, other),
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().map_err(|e| match e {
            ProtocolError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }
}
