//! Upload (fetch) request encoding/decoding.
//!
//! After reading the advertisement, a fetch client sends its wants in one
//! section — first want carrying the chosen capabilities — followed by
//! optional shallow lines, an optional deepen line, an optional filter, and
//! a flush. Then come rounds of `have` lines separated by flushes, ending
//! with `done`.

use std::io::{Read, Write};

use bstr::{BString, ByteSlice};
use gitwire_hash::ObjectId;

use crate::capability::{
    CapabilityList, DEEPEN_NOT, DEEPEN_SINCE, FILTER, MULTI_ACK, MULTI_ACK_DETAILED, SHALLOW,
    SIDE_BAND, SIDE_BAND_64K,
};
use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

/// History depth requested by a fetch.
///
/// `deepen 0` and an absent deepen line both mean [`Depth::Infinite`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Depth {
    #[default]
    Infinite,
    /// `deepen <n>`: truncate history `n` commits from the tips.
    Commits(u32),
    /// `deepen-since <unix-seconds>`.
    Since(u64),
    /// `deepen-not <refname>`.
    Not(BString),
}

/// The want/shallow/deepen/filter message of a fetch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub capabilities: CapabilityList,
    pub wants: Vec<ObjectId>,
    pub shallows: Vec<ObjectId>,
    pub depth: Depth,
    /// Partial-clone filter spec (`blob:none`, ...). Needs the `filter`
    /// capability.
    pub filter: Option<String>,
}

impl UploadRequest {
    /// Check the request is internally consistent before encoding.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.wants.is_empty() {
            return Err(ProtocolError::EmptyWants);
        }
        if !self.shallows.is_empty() && !self.capabilities.supports(SHALLOW) {
            return Err(ProtocolError::UnsupportedCapability(SHALLOW.into()));
        }
        match &self.depth {
            Depth::Since(_) if !self.capabilities.supports(DEEPEN_SINCE) => {
                return Err(ProtocolError::UnsupportedCapability(DEEPEN_SINCE.into()));
            }
            Depth::Not(_) if !self.capabilities.supports(DEEPEN_NOT) => {
                return Err(ProtocolError::UnsupportedCapability(DEEPEN_NOT.into()));
            }
            _ => {}
        }
        if self.filter.is_some() && !self.capabilities.supports(FILTER) {
            return Err(ProtocolError::UnsupportedCapability(FILTER.into()));
        }
        if self.capabilities.supports(SIDE_BAND) && self.capabilities.supports(SIDE_BAND_64K) {
            return Err(ProtocolError::UnsupportedCapability(
                "side-band and side-band-64k are mutually exclusive".into(),
            ));
        }
        if self.capabilities.supports(MULTI_ACK) && self.capabilities.supports(MULTI_ACK_DETAILED)
        {
            return Err(ProtocolError::UnsupportedCapability(
                "multi_ack and multi_ack_detailed are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// Encode the request section, ending with a flush pkt.
    ///
    /// Wants and shallows are deduplicated and sorted; the first want line
    /// carries the capability list.
    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        self.validate()?;

        let mut wants = self.wants.clone();
        wants.sort();
        wants.dedup();

        let caps = self.capabilities.to_string();
        for (i, want) in wants.iter().enumerate() {
            if i == 0 && !caps.is_empty() {
                write!(writer, "want {} {}\n", want, caps)?;
            } else {
                write!(writer, "want {}\n", want)?;
            }
        }

        let mut shallows = self.shallows.clone();
        shallows.sort();
        shallows.dedup();
        for shallow in &shallows {
            write!(writer, "shallow {}\n", shallow)?;
        }

        match &self.depth {
            Depth::Infinite | Depth::Commits(0) => {}
            Depth::Commits(n) => write!(writer, "deepen {}\n", n)?,
            Depth::Since(seconds) => write!(writer, "deepen-since {}\n", seconds)?,
            Depth::Not(refname) => write!(writer, "deepen-not {}\n", refname)?,
        }

        if let Some(filter) = &self.filter {
            write!(writer, "filter {}\n", filter)?;
        }

        writer.write_flush()
    }

    /// Decode a request section up to (and including) its flush pkt.
    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        Decoder::new(reader).run()
    }
}

/// Sections of the request, in the only order they may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Wants,
    Shallows,
    Depth,
    Filter,
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Section::Wants => "want",
            Section::Shallows => "shallow",
            Section::Depth => "deepen",
            Section::Filter => "filter",
        }
    }
}

/// One consumed pkt-line, detached from the reader's scratch buffer.
enum Frame {
    Eof,
    Flush,
    Line(Vec<u8>),
}

struct Decoder<'a, R> {
    reader: &'a mut PktReader<R>,
    line: usize,
}

impl<'a, R: Read> Decoder<'a, R> {
    fn new(reader: &'a mut PktReader<R>) -> Self {
        Self { reader, line: 0 }
    }

    fn unexpected(&self, detail: impl Into<String>) -> ProtocolError {
        ProtocolError::UnexpectedData {
            line: self.line,
            detail: detail.into(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, ProtocolError> {
        self.line += 1;
        match self.reader.read_line()? {
            None => Ok(Frame::Eof),
            Some(PktLine::Flush) => Ok(Frame::Flush),
            Some(PktLine::Delim) | Some(PktLine::ResponseEnd) => {
                Err(ProtocolError::UnexpectedData {
                    line: self.line,
                    detail: "v2 sentinel in upload request".into(),
                })
            }
            Some(PktLine::Data(d)) => Ok(Frame::Line(trim_eol(d).to_vec())),
        }
    }

    fn run(mut self) -> Result<UploadRequest, ProtocolError> {
        let mut req = UploadRequest::default();
        let mut section = Section::Wants;

        // First line: `want <hash>[ <caps>]`.
        let first = match self.next_frame()? {
            Frame::Eof => return Err(ProtocolError::EmptyInput),
            Frame::Flush => return Err(ProtocolError::EmptyWants),
            Frame::Line(line) => line,
        };
        let rest = first
            .strip_prefix(b"want ")
            .ok_or_else(|| self.unexpected("request must start with a want"))?;
        let (hex, caps) = match rest.iter().position(|&b| b == b' ') {
            Some(p) => (&rest[..p], &rest[p + 1..]),
            None => (rest, &[][..]),
        };
        let want = ObjectId::from_hex_bytes(hex)
            .map_err(|e| self.unexpected(format!("malformed want: {}", e)))?;
        req.wants.push(want);
        req.capabilities = CapabilityList::decode(caps)?;

        loop {
            let line = match self.next_frame()? {
                Frame::Eof => return Err(self.unexpected("missing flush after request")),
                Frame::Flush => break,
                Frame::Line(line) => line,
            };

            if let Some(hex) = line.strip_prefix(b"want ") {
                self.enter_section(&mut section, Section::Wants, true)?;
                let want = ObjectId::from_hex_bytes(hex)
                    .map_err(|e| self.unexpected(format!("malformed want: {}", e)))?;
                req.wants.push(want);
            } else if let Some(hex) = line.strip_prefix(b"shallow ") {
                self.enter_section(&mut section, Section::Shallows, true)?;
                let oid = ObjectId::from_hex_bytes(hex)
                    .map_err(|e| self.unexpected(format!("malformed shallow: {}", e)))?;
                req.shallows.push(oid);
            } else if let Some(arg) = line.strip_prefix(b"deepen ") {
                self.enter_section(&mut section, Section::Depth, false)?;
                let n: i64 = parse_ascii(arg)
                    .ok_or_else(|| self.unexpected("malformed deepen count"))?;
                if n < 0 {
                    return Err(self.unexpected("negative deepen count"));
                }
                // `deepen 0` is the same as no deepen at all.
                req.depth = if n == 0 {
                    Depth::Infinite
                } else {
                    Depth::Commits(n as u32)
                };
            } else if let Some(arg) = line.strip_prefix(b"deepen-since ") {
                self.enter_section(&mut section, Section::Depth, false)?;
                let seconds: u64 = parse_ascii(arg)
                    .ok_or_else(|| self.unexpected("malformed deepen-since timestamp"))?;
                req.depth = Depth::Since(seconds);
            } else if let Some(arg) = line.strip_prefix(b"deepen-not ") {
                self.enter_section(&mut section, Section::Depth, false)?;
                if arg.is_empty() {
                    return Err(self.unexpected("empty deepen-not ref"));
                }
                req.depth = Depth::Not(BString::from(arg));
            } else if let Some(spec) = line.strip_prefix(b"filter ") {
                if !req.capabilities.supports(FILTER) {
                    return Err(ProtocolError::UnsupportedCapability(FILTER.into()));
                }
                self.enter_section(&mut section, Section::Filter, false)?;
                req.filter = Some(String::from_utf8_lossy(spec).into_owned());
            } else {
                return Err(self.unexpected(format!(
                    "unknown request line {:?}",
                    line.as_bstr()
                )));
            }
        }

        Ok(req)
    }

    /// Sections only move forward; `repeatable` says whether another line
    /// of the same section may follow.
    fn enter_section(
        &self,
        current: &mut Section,
        next: Section,
        repeatable: bool,
    ) -> Result<(), ProtocolError> {
        if *current > next || (!repeatable && *current == next) {
            return Err(self.unexpected(format!(
                "{} line after {} section",
                next.name(),
                current.name()
            )));
        }
        *current = next;
        Ok(())
    }
}

/// How a round of haves ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEnd {
    /// Flush: the client waits for acks, more rounds follow.
    Flush,
    /// `done`: the client is ready for the packfile.
    Done,
    /// The stream ended; treat like done.
    Eof,
}

/// One round of `have` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaveRound {
    pub haves: Vec<ObjectId>,
    pub end: RoundEnd,
}

/// Decode one round of haves, up to its flush, `done`, or EOF.
pub fn decode_have_round<R: Read>(
    reader: &mut PktReader<R>,
) -> Result<HaveRound, ProtocolError> {
    let mut haves = Vec::new();
    let mut line_no = 0usize;
    loop {
        line_no += 1;
        match reader.read_line()? {
            None => {
                return Ok(HaveRound {
                    haves,
                    end: RoundEnd::Eof,
                })
            }
            Some(PktLine::Flush) => {
                return Ok(HaveRound {
                    haves,
                    end: RoundEnd::Flush,
                })
            }
            Some(PktLine::Data(d)) => {
                let line = trim_eol(d);
                if line == b"done" {
                    return Ok(HaveRound {
                        haves,
                        end: RoundEnd::Done,
                    });
                }
                let hex = line.strip_prefix(b"have ").ok_or_else(|| {
                    ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: format!("expected have line, got {:?}", line.as_bstr()),
                    }
                })?;
                let oid = ObjectId::from_hex_bytes(hex).map_err(|e| {
                    ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: format!("malformed have: {}", e),
                    }
                })?;
                haves.push(oid);
            }
            Some(_) => {
                return Err(ProtocolError::UnexpectedData {
                    line: line_no,
                    detail: "v2 sentinel in have round".into(),
                })
            }
        }
    }
}

/// Encode one round of haves followed by a flush.
pub fn encode_have_round<W: Write>(
    writer: &mut PktWriter<W>,
    haves: &[ObjectId],
) -> Result<(), ProtocolError> {
    for have in haves {
        write!(writer, "have {}\n", have)?;
    }
    writer.write_flush()
}

/// Encode the final `done` line. No flush follows it.
pub fn encode_done<W: Write>(writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
    write!(writer, "done\n")
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn parse_ascii<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}
