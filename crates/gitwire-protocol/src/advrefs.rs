//! Reference advertisement encoding/decoding.
//!
//! The advertisement is the first message a server sends: one pkt-line per
//! ref, the first line carrying the capability list after a NUL byte, then
//! optional `shallow` lines, then a flush. When a server has nothing to
//! advertise it sends the `capabilities^{}` placeholder with a zero OID.
//!
//! Over smart HTTP the advertisement is preceded by a [`SmartReply`]
//! preamble (`# service=<name>`); whether to consume it is the embedder's
//! call, since bare TCP and SSH transports do not send it.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use bstr::{BStr, BString, ByteSlice};
use gitwire_hash::{HashAlgorithm, ObjectId};
use gitwire_transport::Service;

use crate::capability::{CapabilityList, OBJECT_FORMAT, SYMREF};
use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

/// The ref name placeholder used when only capabilities are advertised.
pub const CAPS_PLACEHOLDER: &str = "capabilities^{}";

/// A decoded or to-be-encoded reference advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvRefs {
    /// The OID `HEAD` points at, if the server advertised one.
    pub head: Option<ObjectId>,
    pub capabilities: CapabilityList,
    /// Direct refs by name, sorted by the map.
    pub references: BTreeMap<BString, ObjectId>,
    /// Peeled (`^{}`) targets of annotated tags, keyed by the source ref.
    pub peeled: BTreeMap<BString, ObjectId>,
    /// Shallow boundary commits.
    pub shallows: Vec<ObjectId>,
}

impl AdvRefs {
    /// Whether the advertisement names no objects at all (capabilities may
    /// still be present — that is the placeholder form).
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
            && self.references.is_empty()
            && self.peeled.is_empty()
            && self.shallows.is_empty()
    }

    /// The ref name `HEAD` points at.
    ///
    /// Prefers the `symref` capability. Servers older than 1.8.4.3 do not
    /// send one; for those, `refs/heads/master` wins if its OID matches,
    /// otherwise the first ref in lexicographic order with the same OID.
    pub fn head_target(&self) -> Result<Option<BString>, ProtocolError> {
        for value in self.capabilities.get_values(SYMREF) {
            if let Some(target) = value.strip_prefix("HEAD:") {
                return Ok(Some(BString::from(target)));
            }
        }
        let Some(head) = self.head else {
            return Ok(None);
        };
        if self.references.get(BStr::new("refs/heads/master")) == Some(&head) {
            return Ok(Some(BString::from("refs/heads/master")));
        }
        for (name, oid) in &self.references {
            if *oid == head {
                return Ok(Some(name.clone()));
            }
        }
        Err(ProtocolError::ReferenceNotFound("HEAD".into()))
    }

    /// Encode the advertisement, ending with a flush pkt.
    ///
    /// Refs are emitted in ascending name order with each peeled line
    /// directly after its source ref; shallows are sorted for determinism.
    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        let caps = self.capabilities.to_string();
        match self.head {
            Some(head) => write!(writer, "{} HEAD\0{}\n", head, caps)?,
            None => write!(writer, "{} {}\0{}\n", self.null_oid(), CAPS_PLACEHOLDER, caps)?,
        }

        for (name, oid) in &self.references {
            write!(writer, "{} {}\n", oid, name)?;
            if let Some(peeled) = self.peeled.get(name) {
                write!(writer, "{} {}^{{}}\n", peeled, name)?;
            }
        }

        let mut shallows = self.shallows.clone();
        shallows.sort();
        shallows.dedup();
        for oid in &shallows {
            write!(writer, "shallow {}\n", oid)?;
        }

        writer.write_flush()
    }

    /// Decode an advertisement from `reader`.
    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        Decoder::new(reader).run()
    }

    fn null_oid(&self) -> ObjectId {
        self.capabilities
            .get(OBJECT_FORMAT)
            .and_then(|name| HashAlgorithm::from_name(name).ok())
            .unwrap_or_default()
            .null_oid()
    }
}

/// Decoder states, advanced one pkt-line at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the first line: hash (or zero) + name + NUL + caps.
    FirstHash,
    /// Expecting ref lines, a `shallow` line, or the final flush.
    OtherRefs,
    /// Expecting only `shallow` lines or the final flush.
    Shallow,
    Done,
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

    fn next_frame(&mut self) -> Result<Frame, ProtocolError> {
        self.line += 1;
        match self.reader.read_line()? {
            None => Ok(Frame::Eof),
            Some(PktLine::Flush) => Ok(Frame::Flush),
            Some(PktLine::Delim) | Some(PktLine::ResponseEnd) => {
                Err(ProtocolError::UnexpectedData {
                    line: self.line,
                    detail: "v2 sentinel in v1 advertisement".into(),
                })
            }
            Some(PktLine::Data(d)) => Ok(Frame::Line(trim_eol(d).to_vec())),
        }
    }

    fn run(mut self) -> Result<AdvRefs, ProtocolError> {
        let mut adv = AdvRefs::default();
        let mut state = State::FirstHash;
        while state != State::Done {
            state = match state {
                State::FirstHash => self.first_hash(&mut adv)?,
                State::OtherRefs => self.other_refs(&mut adv)?,
                State::Shallow => self.shallow(&mut adv)?,
                State::Done => unreachable!(),
            };
        }
        Ok(adv)
    }

    fn unexpected(&self, detail: impl Into<String>) -> ProtocolError {
        ProtocolError::UnexpectedData {
            line: self.line,
            detail: detail.into(),
        }
    }

    fn first_hash(&mut self, adv: &mut AdvRefs) -> Result<State, ProtocolError> {
        let line = match self.next_frame()? {
            Frame::Eof => return Err(ProtocolError::EmptyInput),
            Frame::Flush => return Err(ProtocolError::EmptyAdvRefs),
            Frame::Line(line) => line,
        };

        let sp = line
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| self.unexpected("short line: missing space after hash"))?;
        let oid = ObjectId::from_hex_bytes(&line[..sp])
            .map_err(|e| self.unexpected(format!("invalid hash: {}", e)))?;

        let rest = &line[sp + 1..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.unexpected("missing NUL before capability list"))?;
        let (name, caps) = (&rest[..nul], &rest[nul + 1..]);

        adv.capabilities = CapabilityList::decode(caps)?;

        if oid.is_null() {
            if name != CAPS_PLACEHOLDER.as_bytes() {
                return Err(self.unexpected(format!(
                    "zero hash must carry {}, got {:?}",
                    CAPS_PLACEHOLDER,
                    name.as_bstr()
                )));
            }
        } else if name == b"HEAD" {
            adv.head = Some(oid);
        } else if name.ends_with(b"^{}") {
            return Err(self.unexpected("peeled reference cannot come first"));
        } else {
            adv.references.insert(BString::from(name), oid);
        }

        Ok(State::OtherRefs)
    }

    fn other_refs(&mut self, adv: &mut AdvRefs) -> Result<State, ProtocolError> {
        // Peek so a shallow line can hand over without consuming it.
        match self.reader.peek_line()? {
            None => return Ok(State::Done),
            Some(PktLine::Data(d)) if d.starts_with(b"shallow ") => return Ok(State::Shallow),
            _ => {}
        }

        let line = match self.next_frame()? {
            Frame::Eof | Frame::Flush => return Ok(State::Done),
            Frame::Line(line) => line,
        };

        let sp = line
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| self.unexpected("short ref line: missing space"))?;
        let oid = ObjectId::from_hex_bytes(&line[..sp])
            .map_err(|e| self.unexpected(format!("invalid hash: {}", e)))?;
        let name = &line[sp + 1..];
        if name.is_empty() {
            return Err(self.unexpected("empty ref name"));
        }

        if let Some(base) = name.strip_suffix(b"^{}") {
            let base = BString::from(base);
            if !adv.references.contains_key(&base) {
                return Err(self.unexpected(format!(
                    "peeled line for unknown ref {:?}",
                    base
                )));
            }
            adv.peeled.insert(base, oid);
        } else {
            adv.references.insert(BString::from(name), oid);
        }

        Ok(State::OtherRefs)
    }

    fn shallow(&mut self, adv: &mut AdvRefs) -> Result<State, ProtocolError> {
        let line = match self.next_frame()? {
            Frame::Eof | Frame::Flush => return Ok(State::Done),
            Frame::Line(line) => line,
        };

        let hex = line
            .strip_prefix(b"shallow ")
            .ok_or_else(|| self.unexpected("ref line after shallow section"))?;
        let oid = ObjectId::from_hex_bytes(hex)
            .map_err(|e| self.unexpected(format!("malformed shallow line: {}", e)))?;
        adv.shallows.push(oid);

        Ok(State::Shallow)
    }
}

/// Smart-HTTP service announcement: `# service=<name>` followed by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartReply {
    pub service: Service,
}

impl SmartReply {
    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        write!(writer, "# service={}\n", self.service)?;
        writer.write_flush()
    }

    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        let service = match reader.read_line()? {
            None => return Err(ProtocolError::EmptyInput),
            Some(PktLine::Data(d)) => {
                let line = trim_eol(d);
                let name = line.strip_prefix(b"# service=").ok_or_else(|| {
                    ProtocolError::UnexpectedData {
                        line: 1,
                        detail: "missing service announcement".into(),
                    }
                })?;
                Service::from_name(&String::from_utf8_lossy(name))?
            }
            Some(_) => {
                return Err(ProtocolError::UnexpectedData {
                    line: 1,
                    detail: "missing service announcement".into(),
                })
            }
        };
        match reader.read_line()? {
            Some(PktLine::Flush) => Ok(Self { service }),
            _ => Err(ProtocolError::UnexpectedData {
                line: 2,
                detail: "service announcement must end with a flush".into(),
            }),
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}
