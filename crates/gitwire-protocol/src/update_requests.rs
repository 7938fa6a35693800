//! Update-requests (push) encoding/decoding.
//!
//! A push client sends an optional shallow line, then one command per ref
//! (`<old> <new> <name>`, the first line carrying the capability list after
//! a NUL), a flush, and — when `push-options` was negotiated — one option
//! per pkt-line followed by another flush. The raw packfile bytes follow
//! the framed section.
//!
//! The exact line lengths are part of the format and drive the error
//! messages: a SHA-1 shallow line is 48 bytes, the first command at least
//! 84 (including its NUL), later commands at least 83.

use std::io::{Read, Write};

use bstr::{BStr, BString};
use gitwire_hash::{HashAlgorithm, ObjectId};

use crate::capability::{CapabilityList, PUSH_OPTIONS};
use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

/// What a command does to its ref, derived from the two hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
    /// Both hashes zero — never valid on the wire.
    Invalid,
}

/// A single ref update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: BString,
    pub old: ObjectId,
    pub new: ObjectId,
}

impl Command {
    pub fn new(name: impl Into<BString>, old: ObjectId, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            old,
            new,
        }
    }

    pub fn action(&self) -> Action {
        match (self.old.is_null(), self.new.is_null()) {
            (true, true) => Action::Invalid,
            (true, false) => Action::Create,
            (false, true) => Action::Delete,
            (false, false) => Action::Update,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.action() == Action::Invalid {
            return Err(ProtocolError::MalformedCommand(format!(
                "{}: old and new are both zero",
                self.name
            )));
        }
        if self.name.is_empty() {
            return Err(ProtocolError::MalformedCommand("empty ref name".into()));
        }
        Ok(())
    }
}

/// The command message of a push session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequests {
    pub capabilities: CapabilityList,
    pub shallow: Option<ObjectId>,
    pub commands: Vec<Command>,
    /// Push options; only on the wire when `push-options` was negotiated.
    pub options: Vec<String>,
}

impl UpdateRequests {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.commands.is_empty() {
            return Err(ProtocolError::EmptyCommands);
        }
        for command in &self.commands {
            command.validate()?;
        }
        Ok(())
    }

    /// Encode the command section and, when negotiated, the push-options
    /// section. The packfile is not part of this message.
    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        self.validate()?;

        if let Some(shallow) = &self.shallow {
            write!(writer, "shallow {}", shallow)?;
        }

        let caps = self.capabilities.to_string();
        for (i, command) in self.commands.iter().enumerate() {
            if i == 0 {
                write!(
                    writer,
                    "{} {} {}\0{}",
                    command.old, command.new, command.name, caps
                )?;
            } else {
                write!(writer, "{} {} {}", command.old, command.new, command.name)?;
            }
        }
        writer.write_flush()?;

        if self.capabilities.supports(PUSH_OPTIONS) {
            for option in &self.options {
                writer.write_data(option.as_bytes())?;
            }
            writer.write_flush()?;
        }

        Ok(())
    }

    /// Decode the command section (and the options section when the
    /// decoded capabilities include `push-options`). The reader is left
    /// positioned at the first packfile byte.
    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        Decoder::new(reader).run()
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
    hash_len: usize,
    line: usize,
}

impl<'a, R: Read> Decoder<'a, R> {
    fn new(reader: &'a mut PktReader<R>) -> Self {
        Self {
            reader,
            hash_len: HashAlgorithm::Sha1.hex_len(),
            line: 0,
        }
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
                    detail: "v2 sentinel in update request".into(),
                })
            }
            Some(PktLine::Data(d)) => Ok(Frame::Line(trim_eol(d).to_vec())),
        }
    }

    fn run(mut self) -> Result<UpdateRequests, ProtocolError> {
        let mut req = UpdateRequests::default();

        // Optional shallow line, then the first command (with caps).
        let mut first = match self.next_frame()? {
            Frame::Eof => return Err(ProtocolError::EmptyInput),
            Frame::Flush => return Err(ProtocolError::EmptyCommands),
            Frame::Line(line) => line,
        };

        if first.starts_with(b"shallow ") {
            if first.len() != 8 + self.hash_len {
                return Err(self.unexpected(format!(
                    "invalid shallow line length {}",
                    first.len()
                )));
            }
            let oid = ObjectId::from_hex_bytes(&first[8..])
                .map_err(|e| self.unexpected(format!("malformed shallow: {}", e)))?;
            req.shallow = Some(oid);

            first = match self.next_frame()? {
                Frame::Eof | Frame::Flush => return Err(ProtocolError::EmptyCommands),
                Frame::Line(line) => line,
            };
        }

        // First command: `<old> <new> <name>\0<caps>`, at least 84 bytes.
        if first.len() < 2 * self.hash_len + 4 {
            return Err(ProtocolError::MalformedCommand(format!(
                "first command line too short: {} bytes",
                first.len()
            )));
        }
        let nul = first
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.unexpected("missing NUL before capability list"))?;
        req.capabilities = CapabilityList::decode(&first[nul + 1..])?;
        req.commands.push(self.parse_command(&first[..nul])?);

        loop {
            match self.next_frame()? {
                Frame::Eof => return Err(self.unexpected("missing flush after commands")),
                Frame::Flush => break,
                Frame::Line(line) => req.commands.push(self.parse_command(&line)?),
            }
        }

        if req.capabilities.supports(PUSH_OPTIONS) {
            loop {
                match self.next_frame()? {
                    Frame::Eof => {
                        return Err(self.unexpected("missing flush after push options"))
                    }
                    Frame::Flush => break,
                    Frame::Line(line) => {
                        req.options.push(String::from_utf8_lossy(&line).into_owned());
                    }
                }
            }
        }

        Ok(req)
    }

    /// Parse `<old> <new> <name>`; at least 83 bytes for SHA-1.
    fn parse_command(&self, line: &[u8]) -> Result<Command, ProtocolError> {
        let h = self.hash_len;
        if line.len() < 2 * h + 3 {
            return Err(ProtocolError::MalformedCommand(format!(
                "command line too short: {} bytes",
                line.len()
            )));
        }
        if line[h] != b' ' || line[2 * h + 1] != b' ' {
            return Err(ProtocolError::MalformedCommand(format!(
                "missing hash separators in {:?}",
                BStr::new(line)
            )));
        }
        let old = ObjectId::from_hex_bytes(&line[..h]).map_err(|e| {
            ProtocolError::MalformedCommand(format!("invalid old hash: {}", e))
        })?;
        let new = ObjectId::from_hex_bytes(&line[h + 1..2 * h + 1]).map_err(|e| {
            ProtocolError::MalformedCommand(format!("invalid new hash: {}", e))
        })?;
        let command = Command::new(BString::from(&line[2 * h + 2..]), old, new);
        command.validate()?;
        Ok(command)
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const H1: &str = "1111111111111111111111111111111111111111";
    const H2: &str = "2222222222222222222222222222222222222222";
    const ZERO: &str = "0000000000000000000000000000000000000000";

    fn oid(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    fn encode_to_bytes(req: &UpdateRequests) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = PktWriter::new(&mut buf);
        req.encode(&mut writer).unwrap();
        buf
    }

    fn decode_bytes(bytes: &[u8]) -> Result<UpdateRequests, ProtocolError> {
        let mut reader = PktReader::new(Cursor::new(bytes.to_vec()));
        UpdateRequests::decode(&mut reader)
    }

    #[test]
    fn three_commands_wire_format() {
        let mut req = UpdateRequests::default();
        req.capabilities.add("shallow").unwrap();
        req.commands = vec![
            Command::new("myref1", oid(H1), oid(H2)),
            Command::new("myref2", oid(ZERO), oid(H2)),
            Command::new("myref3", oid(H1), oid(ZERO)),
        ];

        let buf = encode_to_bytes(&req);
        let expected = format!(
            "0064{} {} myref1\0shallow005c{} {} myref2005c{} {} myref30000",
            H1, H2, ZERO, H2, H1, ZERO
        );
        assert_eq!(buf, expected.as_bytes());
    }

    #[test]
    fn actions_derive_from_hashes() {
        assert_eq!(Command::new("r", oid(H1), oid(H2)).action(), Action::Update);
        assert_eq!(Command::new("r", oid(ZERO), oid(H2)).action(), Action::Create);
        assert_eq!(Command::new("r", oid(H1), oid(ZERO)).action(), Action::Delete);
        assert_eq!(
            Command::new("r", oid(ZERO), oid(ZERO)).action(),
            Action::Invalid
        );
    }

    #[test]
    fn roundtrip_with_shallow_and_options() {
        let mut req = UpdateRequests::default();
        req.capabilities.add("report-status").unwrap();
        req.capabilities.add(PUSH_OPTIONS).unwrap();
        req.shallow = Some(oid(H1));
        req.commands = vec![Command::new("refs/heads/main", oid(H1), oid(H2))];
        req.options = vec!["ci.skip".into(), "notify=none".into()];

        let decoded = decode_bytes(&encode_to_bytes(&req)).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn options_absent_without_capability() {
        let mut req = UpdateRequests::default();
        req.commands = vec![Command::new("refs/heads/main", oid(H1), oid(H2))];
        req.options = vec!["ignored".into()];

        let buf = encode_to_bytes(&req);
        // One command line + one flush, nothing else.
        assert!(buf.ends_with(b"0000"));
        assert!(!String::from_utf8_lossy(&buf).contains("ignored"));
    }

    #[test]
    fn invalid_shallow_length_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            // 39-digit hash → 47-byte line.
            write!(w, "shallow {}", &H1[..39]).unwrap();
            w.write_flush().unwrap();
        }
        let err = decode_bytes(&buf).unwrap_err();
        assert!(
            matches!(&err, ProtocolError::UnexpectedData { detail, .. } if detail.contains("47"))
        );
    }

    #[test]
    fn first_command_requires_nul() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "{} {} refs/heads/main", H1, H2).unwrap();
            w.write_flush().unwrap();
        }
        let err = decode_bytes(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedData { .. }));
    }

    #[test]
    fn both_zero_hashes_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "{} {} refs/heads/main\0", ZERO, ZERO).unwrap();
            w.write_flush().unwrap();
        }
        let err = decode_bytes(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedCommand(_)));
    }

    #[test]
    fn short_command_line_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "{} {} a\0", H1, H2).unwrap();
            write!(w, "{} tooshort", H1).unwrap();
            w.write_flush().unwrap();
        }
        let err = decode_bytes(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedCommand(_)));
    }

    #[test]
    fn flush_without_commands_is_empty() {
        assert!(matches!(
            decode_bytes(b"0000"),
            Err(ProtocolError::EmptyCommands)
        ));
    }

    #[test]
    fn empty_encode_rejected() {
        let req = UpdateRequests::default();
        let mut writer = PktWriter::new(Vec::new());
        assert!(matches!(
            req.encode(&mut writer),
            Err(ProtocolError::EmptyCommands)
        ));
    }
}
