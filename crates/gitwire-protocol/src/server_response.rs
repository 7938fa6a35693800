//! Ack/nak negotiation replies.
//!
//! During have rounds the server answers with `ACK <oid>` lines — tagged
//! `continue`/`common`/`ready` in the multi-ack modes — and `NAK` when a
//! round brought nothing new. A `NAK` terminates the reply; so does EOF or
//! any line that is not an ack (which is left unconsumed for the next
//! decoder).

use std::io::{Read, Write};

use bstr::ByteSlice;
use gitwire_hash::ObjectId;

use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

/// The multi-ack tag on an `ACK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Plain `ACK <oid>` (no multi-ack).
    Plain,
    /// `ACK <oid> continue` (multi_ack).
    Continue,
    /// `ACK <oid> common` (multi_ack_detailed).
    Common,
    /// `ACK <oid> ready` (multi_ack_detailed; the pack can be computed).
    Ready,
}

impl AckStatus {
    fn as_str(&self) -> Option<&'static str> {
        match self {
            AckStatus::Plain => None,
            AckStatus::Continue => Some("continue"),
            AckStatus::Common => Some("common"),
            AckStatus::Ready => Some("ready"),
        }
    }
}

/// One `ACK` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub hash: ObjectId,
    pub status: AckStatus,
}

/// A run of acks, empty when the server answered `NAK`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerResponse {
    pub acks: Vec<Ack>,
}

impl ServerResponse {
    /// Encode: a single `NAK` when there are no acks, one `ACK` line per
    /// recorded hash otherwise.
    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        if self.acks.is_empty() {
            return write!(writer, "NAK\n");
        }
        for ack in &self.acks {
            match ack.status.as_str() {
                None => write!(writer, "ACK {}\n", ack.hash)?,
                Some(tag) => write!(writer, "ACK {} {}\n", ack.hash, tag)?,
            }
        }
        Ok(())
    }

    /// Decode ack lines until `NAK`, EOF, or a non-ack line (the latter is
    /// left unconsumed).
    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        let mut response = ServerResponse::default();
        let mut line_no = 0usize;

        loop {
            let is_ack_line = match reader.peek_line()? {
                None => break,
                Some(PktLine::Data(d)) => {
                    let line = trim_eol(d);
                    line == b"NAK" || line.starts_with(b"ACK ")
                }
                Some(_) => false,
            };
            if !is_ack_line {
                break;
            }

            line_no += 1;
            let line = match reader.read_line()? {
                Some(PktLine::Data(d)) => trim_eol(d).to_vec(),
                _ => break,
            };
            if line == b"NAK" {
                break;
            }

            let rest = &line[4..];
            let (hex, status) = match rest.iter().position(|&b| b == b' ') {
                Some(p) => (&rest[..p], Some(&rest[p + 1..])),
                None => (rest, None),
            };
            let hash = ObjectId::from_hex_bytes(hex).map_err(|e| {
                ProtocolError::UnexpectedData {
                    line: line_no,
                    detail: format!("malformed ack hash: {}", e),
                }
            })?;
            let status = match status {
                None => AckStatus::Plain,
                Some(b"continue") => AckStatus::Continue,
                Some(b"common") => AckStatus::Common,
                Some(b"ready") => AckStatus::Ready,
                Some(other) => {
                    return Err(ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: format!("unknown ack status {:?}", other.as_bstr()),
                    })
                }
            };
            response.acks.push(Ack { hash, status });
        }

        Ok(response)
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const OID_A: &str = "6ecf0ef2c2dffb796033e5a02219af86ec6584e5";
    const OID_B: &str = "5dc01c595e6c6ec9ccda4f6f69c131c0dd945f8c";

    fn oid(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    #[test]
    fn nak_decodes_to_empty() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "NAK\n").unwrap();
        }
        let mut reader = PktReader::new(Cursor::new(buf));
        let resp = ServerResponse::decode(&mut reader).unwrap();
        assert!(resp.acks.is_empty());
    }

    #[test]
    fn multi_ack_detailed_sequence() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "ACK {} common\n", OID_A).unwrap();
            write!(w, "ACK {} ready\n", OID_B).unwrap();
            write!(w, "NAK\n").unwrap();
        }
        let mut reader = PktReader::new(Cursor::new(buf));
        let resp = ServerResponse::decode(&mut reader).unwrap();
        assert_eq!(
            resp.acks,
            vec![
                Ack {
                    hash: oid(OID_A),
                    status: AckStatus::Common
                },
                Ack {
                    hash: oid(OID_B),
                    status: AckStatus::Ready
                },
            ]
        );
    }

    #[test]
    fn stops_at_non_ack_line_without_consuming() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "ACK {}\n", OID_A).unwrap();
            write!(w, "shallow {}\n", OID_B).unwrap();
        }
        let mut reader = PktReader::new(Cursor::new(buf));
        let resp = ServerResponse::decode(&mut reader).unwrap();
        assert_eq!(resp.acks.len(), 1);
        assert_eq!(resp.acks[0].status, AckStatus::Plain);

        // The shallow line is still there for the next decoder.
        let next = reader.read_line().unwrap().unwrap();
        assert!(next.data().unwrap().starts_with(b"shallow "));
    }

    #[test]
    fn eof_terminates() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "ACK {} continue\n", OID_A).unwrap();
        }
        let mut reader = PktReader::new(Cursor::new(buf));
        let resp = ServerResponse::decode(&mut reader).unwrap();
        assert_eq!(resp.acks.len(), 1);
    }

    #[test]
    fn unknown_status_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "ACK {} maybe\n", OID_A).unwrap();
        }
        let mut reader = PktReader::new(Cursor::new(buf));
        assert!(ServerResponse::decode(&mut reader).is_err());
    }

    #[test]
    fn encode_empty_is_nak() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            ServerResponse::default().encode(&mut w).unwrap();
        }
        assert_eq!(&buf, b"0008NAK\n");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let resp = ServerResponse {
            acks: vec![
                Ack {
                    hash: oid(OID_A),
                    status: AckStatus::Common,
                },
                Ack {
                    hash: oid(OID_B),
                    status: AckStatus::Plain,
                },
            ],
        };
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            resp.encode(&mut w).unwrap();
        }
        let mut reader = PktReader::new(Cursor::new(buf));
        assert_eq!(ServerResponse::decode(&mut reader).unwrap(), resp);
    }
}
