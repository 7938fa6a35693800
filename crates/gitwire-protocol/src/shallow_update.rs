//! Shallow/unshallow boundary updates.
//!
//! When a fetch negotiates a depth, the server answers the request section
//! with `shallow <oid>` and `unshallow <oid>` lines describing the new
//! history boundary, terminated by a flush.

use std::io::{Read, Write};

use gitwire_hash::ObjectId;

use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShallowUpdate {
    /// Commits that become shallow boundaries.
    pub shallows: Vec<ObjectId>,
    /// Commits that stop being shallow boundaries.
    pub unshallows: Vec<ObjectId>,
}

impl ShallowUpdate {
    pub fn is_empty(&self) -> bool {
        self.shallows.is_empty() && self.unshallows.is_empty()
    }

    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        for oid in &self.shallows {
            write!(writer, "shallow {}", oid)?;
        }
        for oid in &self.unshallows {
            write!(writer, "unshallow {}", oid)?;
        }
        writer.write_flush()
    }

    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        let mut update = ShallowUpdate::default();
        let mut line_no = 0usize;
        loop {
            line_no += 1;
            let line = match reader.read_line()? {
                None | Some(PktLine::Flush) => return Ok(update),
                Some(PktLine::Data(d)) => trim_eol(d).to_vec(),
                Some(_) => {
                    return Err(ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: "v2 sentinel in shallow update".into(),
                    })
                }
            };

            let unexpected = |detail: String| ProtocolError::UnexpectedData {
                line: line_no,
                detail,
            };

            if let Some(hex) = line.strip_prefix(b"shallow ") {
                if line.len() != 48 {
                    return Err(unexpected(format!(
                        "invalid shallow line length {}",
                        line.len()
                    )));
                }
                update.shallows.push(
                    ObjectId::from_hex_bytes(hex)
                        .map_err(|e| unexpected(format!("malformed shallow: {}", e)))?,
                );
            } else if let Some(hex) = line.strip_prefix(b"unshallow ") {
                if line.len() != 50 {
                    return Err(unexpected(format!(
                        "invalid unshallow line length {}",
                        line.len()
                    )));
                }
                update.unshallows.push(
                    ObjectId::from_hex_bytes(hex)
                        .map_err(|e| unexpected(format!("malformed unshallow: {}", e)))?,
                );
            } else {
                return Err(unexpected(format!(
                    "expected shallow/unshallow line, got {:?}",
                    String::from_utf8_lossy(&line)
                )));
            }
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}
