//! Per-ref push results.
//!
//! After applying (or refusing) a push, a server that negotiated
//! `report-status` sends `unpack <status>` followed by one `ok <ref>` or
//! `ng <ref> <reason>` line per command, then a flush. The report may ride
//! inside sideband channel 1; the caller demultiplexes before decoding.

use std::io::{Read, Write};

use bstr::{BString, ByteSlice};

use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::ProtocolError;

/// The status string for a successful unpack or ref update.
pub const STATUS_OK: &str = "ok";

/// Result of one ref update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub name: BString,
    /// `"ok"` or the server's failure reason.
    pub status: String,
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// The server's verdict on a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    /// `"ok"` or the reason the packfile could not be unpacked.
    pub unpack_status: String,
    pub command_statuses: Vec<CommandStatus>,
}

impl Default for ReportStatus {
    fn default() -> Self {
        Self {
            unpack_status: STATUS_OK.to_string(),
            command_statuses: Vec::new(),
        }
    }
}

impl ReportStatus {
    /// The first failure, if any: the unpack error wins, then per-ref
    /// failures in order.
    pub fn first_error(&self) -> Option<String> {
        if self.unpack_status != STATUS_OK {
            return Some(format!("unpack error: {}", self.unpack_status));
        }
        self.command_statuses
            .iter()
            .find(|c| !c.is_ok())
            .map(|c| format!("{}: {}", c.name, c.status))
    }

    pub fn is_ok(&self) -> bool {
        self.first_error().is_none()
    }

    pub fn encode<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        write!(writer, "unpack {}\n", self.unpack_status)?;
        for command in &self.command_statuses {
            if command.is_ok() {
                write!(writer, "ok {}\n", command.name)?;
            } else {
                write!(writer, "ng {} {}\n", command.name, command.status)?;
            }
        }
        writer.write_flush()
    }

    pub fn decode<R: Read>(reader: &mut PktReader<R>) -> Result<Self, ProtocolError> {
        let mut report = ReportStatus::default();
        let mut line_no = 1usize;

        let first = match reader.read_line()? {
            None => return Err(ProtocolError::EmptyInput),
            Some(PktLine::Flush) => {
                return Err(ProtocolError::UnexpectedData {
                    line: line_no,
                    detail: "premature flush".into(),
                })
            }
            Some(PktLine::Data(d)) => trim_eol(d).to_vec(),
            Some(_) => {
                return Err(ProtocolError::UnexpectedData {
                    line: line_no,
                    detail: "v2 sentinel in report status".into(),
                })
            }
        };
        let unpack = first.strip_prefix(b"unpack ").ok_or_else(|| {
            ProtocolError::UnexpectedData {
                line: line_no,
                detail: "malformed unpack status".into(),
            }
        })?;
        if unpack.is_empty() {
            return Err(ProtocolError::UnexpectedData {
                line: line_no,
                detail: "malformed unpack status".into(),
            });
        }
        report.unpack_status = String::from_utf8_lossy(unpack).into_owned();

        loop {
            line_no += 1;
            let line = match reader.read_line()? {
                // The report must be closed by a flush.
                None => {
                    return Err(ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: "missing flush after report".into(),
                    })
                }
                Some(PktLine::Flush) => break,
                Some(PktLine::Data(d)) => trim_eol(d).to_vec(),
                Some(_) => {
                    return Err(ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: "v2 sentinel in report status".into(),
                    })
                }
            };

            if let Some(name) = line.strip_prefix(b"ok ") {
                report.command_statuses.push(CommandStatus {
                    name: BString::from(name),
                    status: STATUS_OK.to_string(),
                });
            } else if let Some(rest) = line.strip_prefix(b"ng ") {
                let sp = rest.iter().position(|&b| b == b' ').ok_or_else(|| {
                    ProtocolError::UnexpectedData {
                        line: line_no,
                        detail: "ng line without a reason".into(),
                    }
                })?;
                report.command_statuses.push(CommandStatus {
                    name: BString::from(&rest[..sp]),
                    status: String::from_utf8_lossy(&rest[sp + 1..]).into_owned(),
                });
            } else {
                return Err(ProtocolError::UnexpectedData {
                    line: line_no,
                    detail: format!("malformed command status {:?}", line.as_bstr()),
                });
            }
        }

        Ok(report)
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_bytes(bytes: &[u8]) -> Result<ReportStatus, ProtocolError> {
        let mut reader = PktReader::new(Cursor::new(bytes.to_vec()));
        ReportStatus::decode(&mut reader)
    }

    #[test]
    fn unpack_ok_single_ref() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "unpack ok\n").unwrap();
            write!(w, "ok refs/heads/master\n").unwrap();
            w.write_flush().unwrap();
        }
        let report = decode_bytes(&buf).unwrap();
        assert_eq!(report.unpack_status, "ok");
        assert_eq!(report.command_statuses.len(), 1);
        assert!(report.command_statuses[0].is_ok());
        assert_eq!(report.command_statuses[0].name, "refs/heads/master");
        assert!(report.is_ok());
    }

    #[test]
    fn ng_line_carries_reason() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "unpack ok\n").unwrap();
            write!(w, "ng refs/heads/main non-fast-forward\n").unwrap();
            w.write_flush().unwrap();
        }
        let report = decode_bytes(&buf).unwrap();
        assert!(!report.is_ok());
        assert_eq!(
            report.first_error().unwrap(),
            "refs/heads/main: non-fast-forward"
        );
    }

    #[test]
    fn unpack_error_wins() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "unpack index-pack failed\n").unwrap();
            write!(w, "ng refs/heads/main unpacker error\n").unwrap();
            w.write_flush().unwrap();
        }
        let report = decode_bytes(&buf).unwrap();
        assert_eq!(
            report.first_error().unwrap(),
            "unpack error: index-pack failed"
        );
    }

    #[test]
    fn premature_flush_rejected() {
        assert!(matches!(
            decode_bytes(b"0000"),
            Err(ProtocolError::UnexpectedData { line: 1, .. })
        ));
    }

    #[test]
    fn malformed_unpack_status_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "unpacked ok\n").unwrap();
            w.write_flush().unwrap();
        }
        assert!(decode_bytes(&buf).is_err());
    }

    #[test]
    fn missing_flush_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "unpack ok\n").unwrap();
            write!(w, "ok refs/heads/main\n").unwrap();
        }
        assert!(decode_bytes(&buf).is_err());
    }

    #[test]
    fn unpack_ok_with_no_command_statuses_is_accepted() {
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            write!(w, "unpack ok\n").unwrap();
            w.write_flush().unwrap();
        }
        let report = decode_bytes(&buf).unwrap();
        assert!(report.command_statuses.is_empty());
        assert!(report.is_ok());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let report = ReportStatus {
            unpack_status: "ok".into(),
            command_statuses: vec![
                CommandStatus {
                    name: "refs/heads/main".into(),
                    status: "ok".into(),
                },
                CommandStatus {
                    name: "refs/heads/old".into(),
                    status: "deletion prohibited".into(),
                },
            ],
        };
        let mut buf = Vec::new();
        {
            let mut w = PktWriter::new(&mut buf);
            report.encode(&mut w).unwrap();
        }
        assert_eq!(decode_bytes(&buf).unwrap(), report);
    }
}
