//! Server side of the push protocol (`git-receive-pack`).
//!
//! ```text
//! AdvertiseRefs → ReadCommands → ReadPackfile? → ApplyRefs → ReportStatus → End
//! ```
//!
//! The packfile is read only when at least one command is not a delete.
//! With `atomic` negotiated, either every command applies or every command
//! fails with the same reason; otherwise each ref update stands on its own.
//! The report is sent only when the client negotiated `report-status`, and
//! rides in sideband channel 1 when a sideband flavor was negotiated.

use std::io::{Read, Write};

use gitwire_hash::HashAlgorithm;
use gitwire_ref::{RefError, RefName, RefStore, Reference};
use gitwire_transport::{CancellationToken, Transport};

use crate::advrefs::AdvRefs;
use crate::capability::{
    AGENT, ATOMIC, DELETE_REFS, OBJECT_FORMAT, OFS_DELTA, PUSH_OPTIONS, REPORT_STATUS,
    SIDE_BAND, SIDE_BAND_64K,
};
use crate::pktline::{PktReader, PktWriter};
use crate::report_status::{CommandStatus, ReportStatus, STATUS_OK};
use crate::sideband::{Muxer, SidebandMode};
use crate::update_requests::{Action, Command, UpdateRequests};
use crate::ProtocolError;

/// Tunables for a receive-pack session.
#[derive(Debug, Clone)]
pub struct ReceivePackConfig {
    /// Value of the advertised `agent` capability.
    pub agent: String,
    /// Advertised via `object-format`.
    pub object_format: HashAlgorithm,
}

impl Default for ReceivePackConfig {
    fn default() -> Self {
        Self {
            agent: concat!("gitwire/", env!("CARGO_PKG_VERSION")).to_string(),
            object_format: HashAlgorithm::Sha1,
        }
    }
}

/// Session states, advanced by [`ReceivePack::serve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AdvertiseRefs,
    ReadCommands,
    ReadPackfile,
    ApplyRefs,
    ReportStatus,
    End,
}

/// The receive-pack negotiation driver.
pub struct ReceivePack<'a> {
    refs: &'a dyn RefStore,
    config: ReceivePackConfig,
    cancel: CancellationToken,
}

impl<'a> ReceivePack<'a> {
    pub fn new(refs: &'a dyn RefStore) -> Self {
        Self {
            refs,
            config: ReceivePackConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ReceivePackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Serve one push session over `transport`, spilling the incoming
    /// packfile into `pack_sink`.
    ///
    /// Returns the report (whether or not it was sent to the peer). A push
    /// with zero commands is a clean no-op.
    pub fn serve(
        &self,
        transport: &mut dyn Transport,
        pack_sink: &mut dyn Write,
    ) -> Result<ReportStatus, ProtocolError> {
        let (input, output) = transport.split();
        let mut reader = PktReader::new(input);
        let mut writer = PktWriter::new(output);

        match self.run(&mut reader, &mut writer, pack_sink) {
            Ok(report) => Ok(report),
            Err(err) => {
                if !matches!(err, ProtocolError::Io(_)) {
                    let _ = writer.write_error(&err.to_string());
                    let _ = writer.flush();
                }
                Err(err)
            }
        }
    }

    fn run<R: Read, W: Write>(
        &self,
        reader: &mut PktReader<R>,
        writer: &mut PktWriter<W>,
        pack_sink: &mut dyn Write,
    ) -> Result<ReportStatus, ProtocolError> {
        let mut state = State::AdvertiseRefs;
        let mut request = UpdateRequests::default();
        let mut report = ReportStatus::default();

        while state != State::End {
            self.check_cancelled()?;
            state = match state {
                State::AdvertiseRefs => {
                    self.advertise(writer)?;
                    State::ReadCommands
                }
                State::ReadCommands => match UpdateRequests::decode(reader) {
                    Ok(decoded) => {
                        request = decoded;
                        if request.commands.iter().any(|c| c.action() != Action::Delete) {
                            State::ReadPackfile
                        } else {
                            State::ApplyRefs
                        }
                    }
                    // A client with nothing to push just flushes and hangs
                    // up; that is a clean end of session, not a failure.
                    Err(ProtocolError::EmptyCommands) => return Ok(report),
                    Err(err) => return Err(err),
                },
                State::ReadPackfile => {
                    if let Err(err) = self.copy_pack(reader.inner_mut(), pack_sink) {
                        if matches!(err, ProtocolError::Cancelled) {
                            return Err(err);
                        }
                        // A broken pack is a per-push failure, reported to
                        // the client rather than tearing the session down.
                        report.unpack_status = err.to_string();
                    }
                    State::ApplyRefs
                }
                State::ApplyRefs => {
                    report.command_statuses = self.apply(&request, &report.unpack_status);
                    State::ReportStatus
                }
                State::ReportStatus => {
                    if request.capabilities.supports(REPORT_STATUS) {
                        self.send_report(writer, &request, &report)?;
                    }
                    State::End
                }
                State::End => unreachable!(),
            };
        }
        Ok(report)
    }

    /// Advertise the current refs and the push capabilities.
    fn advertise<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        let mut adv = AdvRefs::default();

        let caps = &mut adv.capabilities;
        caps.add(REPORT_STATUS)?;
        caps.add(DELETE_REFS)?;
        caps.add(OFS_DELTA)?;
        caps.add(ATOMIC)?;
        caps.add(PUSH_OPTIONS)?;
        caps.add(SIDE_BAND_64K)?;
        caps.add_value(OBJECT_FORMAT, self.config.object_format.name())?;
        caps.add_value(AGENT, &self.config.agent)?;

        for reference in self.refs.iter_refs()? {
            if let Reference::Direct { name, target } = reference? {
                if name.as_bstr() != "HEAD" {
                    adv.references
                        .insert(bstr::BString::from(name.as_bytes()), target);
                }
            }
        }

        adv.encode(writer)?;
        writer.flush()
    }

    /// Apply the commands against the ref store, honoring `atomic`.
    fn apply(&self, request: &UpdateRequests, unpack_status: &str) -> Vec<CommandStatus> {
        // A broken pack fails every command the same way.
        if unpack_status != STATUS_OK {
            return request
                .commands
                .iter()
                .map(|c| CommandStatus {
                    name: c.name.clone(),
                    status: "unpacker error".to_string(),
                })
                .collect();
        }

        if request.capabilities.supports(ATOMIC) {
            // All-or-nothing: dry-run every command first; one failure
            // poisons the whole batch with the same reason.
            for command in &request.commands {
                if let Err(reason) = self.check_command(request, command) {
                    let reason = format!("atomic push failed: {}", reason);
                    return request
                        .commands
                        .iter()
                        .map(|c| CommandStatus {
                            name: c.name.clone(),
                            status: reason.clone(),
                        })
                        .collect();
                }
            }
        }

        request
            .commands
            .iter()
            .map(|command| {
                let status = match self.apply_command(request, command) {
                    Ok(()) => STATUS_OK.to_string(),
                    Err(reason) => reason,
                };
                CommandStatus {
                    name: command.name.clone(),
                    status,
                }
            })
            .collect()
    }

    /// Validate a command without touching the store.
    fn check_command(&self, request: &UpdateRequests, command: &Command) -> Result<RefName, String> {
        if command.action() == Action::Invalid {
            return Err("malformed command".to_string());
        }
        // Deleting is only on the table when the client echoed delete-refs.
        if command.action() == Action::Delete
            && !request.capabilities.supports(DELETE_REFS)
        {
            return Err("delete-refs not advertised".to_string());
        }
        let name = RefName::new(command.name.clone()).map_err(|_| "funny refname".to_string())?;
        let current = self
            .refs
            .resolve(&name)
            .map_err(|e| e.to_string())?
            .unwrap_or(command.old.algorithm().null_oid());
        if current != command.old {
            return Err("stale info".to_string());
        }
        Ok(name)
    }

    fn apply_command(&self, request: &UpdateRequests, command: &Command) -> Result<(), String> {
        let name = self.check_command(request, command)?;
        let result = match command.action() {
            Action::Delete => self.refs.remove_ref(&name, command.old),
            _ => self.refs.set_ref(&name, command.old, command.new),
        };
        result.map_err(|e| match e {
            RefError::CasFailed { .. } => "stale info".to_string(),
            other => other.to_string(),
        })
    }

    /// Send the report, inside sideband channel 1 when negotiated.
    fn send_report<W: Write>(
        &self,
        writer: &mut PktWriter<W>,
        request: &UpdateRequests,
        report: &ReportStatus,
    ) -> Result<(), ProtocolError> {
        let sideband = if request.capabilities.supports(SIDE_BAND_64K) {
            Some(SidebandMode::Sideband64k)
        } else if request.capabilities.supports(SIDE_BAND) {
            Some(SidebandMode::Sideband)
        } else {
            None
        };

        match sideband {
            Some(mode) => {
                let mut framed = Vec::new();
                {
                    let mut inner = PktWriter::new(&mut framed);
                    report.encode(&mut inner)?;
                }
                {
                    let mut mux = Muxer::new(writer, mode);
                    mux.write_all(&framed).map_err(ProtocolError::Io)?;
                }
                writer.write_flush()?;
            }
            None => report.encode(writer)?,
        }
        writer.flush()
    }

    fn copy_pack(&self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<(), ProtocolError> {
        let mut buf = [0u8; 8192];
        loop {
            self.check_cancelled()?;
            let n = match input.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            sink.write_all(&buf[..n])?;
        }
    }

    fn check_cancelled(&self) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            Err(ProtocolError::Cancelled)
        } else {
            Ok(())
        }
    }
}
