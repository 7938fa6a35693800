//! Server side of the fetch negotiation (`git-upload-pack`).
//!
//! Drives one session end to end:
//!
//! ```text
//! AdvertiseRefs → ReadRequest → ShallowExchange? → HaveRounds → SendPack → End
//! ```
//!
//! The driver owns the wire conversation only. Which commits exist and
//! where the shallow boundary falls is answered by a [`HistorySource`];
//! packfile bytes come ready-made from a `PackfileSource` (any `Read`).
//! Outbound failures become an `ERR` pkt for the peer while the embedder
//! gets the original typed error.

use std::io::{Read, Write};

use bstr::BString;
use gitwire_hash::{HashAlgorithm, ObjectId};
use gitwire_ref::{RefName, RefStore, Reference};
use gitwire_transport::{CancellationToken, Transport};

use crate::advrefs::AdvRefs;
use crate::capability::{
    CapabilityList, AGENT, DEEPEN_NOT, DEEPEN_SINCE, FILTER, MULTI_ACK, MULTI_ACK_DETAILED,
    NO_PROGRESS, OBJECT_FORMAT, OFS_DELTA, SHALLOW, SIDE_BAND, SIDE_BAND_64K, SYMREF, THIN_PACK,
};
use crate::pktline::{PktReader, PktWriter};
use crate::server_response::AckStatus;
use crate::shallow_update::ShallowUpdate;
use crate::sideband::{Channel, Muxer, SidebandMode};
use crate::upload_request::{decode_have_round, Depth, RoundEnd, UploadRequest};
use crate::ProtocolError;

/// Commit-graph knowledge the driver needs. The object store itself stays
/// external; the driver only asks membership and boundary questions.
pub trait HistorySource {
    /// Whether the server has the commit named by `oid`.
    fn contains(&self, oid: &ObjectId) -> bool;

    /// Whether everything reachable from `wants` is covered by `common`,
    /// i.e. the pack can be computed without further haves.
    fn is_complete(&self, wants: &[ObjectId], common: &[ObjectId]) -> bool;

    /// The peeled target when `oid` names an annotated tag.
    fn peel(&self, oid: &ObjectId) -> Option<ObjectId>;

    /// Compute the shallow/unshallow boundary for a depth-limited fetch.
    fn shallow_roots(
        &self,
        wants: &[ObjectId],
        depth: &Depth,
        client_shallows: &[ObjectId],
    ) -> Result<ShallowUpdate, ProtocolError>;
}

/// Bytes of pack data between interim progress reports.
const PROGRESS_INTERVAL: usize = 1024 * 1024;

/// Tunables for an upload-pack session.
#[derive(Debug, Clone)]
pub struct UploadPackConfig {
    /// Value of the advertised `agent` capability.
    pub agent: String,
    /// Advertised via `object-format`.
    pub object_format: HashAlgorithm,
}

impl Default for UploadPackConfig {
    fn default() -> Self {
        Self {
            agent: concat!("gitwire/", env!("CARGO_PKG_VERSION")).to_string(),
            object_format: HashAlgorithm::Sha1,
        }
    }
}

/// Negotiated multi-ack flavor, from the client's capability echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultiAckMode {
    None,
    MultiAck,
    Detailed,
}

impl MultiAckMode {
    fn from_caps(caps: &CapabilityList) -> Self {
        if caps.supports(MULTI_ACK_DETAILED) {
            MultiAckMode::Detailed
        } else if caps.supports(MULTI_ACK) {
            MultiAckMode::MultiAck
        } else {
            MultiAckMode::None
        }
    }
}

/// Session states, advanced by [`UploadPack::serve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AdvertiseRefs,
    ReadRequest,
    ShallowExchange,
    HaveRounds,
    SendPack,
    End,
}

/// The upload-pack negotiation driver.
pub struct UploadPack<'a> {
    refs: &'a dyn RefStore,
    history: &'a dyn HistorySource,
    config: UploadPackConfig,
    cancel: CancellationToken,
}

impl<'a> UploadPack<'a> {
    pub fn new(refs: &'a dyn RefStore, history: &'a dyn HistorySource) -> Self {
        Self {
            refs,
            history,
            config: UploadPackConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: UploadPackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Serve one fetch session over `transport`, streaming `pack` once the
    /// negotiation settles.
    pub fn serve(
        &self,
        transport: &mut dyn Transport,
        pack: &mut dyn Read,
    ) -> Result<(), ProtocolError> {
        let (input, output) = transport.split();
        let mut reader = PktReader::new(input);
        let mut writer = PktWriter::new(output);

        match self.run(&mut reader, &mut writer, pack) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Tell the peer, then surface the typed error locally. A
                // failed write is already hopeless, skip the courtesy pkt.
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
        pack: &mut dyn Read,
    ) -> Result<(), ProtocolError> {
        let mut state = State::AdvertiseRefs;
        let mut request = UploadRequest::default();

        while state != State::End {
            self.check_cancelled()?;
            state = match state {
                State::AdvertiseRefs => {
                    self.advertise(writer)?;
                    State::ReadRequest
                }
                State::ReadRequest => {
                    request = UploadRequest::decode(reader)?;
                    if request.depth != Depth::Infinite || !request.shallows.is_empty() {
                        State::ShallowExchange
                    } else {
                        State::HaveRounds
                    }
                }
                State::ShallowExchange => {
                    let update = self.history.shallow_roots(
                        &request.wants,
                        &request.depth,
                        &request.shallows,
                    )?;
                    update.encode(writer)?;
                    writer.flush()?;
                    State::HaveRounds
                }
                State::HaveRounds => {
                    self.negotiate(reader, writer, &request)?;
                    State::SendPack
                }
                State::SendPack => {
                    self.send_pack(writer, &request, pack)?;
                    State::End
                }
                State::End => unreachable!(),
            };
        }
        Ok(())
    }

    /// Stream the advertisement: refs, peeled tags, HEAD symref, caps.
    fn advertise<W: Write>(&self, writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
        let mut adv = AdvRefs::default();

        let caps = &mut adv.capabilities;
        caps.add(MULTI_ACK)?;
        caps.add(MULTI_ACK_DETAILED)?;
        caps.add(SIDE_BAND)?;
        caps.add(SIDE_BAND_64K)?;
        caps.add(THIN_PACK)?;
        caps.add(OFS_DELTA)?;
        caps.add(SHALLOW)?;
        caps.add(DEEPEN_SINCE)?;
        caps.add(DEEPEN_NOT)?;
        caps.add(NO_PROGRESS)?;
        caps.add(FILTER)?;

        for reference in self.refs.iter_refs()? {
            match reference? {
                Reference::Direct { name, target } => {
                    if name.as_bstr() == "HEAD" {
                        adv.head = Some(target);
                    } else {
                        adv.references.insert(BString::from(name.as_bytes()), target);
                    }
                }
                Reference::Symbolic { name, target } => {
                    if name.as_bstr() == "HEAD" {
                        adv.capabilities
                            .add_value(SYMREF, &format!("HEAD:{}", target))?;
                    }
                }
            }
        }
        if adv.head.is_none() {
            if let Ok(head) = RefName::new("HEAD") {
                adv.head = self.refs.resolve(&head)?;
            }
        }

        for (name, oid) in adv.references.clone() {
            if let Some(peeled) = self.history.peel(&oid) {
                adv.peeled.insert(name, peeled);
            }
        }

        adv.capabilities
            .add_value(OBJECT_FORMAT, self.config.object_format.name())?;
        adv.capabilities.add_value(AGENT, &self.config.agent)?;

        adv.encode(writer)?;
        writer.flush()
    }

    /// Run have rounds until `done`, EOF, or a ready state.
    fn negotiate<R: Read, W: Write>(
        &self,
        reader: &mut PktReader<R>,
        writer: &mut PktWriter<W>,
        request: &UploadRequest,
    ) -> Result<(), ProtocolError> {
        let mode = MultiAckMode::from_caps(&request.capabilities);
        let mut common: Vec<ObjectId> = Vec::new();

        loop {
            self.check_cancelled()?;
            let round = decode_have_round(reader)?;

            let mut round_common = Vec::new();
            for have in &round.haves {
                if self.history.contains(have) && !common.contains(have) {
                    common.push(*have);
                    round_common.push(*have);
                }
            }

            match round.end {
                RoundEnd::Flush => {
                    let ready = self.ack_round(writer, mode, &common, &round_common, request)?;
                    writer.flush()?;
                    if ready {
                        return Ok(());
                    }
                }
                RoundEnd::Done | RoundEnd::Eof => {
                    match common.last() {
                        Some(last) => write_ack(writer, *last, AckStatus::Plain)?,
                        None => write_nak(writer)?,
                    }
                    writer.flush()?;
                    return Ok(());
                }
            }
        }
    }

    /// Answer one flush-terminated round. Returns true once `ready` was
    /// sent, which ends the negotiation from the server side.
    fn ack_round<W: Write>(
        &self,
        writer: &mut PktWriter<W>,
        mode: MultiAckMode,
        common: &[ObjectId],
        round_common: &[ObjectId],
        request: &UploadRequest,
    ) -> Result<bool, ProtocolError> {
        match mode {
            MultiAckMode::None => match common.first() {
                Some(first) => write_ack(writer, *first, AckStatus::Plain)?,
                None => write_nak(writer)?,
            },
            MultiAckMode::MultiAck => {
                for oid in round_common {
                    write_ack(writer, *oid, AckStatus::Continue)?;
                }
                // The client reads until NAK before starting the next round.
                write_nak(writer)?;
            }
            MultiAckMode::Detailed => {
                for oid in round_common {
                    write_ack(writer, *oid, AckStatus::Common)?;
                }
                if let Some(last) = round_common.last() {
                    if self.history.is_complete(&request.wants, common) {
                        write_ack(writer, *last, AckStatus::Ready)?;
                        return Ok(true);
                    }
                }
                write_nak(writer)?;
            }
        }
        Ok(false)
    }

    /// Stream the packfile, wrapped in sideband when negotiated. Progress
    /// goes out on channel 2 unless the client sent `no-progress`.
    fn send_pack<W: Write>(
        &self,
        writer: &mut PktWriter<W>,
        request: &UploadRequest,
        pack: &mut dyn Read,
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
                let report_progress = !request.capabilities.supports(NO_PROGRESS);
                {
                    let mut mux = Muxer::new(writer, mode);
                    let mut buf = [0u8; 8192];
                    let mut total = 0usize;
                    let mut reported = 0usize;
                    loop {
                        self.check_cancelled()?;
                        let n = match pack.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                            Err(e) => return Err(e.into()),
                        };
                        mux.write_channel(Channel::PackData, &buf[..n])?;
                        total += n;
                        if report_progress && total - reported >= PROGRESS_INTERVAL {
                            mux.progress(&format!("Sending pack: {} bytes\r", total))?;
                            reported = total;
                        }
                    }
                    if report_progress {
                        mux.progress(&format!("Sent {} bytes\n", total))?;
                    }
                }
                writer.write_flush()?;
            }
            None => {
                self.copy_pack(pack, writer.inner_mut())?;
            }
        }
        writer.flush()
    }

    fn copy_pack(&self, pack: &mut dyn Read, out: &mut dyn Write) -> Result<(), ProtocolError> {
        let mut buf = [0u8; 8192];
        loop {
            self.check_cancelled()?;
            let n = match pack.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            out.write_all(&buf[..n])?;
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

fn write_ack<W: Write>(
    writer: &mut PktWriter<W>,
    oid: ObjectId,
    status: AckStatus,
) -> Result<(), ProtocolError> {
    match status {
        AckStatus::Plain => write!(writer, "ACK {}\n", oid),
        AckStatus::Continue => write!(writer, "ACK {} continue\n", oid),
        AckStatus::Common => write!(writer, "ACK {} common\n", oid),
        AckStatus::Ready => write!(writer, "ACK {} ready\n", oid),
    }
}

fn write_nak<W: Write>(writer: &mut PktWriter<W>) -> Result<(), ProtocolError> {
    write!(writer, "NAK\n")
}
