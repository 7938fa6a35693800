//! Git smart-protocol wire core.
//!
//! This crate implements the transport-independent heart of the git smart
//! protocol: pkt-line framing, sideband multiplexing, capability
//! negotiation, the reference advertisement, the fetch and push request
//! messages, the server's ack/shallow/report replies, and the server-side
//! negotiation drivers for `git-upload-pack` and `git-receive-pack`.
//!
//! Packfile contents, object storage, and ref storage stay behind the
//! contracts in `gitwire-ref` and the driver traits; the outer HTTP/SSH
//! framing is the embedder's job via `gitwire-transport`.

pub mod advrefs;
pub mod capability;
pub mod pktline;
pub mod receive_pack;
pub mod report_status;
pub mod server_response;
pub mod shallow_update;
pub mod sideband;
pub mod update_requests;
pub mod upload_pack;
pub mod upload_request;

use gitwire_hash::HashError;
use gitwire_ref::RefError;
use gitwire_transport::TransportError;

/// Errors that can occur during protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The 4-digit length field is unparsable, reserved, out of range, or
    /// promises more payload than the stream carries.
    #[error("invalid pkt-line length: {0}")]
    InvalidPktLen(String),

    #[error("pkt-line payload too long: {0} bytes")]
    PayloadTooLong(usize),

    /// The peer sent an `ERR` pkt or a sideband error channel message.
    /// Always fatal to the session.
    #[error("remote error: {0}")]
    ErrorLine(String),

    #[error("empty input")]
    EmptyInput,

    #[error("empty advertised-refs message")]
    EmptyAdvRefs,

    #[error("unexpected data at pkt-line {line}: {detail}")]
    UnexpectedData { line: usize, detail: String },

    #[error("upload request contains no wants")]
    EmptyWants,

    #[error("update request contains no commands")]
    EmptyCommands,

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("capability {0} does not take an argument")]
    ArgumentsNotAllowed(String),

    #[error("capability {0} takes a single argument")]
    MultipleArguments(String),

    #[error("capability {0} requires an argument")]
    MissingArgument(String),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
