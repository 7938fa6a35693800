use crate::{HashError, ObjectId};

/// Supported object-id formats.
///
/// A server advertises exactly one of these through the `object-format`
/// capability; SHA-1 is assumed when the capability is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 (default, 20 bytes / 40 hex digits).
    #[default]
    Sha1,
    /// SHA-256 (32 bytes / 64 hex digits).
    Sha256,
}

impl HashAlgorithm {
    /// Length of the digest in bytes.
    pub const fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of the hex representation.
    pub const fn hex_len(&self) -> usize {
        self.digest_len() * 2
    }

    /// The null (all-zeros) OID for this format — the wire sentinel for
    /// "no such object" in create/delete commands.
    pub const fn null_oid(&self) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::NULL_SHA1,
            Self::Sha256 => ObjectId::NULL_SHA256,
        }
    }

    /// The name used as the `object-format` capability value.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Look up a format by its capability value.
    pub fn from_name(name: &str) -> Result<Self, HashError> {
        match name {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(HashError::UnknownObjectFormat(name.to_string())),
        }
    }

    /// Infer the format from a hex string length, if unambiguous.
    pub const fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}
