use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_to_string};
use crate::{HashAlgorithm, HashError};

/// A git object identifier as it travels over the wire.
///
/// An enum with one variant per supported format, carrying the raw digest
/// bytes inline. The zero value is the sentinel for "no such object" and
/// marks reference creation/deletion in push commands.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    /// The SHA-1 null OID (all zeros).
    pub const NULL_SHA1: Self = Self::Sha1([0u8; 20]);
    /// The SHA-256 null OID (all zeros).
    pub const NULL_SHA256: Self = Self::Sha256([0u8; 32]);

    /// Create an ObjectId from raw digest bytes and a format.
    pub fn from_bytes(bytes: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        if bytes.len() != algo.digest_len() {
            return Err(HashError::InvalidHashLength {
                expected: algo.digest_len(),
                actual: bytes.len(),
            });
        }
        match algo {
            HashAlgorithm::Sha1 => {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(bytes);
                Ok(Self::Sha1(arr))
            }
            HashAlgorithm::Sha256 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(bytes);
                Ok(Self::Sha256(arr))
            }
        }
    }

    /// Parse a hex representation, inferring the format from its length
    /// (40 digits → SHA-1, 64 → SHA-256). Either case is accepted.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        Self::from_hex_bytes(hex.as_bytes())
    }

    /// Like [`from_hex`](Self::from_hex), but on raw payload bytes as they
    /// arrive in a pkt-line.
    pub fn from_hex_bytes(hex: &[u8]) -> Result<Self, HashError> {
        let algo =
            HashAlgorithm::from_hex_len(hex.len()).ok_or(HashError::InvalidHexLength {
                expected: 40,
                actual: hex.len(),
            })?;
        match algo {
            HashAlgorithm::Sha1 => {
                let mut bytes = [0u8; 20];
                hex_decode(hex, &mut bytes)?;
                Ok(Self::Sha1(bytes))
            }
            HashAlgorithm::Sha256 => {
                let mut bytes = [0u8; 32];
                hex_decode(hex, &mut bytes)?;
                Ok(Self::Sha256(bytes))
            }
        }
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(b) => b,
            Self::Sha256(b) => b,
        }
    }

    /// The format this id belongs to.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// Whether this is the null (all-zeros) sentinel.
    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// The lower-case hex representation used on the wire.
    pub fn to_hex(&self) -> String {
        hex_to_string(self.as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
