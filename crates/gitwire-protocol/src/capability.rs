//! Capability parsing and negotiation.
//!
//! Capabilities ride in the first pkt-line of the reference advertisement
//! (after a NUL byte) and in the first want/command line of requests. The
//! list has one canonical serialization: tokens space-separated, values
//! joined with `=`, multi-value capabilities repeated once per value.
//!
//! Known tokens carry their value rules in a compile-time table; unknown
//! tokens are preserved verbatim with a permissive rule, which is how agent
//! strings and forward-compat capabilities survive a round trip.

use std::fmt;

use crate::ProtocolError;

pub const MULTI_ACK: &str = "multi_ack";
pub const MULTI_ACK_DETAILED: &str = "multi_ack_detailed";
pub const SIDE_BAND: &str = "side-band";
pub const SIDE_BAND_64K: &str = "side-band-64k";
pub const OFS_DELTA: &str = "ofs-delta";
pub const THIN_PACK: &str = "thin-pack";
pub const NO_THIN: &str = "no-thin";
pub const SHALLOW: &str = "shallow";
pub const DEEPEN_SINCE: &str = "deepen-since";
pub const DEEPEN_NOT: &str = "deepen-not";
pub const REPORT_STATUS: &str = "report-status";
pub const DELETE_REFS: &str = "delete-refs";
pub const ATOMIC: &str = "atomic";
pub const PUSH_OPTIONS: &str = "push-options";
pub const SYMREF: &str = "symref";
pub const OBJECT_FORMAT: &str = "object-format";
pub const AGENT: &str = "agent";
pub const FILTER: &str = "filter";
pub const NO_PROGRESS: &str = "no-progress";
pub const QUIET: &str = "quiet";

/// Value rules for a capability token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapSemantics {
    /// The token may carry a `=value`.
    pub takes_value: bool,
    /// The token is meaningless without a value (`agent`, `symref`).
    pub requires_value: bool,
    /// The token may appear once per value (`symref`).
    pub multi_value: bool,
}

const FLAG: CapSemantics = CapSemantics {
    takes_value: false,
    requires_value: false,
    multi_value: false,
};

const SINGLE_VALUE: CapSemantics = CapSemantics {
    takes_value: true,
    requires_value: true,
    multi_value: false,
};

const MULTI_VALUE: CapSemantics = CapSemantics {
    takes_value: true,
    requires_value: true,
    multi_value: true,
};

/// Anything unknown passes through untouched, with or without values.
const PERMISSIVE: CapSemantics = CapSemantics {
    takes_value: true,
    requires_value: false,
    multi_value: true,
};

/// Look up the value rules for a token.
pub fn semantics(name: &str) -> CapSemantics {
    match name {
        SYMREF => MULTI_VALUE,
        AGENT | OBJECT_FORMAT => SINGLE_VALUE,
        MULTI_ACK | MULTI_ACK_DETAILED | SIDE_BAND | SIDE_BAND_64K | OFS_DELTA | THIN_PACK
        | NO_THIN | SHALLOW | DEEPEN_SINCE | DEEPEN_NOT | REPORT_STATUS | DELETE_REFS
        | ATOMIC | PUSH_OPTIONS | FILTER | NO_PROGRESS | QUIET => FLAG,
        _ => PERMISSIVE,
    }
}

/// A single capability with its values (empty for flag tokens).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    values: Vec<String>,
}

/// An ordered capability list.
///
/// Insertion order is retained, which is what makes decode→encode stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityList {
    entries: Vec<Entry>,
}

impl CapabilityList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-separated capability payload (the bytes after the NUL
    /// in the first advertisement line). A trailing newline is tolerated.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = String::from_utf8_lossy(payload);
        let mut list = Self::new();
        for token in text.split_ascii_whitespace() {
            match token.split_once('=') {
                Some((name, value)) => list.add_value(name, value)?,
                None => list.add(token)?,
            }
        }
        Ok(list)
    }

    /// Add a valueless capability. A duplicate flag is a no-op.
    pub fn add(&mut self, name: &str) -> Result<(), ProtocolError> {
        if semantics(name).requires_value {
            return Err(ProtocolError::MissingArgument(name.to_string()));
        }
        if !self.supports(name) {
            self.entries.push(Entry {
                name: name.to_string(),
                values: Vec::new(),
            });
        }
        Ok(())
    }

    /// Add a capability value, appending for multi-value tokens.
    pub fn add_value(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        let sem = semantics(name);
        if !sem.takes_value {
            return Err(ProtocolError::ArgumentsNotAllowed(name.to_string()));
        }
        match self.entry_mut(name) {
            Some(entry) => {
                if !sem.multi_value {
                    return Err(ProtocolError::MultipleArguments(name.to_string()));
                }
                entry.values.push(value.to_string());
            }
            None => self.entries.push(Entry {
                name: name.to_string(),
                values: vec![value.to_string()],
            }),
        }
        Ok(())
    }

    /// Set a capability to exactly one value, replacing any previous ones.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        if !semantics(name).takes_value {
            return Err(ProtocolError::ArgumentsNotAllowed(name.to_string()));
        }
        match self.entry_mut(name) {
            Some(entry) => entry.values = vec![value.to_string()],
            None => self.entries.push(Entry {
                name: name.to_string(),
                values: vec![value.to_string()],
            }),
        }
        Ok(())
    }

    /// The first value of a capability, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entry(name)
            .and_then(|e| e.values.first())
            .map(String::as_str)
    }

    /// All values of a capability, in insertion order.
    pub fn get_values(&self, name: &str) -> &[String] {
        self.entry(name).map(|e| e.values.as_slice()).unwrap_or(&[])
    }

    /// Whether the token is present at all.
    pub fn supports(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Remove a capability entirely.
    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.values.as_slice()))
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }
}

impl fmt::Display for CapabilityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.entries {
            if entry.values.is_empty() {
                if !first {
                    write!(f, " ")?;
                }
                first = false;
                write!(f, "{}", entry.name)?;
            } else {
                for value in &entry.values {
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "{}={}", entry.name, value)?;
                }
            }
        }
        Ok(())
    }
}
