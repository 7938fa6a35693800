use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::RefError;

/// A validated reference name.
///
/// Enforces the rules from `git-check-ref-format(1)` that matter on the
/// wire: no control bytes or forbidden punctuation, no `..` or `@{`, no
/// leading/trailing `/` or `//`, no trailing `.` or `.lock` component.
/// `HEAD` and the other all-caps pseudo refs are valid without a `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

/// Characters forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[u8] = b" ~^:?*[\\";

/// Special ref names that are valid without a `/`.
const SPECIAL_REFS: &[&str] = &["HEAD", "FETCH_HEAD", "ORIG_HEAD", "MERGE_HEAD"];

impl RefName {
    /// Create and validate a ref name.
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Get the name as a byte string.
    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// Is this under `refs/heads/`?
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    /// Is this under `refs/tags/`?
    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<[u8]> for RefName {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

fn validate_ref_name(name: &BString) -> Result<(), RefError> {
    let bad = |detail: &str| RefError::InvalidName(format!("{}: {}", name, detail));

    if name.is_empty() {
        return Err(bad("empty name"));
    }
    if name.contains(&0) {
        return Err(bad("contains NUL"));
    }
    for &b in name.iter() {
        if b < 0x20 || b == 0x7f || FORBIDDEN_CHARS.contains(&b) {
            return Err(bad("forbidden character"));
        }
    }
    if name.contains_str("..") || name.contains_str("@{") || name.contains_str("//") {
        return Err(bad("forbidden sequence"));
    }
    if name.starts_with(b"/") || name.ends_with(b"/") {
        return Err(bad("leading or trailing slash"));
    }
    if name.ends_with(b".") || name.ends_with(b".lock") {
        return Err(bad("forbidden suffix"));
    }
    if name.as_bstr() == "@" {
        return Err(bad("bare @"));
    }
    if !name.contains(&b'/') {
        let is_special = SPECIAL_REFS
            .iter()
            .any(|s| name.as_bstr() == *s);
        if !is_special {
            return Err(bad("one-level name"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_names() {
        for name in ["HEAD", "refs/heads/main", "refs/tags/v1.0", "refs/heads/feat/x"] {
            assert!(RefName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in [
            "",
            "refs/heads/..",
            "refs/heads/a b",
            "refs/heads/a.lock",
            "/refs/heads/x",
            "refs//heads",
            "main",
            "@",
            "refs/heads/a@{1}",
        ] {
            assert!(RefName::new(name).is_err(), "{name:?} should be invalid");
        }
    }

    #[test]
    fn classification() {
        assert!(RefName::new("refs/heads/main").unwrap().is_branch());
        assert!(RefName::new("refs/tags/v1").unwrap().is_tag());
        assert!(!RefName::new("HEAD").unwrap().is_branch());
    }
}
