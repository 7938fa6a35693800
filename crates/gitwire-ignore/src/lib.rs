//! Gitignore pattern matching.
//!
//! A standalone predicate for consumers of fetched tree streams: parse
//! `.gitignore`-style patterns, layer them with the precedence git uses
//! (system excludes file, global excludes file, `.git/info/exclude`, then
//! per-directory `.gitignore` files), and ask whether a path is ignored.
//!
//! Paths are UTF-8 and slash-delimited inside this crate; translating
//! platform paths is the embedder's job, as is the actual filesystem
//! behind the [`FileSource`] contract.

mod matcher;
mod pattern;
mod source;
mod tree;

pub use matcher::{IgnoreStack, Matcher};
pub use pattern::{MatchFlags, MatchResult, Pattern};
pub use source::{
    load_global_patterns, load_repo_patterns, load_system_patterns, read_ignore_file,
    FileSource, MemoryFileSource, OsFileSource, GITIGNORE_FILE, INFO_EXCLUDE_PATH,
    SYSTEM_CONFIG_PATH,
};
pub use tree::{FilteredNode, TreeNode};

/// Errors from loading ignore pattern sources.
#[derive(Debug, thiserror::Error)]
pub enum IgnoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
