//! Pattern sources and their precedence.
//!
//! Lowest to highest: the system gitconfig's `core.excludesfile`, the
//! user's `~/.gitconfig` `core.excludesfile` (with `~` and `~user`
//! expansion), `.git/info/exclude`, the repository root `.gitignore`, and
//! nested `.gitignore` files (loaded during the walk, see
//! [`IgnoreStack`](crate::IgnoreStack)).
//!
//! Filesystem access goes through the [`FileSource`] contract; paths are
//! UTF-8 and slash-delimited.

use std::collections::HashMap;
use std::io::Read;

use crate::pattern::Pattern;
use crate::IgnoreError;

pub const GITIGNORE_FILE: &str = ".gitignore";
pub const INFO_EXCLUDE_PATH: &str = ".git/info/exclude";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/gitconfig";

const GLOBAL_CONFIG_FILE: &str = ".gitconfig";
const CORE_SECTION: &str = "core";
const EXCLUDES_KEY: &str = "excludesfile";

/// Filesystem contract for ignore-file discovery.
pub trait FileSource {
    fn open(&self, path: &str) -> std::io::Result<Box<dyn Read + '_>>;
    fn exists(&self, path: &str) -> bool;
    /// The current user's home directory, if known.
    fn home_dir(&self) -> Option<String>;
    /// Another user's home directory (for `~user` expansion).
    fn user_home(&self, user: &str) -> Option<String>;
}

/// Read and parse one ignore file. A missing file yields no patterns.
pub fn read_ignore_file(
    fs: &dyn FileSource,
    path: &str,
    domain: &[String],
) -> Result<Vec<Pattern>, IgnoreError> {
    if !fs.exists(path) {
        return Ok(Vec::new());
    }
    let mut content = String::new();
    fs.open(path)?.read_to_string(&mut content)?;
    Ok(content
        .lines()
        .filter_map(|line| Pattern::parse(line, domain))
        .collect())
}

/// Patterns from the system gitconfig's `core.excludesfile`.
pub fn load_system_patterns(fs: &dyn FileSource) -> Result<Vec<Pattern>, IgnoreError> {
    match excludes_file_from(fs, SYSTEM_CONFIG_PATH)? {
        Some(path) => read_ignore_file(fs, &path, &[]),
        None => Ok(Vec::new()),
    }
}

/// Patterns from the user gitconfig's `core.excludesfile`.
pub fn load_global_patterns(fs: &dyn FileSource) -> Result<Vec<Pattern>, IgnoreError> {
    let Some(home) = fs.home_dir() else {
        return Ok(Vec::new());
    };
    let config = format!("{}/{}", home.trim_end_matches('/'), GLOBAL_CONFIG_FILE);
    match excludes_file_from(fs, &config)? {
        Some(path) => read_ignore_file(fs, &path, &[]),
        None => Ok(Vec::new()),
    }
}

/// Repository-level patterns: `.git/info/exclude` then the root
/// `.gitignore`, in precedence order (lowest first). `repo_root` is a
/// slash-delimited prefix, empty for the working directory itself.
pub fn load_repo_patterns(
    fs: &dyn FileSource,
    repo_root: &str,
) -> Result<Vec<Pattern>, IgnoreError> {
    let join = |file: &str| {
        if repo_root.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", repo_root.trim_end_matches('/'), file)
        }
    };

    let mut patterns = read_ignore_file(fs, &join(INFO_EXCLUDE_PATH), &[])?;
    patterns.extend(read_ignore_file(fs, &join(GITIGNORE_FILE), &[])?);
    Ok(patterns)
}

/// Find `core.excludesfile` in a gitconfig file, with tilde expansion.
fn excludes_file_from(
    fs: &dyn FileSource,
    config_path: &str,
) -> Result<Option<String>, IgnoreError> {
    if !fs.exists(config_path) {
        return Ok(None);
    }
    let mut content = String::new();
    fs.open(config_path)?.read_to_string(&mut content)?;
    Ok(excludes_file_from_config(&content).and_then(|raw| expand_tilde(fs, &raw)))
}

/// Scan gitconfig content for `[core] excludesfile = <path>`.
///
/// Section and key names are case-insensitive; values may be quoted and
/// carry `#`/`;` comments.
fn excludes_file_from_config(content: &str) -> Option<String> {
    let mut in_core = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[') {
            let section = header.split(']').next().unwrap_or("");
            in_core = section.trim().eq_ignore_ascii_case(CORE_SECTION);
            continue;
        }
        if !in_core {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case(EXCLUDES_KEY) {
            continue;
        }
        let mut value = value.trim();
        // Strip a trailing comment, then surrounding quotes.
        if !value.starts_with('"') {
            if let Some(pos) = value.find(['#', ';']) {
                value = value[..pos].trim_end();
            }
        }
        let value = value.trim_matches('"');
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Expand `~/...` and `~user/...` prefixes.
fn expand_tilde(fs: &dyn FileSource, path: &str) -> Option<String> {
    let Some(rest) = path.strip_prefix('~') else {
        return Some(path.to_string());
    };
    let (user, tail) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, ""),
    };
    let home = if user.is_empty() {
        fs.home_dir()?
    } else {
        fs.user_home(user)?
    };
    Some(format!("{}{}", home.trim_end_matches('/'), tail))
}

/// A [`FileSource`] over the operating-system filesystem.
///
/// Paths pass through verbatim, which is correct on slash-delimited
/// platforms; anything fancier is the embedder's adapter to write.
#[derive(Debug, Default)]
pub struct OsFileSource;

impl FileSource for OsFileSource {
    fn open(&self, path: &str) -> std::io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(std::fs::File::open(path)?))
    }

    fn exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn home_dir(&self) -> Option<String> {
        std::env::var("HOME").ok().filter(|h| !h.is_empty())
    }

    fn user_home(&self, _user: &str) -> Option<String> {
        None
    }
}

/// An in-memory [`FileSource`] keyed by slash-delimited paths.
#[derive(Debug, Default)]
pub struct MemoryFileSource {
    files: HashMap<String, Vec<u8>>,
    home: Option<String>,
    user_homes: HashMap<String, String>,
}

impl MemoryFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn set_home(&mut self, home: impl Into<String>) {
        self.home = Some(home.into());
    }

    pub fn add_user_home(&mut self, user: impl Into<String>, home: impl Into<String>) {
        self.user_homes.insert(user.into(), home.into());
    }
}

impl FileSource for MemoryFileSource {
    fn open(&self, path: &str) -> std::io::Result<Box<dyn Read + '_>> {
        match self.files.get(path) {
            Some(content) => Ok(Box::new(content.as_slice())),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.to_string(),
            )),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn home_dir(&self) -> Option<String> {
        self.home.clone()
    }

    fn user_home(&self, user: &str) -> Option<String> {
        self.user_homes.get(user).cloned()
    }
}
