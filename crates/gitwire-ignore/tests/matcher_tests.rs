//! Integration tests for layered ignore matching.

use gitwire_ignore::{
    load_global_patterns, load_repo_patterns, load_system_patterns, read_ignore_file,
    IgnoreStack, Matcher, MemoryFileSource, OsFileSource, Pattern,
};

fn patterns(lines: &[&str]) -> Vec<Pattern> {
    lines.iter().filter_map(|l| Pattern::parse(l, &[])).collect()
}

#[test]
fn everything_except_one_subtree() {
    // Exclude everything at the root, then carve foo/bar back in.
    let m = Matcher::new(patterns(&["/*", "!/foo", "/foo/*", "!/foo/bar"]));

    assert!(!m.is_ignored(&["foo"], true));
    assert!(!m.is_ignored(&["foo", "bar"], true));
    assert!(!m.is_ignored(&["foo", "bar"], false));
    assert!(!m.is_ignored(&["foo", "bar", "deep"], false));
    assert!(m.is_ignored(&["baz"], true));
    assert!(m.is_ignored(&["baz"], false));
    assert!(m.is_ignored(&["foo", "baz"], false));
    assert!(m.is_ignored(&["foo", "baz"], true));
}

#[test]
fn precedence_across_sources() {
    let mut fs = MemoryFileSource::new();
    fs.set_home("/home/alice");

    // System-wide: ignore *.log.
    fs.add_file("/etc/gitconfig", "[core]\nexcludesfile = /etc/gitignore\n");
    fs.add_file("/etc/gitignore", "*.log\n");

    // User-wide: re-include keep.log.
    fs.add_file(
        "/home/alice/.gitconfig",
        "[core]\nexcludesfile = ~/.gitignore_global\n",
    );
    fs.add_file("/home/alice/.gitignore_global", "!keep.log\n*.swp\n");

    // Repository: info/exclude ignores *.bak, root .gitignore ignores the
    // swap re-include edge.
    fs.add_file(".git/info/exclude", "*.bak\n");
    fs.add_file(".gitignore", "!editor.swp\n");

    let mut all = load_system_patterns(&fs).unwrap();
    all.extend(load_global_patterns(&fs).unwrap());
    all.extend(load_repo_patterns(&fs, "").unwrap());
    let m = Matcher::new(all);

    assert!(m.is_ignored(&["debug.log"], false));
    assert!(!m.is_ignored(&["keep.log"], false));
    assert!(m.is_ignored(&["other.swp"], false));
    assert!(!m.is_ignored(&["editor.swp"], false));
    assert!(m.is_ignored(&["old.bak"], false));
    assert!(!m.is_ignored(&["main.rs"], false));
}

#[test]
fn nested_gitignore_governs_its_subtree_only() {
    let mut fs = MemoryFileSource::new();
    fs.add_file(".gitignore", "*.gen\n");
    fs.add_file("docs/.gitignore", "!api.gen\n");

    let root = read_ignore_file(&fs, ".gitignore", &[]).unwrap();
    let docs = read_ignore_file(&fs, "docs/.gitignore", &["docs".to_string()]).unwrap();

    let mut stack = IgnoreStack::new(root);
    assert!(stack.is_ignored(&["api.gen"], false));

    stack.push(docs);
    // Inside docs/ the nested file re-includes api.gen...
    assert!(!stack.is_ignored(&["docs", "api.gen"], false));
    // ...but its patterns do not leak outside the subtree.
    assert!(stack.is_ignored(&["api.gen"], false));
    assert!(stack.is_ignored(&["docs", "other.gen"], false));

    stack.pop();
    assert!(stack.is_ignored(&["docs", "api.gen"], false));
}

#[test]
fn os_file_source_reads_real_gitignore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".gitignore");
    std::fs::write(&path, "*.o\n!keep.o\n# comment\n").unwrap();

    let fs = OsFileSource;
    let patterns = read_ignore_file(&fs, path.to_str().unwrap(), &[]).unwrap();
    let m = Matcher::new(patterns);

    assert!(m.is_ignored(&["a.o"], false));
    assert!(!m.is_ignored(&["keep.o"], false));

    assert!(read_ignore_file(&fs, dir.path().join("absent").to_str().unwrap(), &[])
        .unwrap()
        .is_empty());
}

#[test]
fn deep_globs_over_layers() {
    let m = Matcher::new(patterns(&[
        "/build/**",
        "**/node_modules",
        "/src/**/test_*.rs",
        "!/src/core/test_keep.rs",
    ]));

    assert!(m.is_ignored(&["build", "out", "a.o"], false));
    assert!(!m.is_ignored(&["build"], true));
    assert!(m.is_ignored(&["web", "node_modules"], true));
    assert!(m.is_ignored(&["node_modules"], true));
    assert!(m.is_ignored(&["src", "core", "test_parse.rs"], false));
    assert!(!m.is_ignored(&["src", "core", "test_keep.rs"], false));
    assert!(!m.is_ignored(&["src", "core", "parse.rs"], false));
}
