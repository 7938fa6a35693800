//! Tree-walk integration.
//!
//! [`FilteredNode`] wraps a tree node and hides ignored children from
//! iteration, while [`FilteredNode::find`] deliberately bypasses the
//! filter so callers can still inspect an ignored entry. The visible
//! child list is memoized — repeated calls return the same nodes.

use std::cell::OnceCell;
use std::rc::Rc;

use crate::matcher::Matcher;

/// A tree node as the walker sees it: a name and (for directories) its
/// children. Fetched-tree adapters implement this.
pub trait TreeNode {
    fn name(&self) -> &str;
    fn is_dir(&self) -> bool;
    fn children(&self) -> Vec<Rc<dyn TreeNode>>;
}

/// A node wrapper that applies an ignore [`Matcher`] to iteration.
pub struct FilteredNode {
    inner: Rc<dyn TreeNode>,
    matcher: Rc<Matcher>,
    /// Slash-split path from the filter root to this node.
    path: Vec<String>,
    visible: OnceCell<Vec<Rc<FilteredNode>>>,
}

impl FilteredNode {
    /// Wrap the root of a tree. The root itself is never filtered.
    pub fn root(inner: Rc<dyn TreeNode>, matcher: Matcher) -> Rc<Self> {
        Rc::new(Self {
            inner,
            matcher: Rc::new(matcher),
            path: Vec::new(),
            visible: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_dir(&self) -> bool {
        self.inner.is_dir()
    }

    /// Path segments from the filter root down to this node.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The non-ignored children. Memoized: a second call returns the very
    /// same nodes, so walkers can use identity for cycle checks.
    pub fn children(&self) -> &[Rc<FilteredNode>] {
        self.visible.get_or_init(|| {
            self.inner
                .children()
                .into_iter()
                .filter(|child| {
                    let mut segments: Vec<&str> =
                        self.path.iter().map(String::as_str).collect();
                    segments.push(child.name());
                    !self.matcher.is_ignored(&segments, child.is_dir())
                })
                .map(|child| self.wrap(child))
                .collect()
        })
    }

    /// Follow `path` segments down the tree, bypassing the ignore filter.
    ///
    /// Visible children resolve to their memoized nodes; ignored entries
    /// get a fresh wrapper.
    pub fn find(&self, path: &[&str]) -> Option<Rc<FilteredNode>> {
        let (first, rest) = path.split_first()?;
        let child = self
            .children()
            .iter()
            .find(|c| c.name() == *first)
            .cloned()
            .or_else(|| {
                self.inner
                    .children()
                    .into_iter()
                    .find(|c| c.name() == *first)
                    .map(|c| self.wrap(c))
            })?;
        if rest.is_empty() {
            Some(child)
        } else {
            child.find(rest)
        }
    }

    fn wrap(&self, child: Rc<dyn TreeNode>) -> Rc<FilteredNode> {
        let mut path = self.path.clone();
        path.push(child.name().to_string());
        Rc::new(FilteredNode {
            inner: child,
            matcher: Rc::clone(&self.matcher),
            path,
            visible: OnceCell::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;

    struct Node {
        name: String,
        children: Vec<Rc<dyn TreeNode>>,
        dir: bool,
    }

    impl Node {
        fn file(name: &str) -> Rc<dyn TreeNode> {
            Rc::new(Self {
                name: name.to_string(),
                children: Vec::new(),
                dir: false,
            })
        }

        fn dir(name: &str, children: Vec<Rc<dyn TreeNode>>) -> Rc<dyn TreeNode> {
            Rc::new(Self {
                name: name.to_string(),
                children,
                dir: true,
            })
        }
    }

    impl TreeNode for Node {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_dir(&self) -> bool {
            self.dir
        }

        fn children(&self) -> Vec<Rc<dyn TreeNode>> {
            self.children.clone()
        }
    }

    fn matcher(lines: &[&str]) -> Matcher {
        Matcher::new(
            lines
                .iter()
                .filter_map(|l| Pattern::parse(l, &[]))
                .collect(),
        )
    }

    fn sample_tree() -> Rc<dyn TreeNode> {
        Node::dir(
            "",
            vec![
                Node::file("main.rs"),
                Node::file("scratch.tmp"),
                Node::dir(
                    "target",
                    vec![Node::file("out.bin")],
                ),
                Node::dir("src", vec![Node::file("lib.rs"), Node::file("x.tmp")]),
            ],
        )
    }

    #[test]
    fn iteration_hides_ignored_entries() {
        let root = FilteredNode::root(sample_tree(), matcher(&["*.tmp", "/target/"]));
        let names: Vec<&str> = root.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["main.rs", "src"]);

        let src = root.find(&["src"]).unwrap();
        let names: Vec<&str> = src.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["lib.rs"]);
    }

    #[test]
    fn children_are_memoized_with_stable_identity() {
        let root = FilteredNode::root(sample_tree(), matcher(&["*.tmp"]));
        let first = root.children().to_vec();
        let second = root.children().to_vec();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert!(Rc::ptr_eq(a, b));
        }
    }

    #[test]
    fn find_bypasses_the_filter() {
        let root = FilteredNode::root(sample_tree(), matcher(&["*.tmp", "/target/"]));

        // Not visible through iteration...
        assert!(root.children().iter().all(|c| c.name() != "target"));

        // ...but reachable by explicit lookup.
        let target = root.find(&["target"]).unwrap();
        assert!(target.is_dir());
        let out = root.find(&["target", "out.bin"]).unwrap();
        assert_eq!(out.path(), &["target".to_string(), "out.bin".to_string()]);
    }

    #[test]
    fn find_visible_child_returns_memoized_node() {
        let root = FilteredNode::root(sample_tree(), matcher(&[]));
        let via_children = root
            .children()
            .iter()
            .find(|c| c.name() == "src")
            .cloned()
            .unwrap();
        let via_find = root.find(&["src"]).unwrap();
        assert!(Rc::ptr_eq(&via_children, &via_find));
    }

    #[test]
    fn find_missing_entry_is_none() {
        let root = FilteredNode::root(sample_tree(), matcher(&[]));
        assert!(root.find(&["nope"]).is_none());
        assert!(root.find(&["src", "nope"]).is_none());
    }
}
