//! Ordered pattern evaluation.
//!
//! Patterns apply in source order with the last non-neutral verdict
//! winning, so a later `!pattern` can re-include what an earlier pattern
//! excluded. During a tree walk, nested `.gitignore` files stack on top of
//! the inherited ones and pop off when the walk leaves their directory.

use crate::pattern::{MatchResult, Pattern};

/// An ordered pattern list; the last matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    patterns: Vec<Pattern>,
}

impl Matcher {
    /// Build a matcher from patterns ordered lowest precedence first.
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    /// Whether `path` (slash-split segments) is ignored.
    pub fn is_ignored(&self, path: &[&str], is_dir: bool) -> bool {
        let mut verdict = MatchResult::NoMatch;
        for pattern in &self.patterns {
            match pattern.matches(path, is_dir) {
                MatchResult::NoMatch => {}
                hit => verdict = hit,
            }
        }
        verdict == MatchResult::Exclude
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}

/// Pattern layers built up during a tree walk.
///
/// Push a layer when entering a directory that carries a `.gitignore`,
/// pop it when leaving. Deeper layers take precedence because they are
/// evaluated later — there is no parent-pointer tree here, just a stack.
#[derive(Debug, Clone, Default)]
pub struct IgnoreStack {
    layers: Vec<Vec<Pattern>>,
}

impl IgnoreStack {
    /// Start from the session-wide patterns (system + global + repo).
    pub fn new(base: Vec<Pattern>) -> Self {
        Self {
            layers: vec![base],
        }
    }

    /// Push the patterns of the directory being entered.
    pub fn push(&mut self, patterns: Vec<Pattern>) {
        self.layers.push(patterns);
    }

    /// Pop the most recent layer when the walk leaves its directory.
    pub fn pop(&mut self) {
        self.layers.pop();
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Whether `path` is ignored given every active layer.
    pub fn is_ignored(&self, path: &[&str], is_dir: bool) -> bool {
        let mut verdict = MatchResult::NoMatch;
        for layer in &self.layers {
            for pattern in layer {
                match pattern.matches(path, is_dir) {
                    MatchResult::NoMatch => {}
                    hit => verdict = hit,
                }
            }
        }
        verdict == MatchResult::Exclude
    }
}
