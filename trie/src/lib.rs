//! MQTT topic filter matching and a wildcard trie that indexes values by filter.
//!
//! Topic filters use the MQTT wildcards:
//! - `a/b/c` - exact topic match
//! - `a/+/c` - single-level wildcard (matches exactly one level)
//! - `a/#` - multi-level wildcard (matches `a` and any levels beneath it)
//!
//! Unlike a router that returns the best match, [`TopicTrie`] returns every
//! value whose filter matches a topic, which is what a subscription fan-out needs.
//!
//! # Example
//!
//! ```rust
//! use reactor_trie::{matches, TopicTrie};
//!
//! assert!(matches("devices/+/status", "devices/unit7/status"));
//! assert!(!matches("devices/+/status", "devices/unit7/status/extra"));
//!
//! let mut trie = TopicTrie::<&str>::new();
//! trie.insert("devices/+/status", "status").unwrap();
//! trie.insert("devices/#", "everything").unwrap();
//!
//! let mut hits = trie.get("devices/unit7/status");
//! hits.sort();
//! assert_eq!(hits, vec![&"everything", &"status"]);
//! ```

use std::collections::HashMap;
use std::fmt;

/// Single-level wildcard segment.
pub const SINGLE_LEVEL: &str = "+";

/// Multi-level wildcard segment.
pub const MULTI_LEVEL: &str = "#";

/// Error returned when a topic filter is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPatternError {
    #[error("empty topic filter")]
    Empty,

    #[error("empty level in topic filter")]
    EmptyLevel,

    #[error("'#' must be the last level of a topic filter")]
    MultiLevelNotLast,

    #[error("wildcard mixed with other characters in level {0:?}")]
    MixedWildcard(String),
}

/// Error returned when a concrete topic name is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTopicError {
    #[error("empty topic name")]
    Empty,

    #[error("wildcard in topic name {0:?}")]
    Wildcard(String),
}

/// Iterates the levels of a topic or filter. The empty string has no levels.
#[inline]
pub fn levels(path: &str) -> impl Iterator<Item = &str> {
    let n = if path.is_empty() { 0 } else { usize::MAX };
    path.split('/').take(n)
}

/// Reports whether `pattern` matches the concrete `topic`.
///
/// `+` consumes exactly one level. `#` consumes the remaining levels,
/// including none, so `a/#` matches `a`. Comparison is byte-exact and
/// case-sensitive. The pattern is assumed to be valid; see [`validate_pattern`].
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern = levels(pattern);
    let mut topic = levels(topic);

    loop {
        match (pattern.next(), topic.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (None, None) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            _ => return false,
        }
    }
}

/// Validates a topic filter.
///
/// Rejects empty filters, empty levels, `#` anywhere but the last level, and
/// wildcards sharing a level with other characters.
pub fn validate_pattern(pattern: &str) -> Result<(), InvalidPatternError> {
    if pattern.is_empty() {
        return Err(InvalidPatternError::Empty);
    }

    let mut iter = pattern.split('/').peekable();
    while let Some(level) = iter.next() {
        match level {
            "" => return Err(InvalidPatternError::EmptyLevel),
            MULTI_LEVEL if iter.peek().is_some() => {
                return Err(InvalidPatternError::MultiLevelNotLast);
            }
            SINGLE_LEVEL | MULTI_LEVEL => {}
            _ if level.contains(['+', '#']) => {
                return Err(InvalidPatternError::MixedWildcard(level.to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validates a concrete topic name (as used for publishing).
pub fn validate_topic(topic: &str) -> Result<(), InvalidTopicError> {
    if topic.is_empty() {
        return Err(InvalidTopicError::Empty);
    }
    if topic.contains(['+', '#']) {
        return Err(InvalidTopicError::Wildcard(topic.to_string()));
    }
    Ok(())
}

/// A trie of values keyed by MQTT topic filters.
///
/// Each node keeps literal children, a reserved `+` child that no literal
/// level can reach, the values attached through a trailing `#`, and the
/// values whose filter ends exactly at the node.
#[derive(Debug, Clone)]
pub struct TopicTrie<T> {
    children: HashMap<String, TopicTrie<T>>,
    match_any: Option<Box<TopicTrie<T>>>, // +
    match_all: Vec<T>,                    // #
    values: Vec<T>,
}

impl<T> Default for TopicTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TopicTrie<T> {
    /// Creates a new empty trie.
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
            match_any: None,
            match_all: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Attaches `value` to `pattern`. Several values may share one filter.
    ///
    /// # Errors
    /// Returns `InvalidPatternError` if the filter fails [`validate_pattern`].
    pub fn insert(&mut self, pattern: &str, value: T) -> Result<(), InvalidPatternError> {
        validate_pattern(pattern)?;
        self.insert_levels(levels(pattern), value);
        Ok(())
    }

    fn insert_levels<'p, I>(&mut self, mut rest: I, value: T)
    where
        I: Iterator<Item = &'p str>,
    {
        match rest.next() {
            None => self.values.push(value),
            Some(MULTI_LEVEL) => self.match_all.push(value),
            Some(SINGLE_LEVEL) => self
                .match_any
                .get_or_insert_with(|| Box::new(TopicTrie::new()))
                .insert_levels(rest, value),
            Some(level) => self
                .children
                .entry(level.to_string())
                .or_default()
                .insert_levels(rest, value),
        }
    }

    /// Removes the values under `pattern` for which `predicate` returns true.
    ///
    /// Returns the number of values removed. Nodes left empty are pruned.
    pub fn remove<F>(&mut self, pattern: &str, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        self.remove_levels(levels(pattern), &mut predicate)
    }

    fn remove_levels<'p, I, F>(&mut self, mut rest: I, predicate: &mut F) -> usize
    where
        I: Iterator<Item = &'p str>,
        F: FnMut(&T) -> bool,
    {
        match rest.next() {
            None => retain_count(&mut self.values, predicate),
            Some(MULTI_LEVEL) => retain_count(&mut self.match_all, predicate),
            Some(SINGLE_LEVEL) => {
                let Some(any) = self.match_any.as_mut() else {
                    return 0;
                };
                let removed = any.remove_levels(rest, predicate);
                if any.is_leaf_empty() {
                    self.match_any = None;
                }
                removed
            }
            Some(level) => {
                let Some(child) = self.children.get_mut(level) else {
                    return 0;
                };
                let removed = child.remove_levels(rest, predicate);
                if child.is_leaf_empty() {
                    self.children.remove(level);
                }
                removed
            }
        }
    }

    fn is_leaf_empty(&self) -> bool {
        self.values.is_empty()
            && self.match_all.is_empty()
            && self.match_any.is_none()
            && self.children.is_empty()
    }

    /// Calls `f` for every value whose filter matches `topic`.
    ///
    /// This walks all three branches at each level: the literal child, the
    /// `+` child and the `#` values, so the result is the union of every
    /// matching filter. Allocation free.
    pub fn for_each_match<'a, F>(&'a self, topic: &str, mut f: F)
    where
        F: FnMut(&'a T),
    {
        let rest = if topic.is_empty() { None } else { Some(topic) };
        self.walk_matches(rest, &mut f);
    }

    fn walk_matches<'a, F>(&'a self, rest: Option<&str>, f: &mut F)
    where
        F: FnMut(&'a T),
    {
        // '#' absorbs this level and everything beneath it, including nothing.
        self.match_all.iter().for_each(&mut *f);

        let Some(path) = rest else {
            self.values.iter().for_each(&mut *f);
            return;
        };

        let (first, next) = split_level(path);

        if let Some(child) = self.children.get(first) {
            child.walk_matches(next, f);
        }
        if let Some(ref any) = self.match_any {
            any.walk_matches(next, f);
        }
    }

    /// Returns references to every value whose filter matches `topic`.
    ///
    /// Order follows the trie walk, not insertion.
    pub fn get(&self, topic: &str) -> Vec<&T> {
        let mut out = Vec::new();
        self.for_each_match(topic, |v| out.push(v));
        out
    }

    /// Reports whether any filter matches `topic`.
    pub fn contains_match(&self, topic: &str) -> bool {
        let mut found = false;
        self.for_each_match(topic, |_| found = true);
        found
    }

    /// Walks the trie, calling `f` with each stored filter and value.
    ///
    /// Literal children are visited in sorted order, then `+`, then `#`.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&str, &T),
    {
        self.walk_internal(&mut Vec::new(), &mut f);
    }

    fn walk_internal<'a, F>(&'a self, path: &mut Vec<&'a str>, f: &mut F)
    where
        F: FnMut(&str, &T),
    {
        let mut keys: Vec<_> = self.children.keys().collect();
        keys.sort();
        for key in keys {
            path.push(key);
            self.children[key].walk_internal(path, f);
            path.pop();
        }

        if let Some(ref any) = self.match_any {
            path.push(SINGLE_LEVEL);
            any.walk_internal(path, f);
            path.pop();
        }

        if !self.match_all.is_empty() {
            path.push(MULTI_LEVEL);
            let filter = path.join("/");
            for value in &self.match_all {
                f(&filter, value);
            }
            path.pop();
        }

        if !self.values.is_empty() {
            let filter = path.join("/");
            for value in &self.values {
                f(&filter, value);
            }
        }
    }

    /// Returns the number of values stored in the trie.
    pub fn len(&self) -> usize {
        self.values.len()
            + self.match_all.len()
            + self.match_any.as_ref().map_or(0, |any| any.len())
            + self.children.values().map(TopicTrie::len).sum::<usize>()
    }

    /// Returns true if the trie holds no values.
    pub fn is_empty(&self) -> bool {
        self.is_leaf_empty()
    }
}

impl<T: fmt::Display> fmt::Display for TopicTrie<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.walk(|filter, value| lines.push(format!("{}: {}", filter, value)));
        write!(f, "{}", lines.join("\n"))
    }
}

/// Splits off the first level. `None` means there is no further level.
#[inline]
fn split_level(path: &str) -> (&str, Option<&str>) {
    match path.find('/') {
        Some(idx) => (&path[..idx], Some(&path[idx + 1..])),
        None => (path, None),
    }
}

fn retain_count<T, F>(values: &mut Vec<T>, predicate: &mut F) -> usize
where
    F: FnMut(&T) -> bool,
{
    let before = values.len();
    values.retain(|v| !predicate(v));
    before - values.len()
}
