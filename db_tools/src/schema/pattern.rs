//! Regex-keyed table routing
//!
//! A [`PatternMatcher`] is an ordered list of `(regex, value)` pairs. Lookups
//! scan in insertion order and stop at the first hit, so callers add exact
//! names before wildcard patterns. The matcher does not anchor patterns.

use regex::Regex;

use crate::error::Result;
use crate::schema::definition::TableDefinition;

#[derive(Debug, Clone)]
pub struct PatternMatcher<T> {
    targets: Vec<(Regex, T)>,
}

impl<T> Default for PatternMatcher<T> {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
        }
    }
}

impl<T> PatternMatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern. Duplicates are kept.
    pub fn add(&mut self, pattern: &str, target: T) -> Result<()> {
        self.targets.push((Regex::new(pattern)?, target));
        Ok(())
    }

    /// Whether any pattern matches `name`
    pub fn matches(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The value of the first pattern matching `name`
    pub fn get(&self, name: &str) -> Option<&T> {
        self.targets
            .iter()
            .find(|(pattern, _)| pattern.is_match(name))
            .map(|(_, target)| target)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Anchored pattern matching exactly `name`
pub fn exact_pattern(name: &str) -> String {
    format!("^{}$", regex::escape(name))
}

/// Anchored pattern from a user-supplied wildcard expression
pub fn anchored_pattern(pattern: &str) -> String {
    format!("^{}$", pattern)
}

/// Decides which tables take part in building or introspecting a schema
#[derive(Debug, Clone, Copy, Default)]
pub enum TableFilter<'a> {
    #[default]
    All,
    Names(&'a [String]),
    Patterns(&'a PatternMatcher<TableDefinition>),
}

impl<'a> TableFilter<'a> {
    /// An explicit list; an empty list includes every table
    pub fn names(names: &'a [String]) -> Self {
        if names.is_empty() {
            TableFilter::All
        } else {
            TableFilter::Names(names)
        }
    }

    pub fn includes(&self, table: &str) -> bool {
        match self {
            TableFilter::All => true,
            TableFilter::Names(names) => names.iter().any(|n| n == table),
            TableFilter::Patterns(matcher) => matcher.matches(table),
        }
    }
}
