//! Object filtering
//!
//! Checks run in a fixed order (directory marker, prefix, exclude pattern)
//! and the first one that rejects the key decides the skip reason.

use regex::Regex;
use std::fmt;

/// Why an object was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Key ends with `/`
    Directory,
    /// Key does not start with the configured prefix
    PrefixMismatch,
    /// Key matches the configured exclude pattern
    Excluded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Directory => write!(f, "directory marker"),
            SkipReason::PrefixMismatch => write!(f, "prefix mismatch"),
            SkipReason::Excluded => write!(f, "matches exclude_pattern"),
        }
    }
}

/// Outcome of filtering one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Process,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    prefix: Option<String>,
    exclude: Option<Regex>,
}

impl ObjectFilter {
    pub fn new(prefix: Option<String>, exclude: Option<Regex>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
            exclude,
        }
    }

    /// Decide whether the object at `key` is read
    pub fn check(&self, key: &str) -> FilterDecision {
        if key.ends_with('/') {
            return FilterDecision::Skip(SkipReason::Directory);
        }

        if let Some(ref prefix) = self.prefix {
            if !key.starts_with(prefix.as_str()) {
                return FilterDecision::Skip(SkipReason::PrefixMismatch);
            }
        }

        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(key) {
                return FilterDecision::Skip(SkipReason::Excluded);
            }
        }

        FilterDecision::Process
    }
}
