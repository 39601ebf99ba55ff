//! Topic filters as registered by consumers.
//!
//! A [`Pattern`] is a validated topic filter. Shared subscriptions
//! (`$share/<group>/<filter>`) and queue subscriptions (`$queue/<filter>`)
//! keep their full string for the wire but route locally on `<filter>`.

use crate::error::{Error, Result};
use reactor_trie::validate_pattern;
use std::fmt;

const SHARE_PREFIX: &str = "$share/";
const QUEUE_PREFIX: &str = "$queue/";

/// A validated MQTT topic filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    wire: String,
    filter_start: usize,
}

impl Pattern {
    /// Parse and validate a topic filter.
    ///
    /// Rejects `#` outside the last level, wildcards mixed into a level,
    /// empty levels and malformed `$share` prefixes.
    pub fn parse(pattern: &str) -> Result<Self> {
        let filter_start = if let Some(rest) = pattern.strip_prefix(SHARE_PREFIX) {
            // $share/<group>/<filter>
            match rest.split_once('/') {
                Some((group, filter)) if !group.is_empty() && !filter.is_empty() => {
                    if group.contains(['+', '#']) {
                        return Err(Error::InvalidShareSubscription(pattern.to_string()));
                    }
                    SHARE_PREFIX.len() + group.len() + 1
                }
                _ => return Err(Error::InvalidShareSubscription(pattern.to_string())),
            }
        } else if pattern.starts_with(QUEUE_PREFIX) {
            QUEUE_PREFIX.len()
        } else {
            0
        };

        let filter = &pattern[filter_start..];
        validate_pattern(filter).map_err(|e| Error::invalid_pattern(pattern, e))?;

        Ok(Self {
            wire: pattern.to_string(),
            filter_start,
        })
    }

    /// The full string sent in the wire-level SUBSCRIBE.
    pub fn as_wire(&self) -> &str {
        &self.wire
    }

    /// The filter used for local matching (share/queue prefix removed).
    pub fn filter(&self) -> &str {
        &self.wire[self.filter_start..]
    }

    /// The share group, if this is a `$share` subscription.
    pub fn share_group(&self) -> Option<&str> {
        let rest = self.wire.strip_prefix(SHARE_PREFIX)?;
        rest.split_once('/').map(|(group, _)| group)
    }

    /// Reports whether this filter matches the concrete `topic`.
    pub fn matches(&self, topic: &str) -> bool {
        reactor_trie::matches(self.filter(), topic)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire)
    }
}

impl std::str::FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::parse(s)
    }
}
