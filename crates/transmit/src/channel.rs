//! Secured channel patterns
//!
//! A pattern such as `chat/:room` marks every matching channel as requiring
//! authorization. Channels that match no registered pattern are public.
//!
//! Pattern grammar, one entry per `/`-separated segment:
//! - `text` matches the same text
//! - `:name` binds one segment
//! - `:name?` binds one segment if present (trailing segments only)
//! - `*` binds the rest of the channel name, possibly empty (last segment only)

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Name under which a `*` segment is bound
pub const WILDCARD_PARAM: &str = "*";

/// Parameters extracted from a channel name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelParams(BTreeMap<String, String>);

impl ChannelParams {
    /// Get a parameter by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Deserialize the parameters into a typed record
    ///
    /// Every value is a string, so numeric fields need to be declared as
    /// strings or parsed afterwards.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(&self.0)?;
        Ok(serde_json::from_value(value)?)
    }

    fn insert(&mut self, name: &str, value: String) {
        self.0.insert(name.to_string(), value);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChannelParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param { name: String, optional: bool },
    Wildcard,
}

/// A parsed secured-channel pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    source: String,
    segments: Vec<Segment>,
}

fn split(name: &str) -> Vec<&str> {
    name.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

impl ChannelPattern {
    /// Parse a pattern, rejecting malformed ones
    pub fn parse(pattern: &str) -> Result<Self> {
        let parts = split(pattern);
        let mut segments = Vec::with_capacity(parts.len());
        let mut seen_optional = false;

        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == WILDCARD_PARAM {
                if i + 1 != parts.len() {
                    return Err(Error::Config(format!(
                        "wildcard must be the last segment in `{pattern}`"
                    )));
                }
                Segment::Wildcard
            } else if let Some(raw) = part.strip_prefix(':') {
                let (name, optional) = match raw.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (raw, false),
                };
                if name.is_empty() {
                    return Err(Error::Config(format!(
                        "empty parameter name in `{pattern}`"
                    )));
                }
                let duplicate = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param { name: n, .. } if n == name));
                if duplicate {
                    return Err(Error::Config(format!(
                        "duplicate parameter `{name}` in `{pattern}`"
                    )));
                }
                Segment::Param {
                    name: name.to_string(),
                    optional,
                }
            } else {
                Segment::Static(part.to_string())
            };

            let is_optional = matches!(segment, Segment::Param { optional: true, .. });
            if seen_optional && !is_optional {
                return Err(Error::Config(format!(
                    "optional parameters must be trailing in `{pattern}`"
                )));
            }
            seen_optional |= is_optional;
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as registered
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a concrete channel name, binding parameters
    pub fn matches(&self, channel: &str) -> Option<ChannelParams> {
        let parts = split(channel);
        let mut params = ChannelParams::default();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.insert(WILDCARD_PARAM, parts.get(i..).unwrap_or(&[]).join("/"));
                    return Some(params);
                }
                Segment::Static(text) => {
                    if parts.get(i) != Some(&text.as_str()) {
                        return None;
                    }
                }
                Segment::Param { name, optional } => match parts.get(i) {
                    Some(value) => params.insert(name, value.to_string()),
                    None if *optional => {}
                    None => return None,
                },
            }
        }

        (parts.len() <= self.segments.len()).then_some(params)
    }
}

/// Result of matching a channel against the secure store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMatch {
    /// The pattern that matched, as registered
    pub pattern: String,
    /// Parameters bound by the pattern
    pub params: ChannelParams,
}

/// Registry of channel patterns that require authorization
///
/// Patterns are checked in registration order; the first match wins.
#[derive(Debug, Default)]
pub struct SecureChannelStore {
    patterns: RwLock<Vec<ChannelPattern>>,
}

impl SecureChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern. Registering the same pattern twice is a no-op.
    pub fn add(&self, pattern: &str) -> Result<()> {
        let parsed = ChannelPattern::parse(pattern)?;
        let mut patterns = self.patterns.write();
        if !patterns.iter().any(|p| p.source == parsed.source) {
            patterns.push(parsed);
        }
        Ok(())
    }

    /// Find the first registered pattern matching `channel`
    pub fn matches(&self, channel: &str) -> Option<ChannelMatch> {
        self.patterns.read().iter().find_map(|pattern| {
            pattern.matches(channel).map(|params| ChannelMatch {
                pattern: pattern.source.clone(),
                params,
            })
        })
    }

    /// Number of registered patterns
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}
