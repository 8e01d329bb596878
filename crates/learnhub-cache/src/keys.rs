//! Cache key and invalidation pattern construction.
//!
//! ## Key Format
//!
//! `<entity>:<selector>[:<value>...]`, e.g. `courses:id:42`,
//! `courses:slug:intro-to-rust`, `courses:list:1:20:title:rust`.
//!
//! Free-text values are trimmed, lower-cased and have inner whitespace
//! collapsed, so `" Intro  To Rust"` and `"intro to rust"` produce the same
//! key. Missing or blank values become the placeholder `_`. The characters
//! `%`, `:` and `*` are percent-escaped inside values so a value can never
//! forge an extra segment or a wildcard.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stand-in for a missing or blank key segment.
pub const PLACEHOLDER: &str = "_";

/// Segment separator.
pub const SEPARATOR: char = ':';

/// Wildcard suffix for prefix patterns.
pub const WILDCARD: char = '*';

/// A deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start a key for `entity` with the given selector kind (`id`, `slug`, `list`, ...).
    pub fn builder(entity: &str, selector: &str) -> KeyBuilder {
        KeyBuilder::new(entity).segment(selector)
    }

    /// Fixed key for singleton/aggregate queries such as `categories:tree`.
    pub fn singleton(entity: &str, selector: &str) -> Self {
        Self::builder(entity, selector).build()
    }

    /// Wrap an already-formatted key without normalization.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The exact-match invalidation pattern for this key.
    pub fn exact_pattern(&self) -> InvalidationPattern {
        InvalidationPattern::Exact(self.0.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental builder for keys and prefix patterns.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    buf: String,
}

impl KeyBuilder {
    pub fn new(entity: &str) -> Self {
        let mut buf = String::with_capacity(48);
        push_escaped(&mut buf, &normalize_text(entity));
        Self { buf }
    }

    fn segment(mut self, value: &str) -> Self {
        self.buf.push(SEPARATOR);
        if value.trim().is_empty() {
            self.buf.push_str(PLACEHOLDER);
        } else {
            push_escaped(&mut self.buf, value);
        }
        self
    }

    /// Append an identifier verbatim (only trimmed).
    pub fn id(self, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        self.segment(value.trim())
    }

    /// Append an optional identifier; `None` becomes the placeholder.
    pub fn opt_id<T: fmt::Display>(self, value: Option<T>) -> Self {
        match value {
            Some(v) => self.id(v),
            None => self.segment(""),
        }
    }

    /// Append a free-text value, normalized for case and whitespace.
    pub fn text(self, value: Option<&str>) -> Self {
        let normalized = value.map(normalize_text).unwrap_or_default();
        self.segment(&normalized)
    }

    /// Append the pagination segments: page, size, sort expression, search term.
    pub fn page(self, page: u32, page_size: u32, sort: Option<&str>, search: Option<&str>) -> Self {
        self.id(page).id(page_size).text(sort).text(search)
    }

    pub fn build(self) -> CacheKey {
        CacheKey(self.buf)
    }

    /// Finish as a prefix pattern matching every key that extends this one.
    pub fn wildcard(mut self) -> InvalidationPattern {
        self.buf.push(SEPARATOR);
        InvalidationPattern::Prefix(self.buf)
    }
}

/// Trim, lower-case and collapse inner whitespace runs to a single space.
pub fn normalize_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for word in value.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

fn push_escaped(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '%' => buf.push_str("%25"),
            SEPARATOR => buf.push_str("%3A"),
            WILDCARD => buf.push_str("%2A"),
            c => buf.push(c),
        }
    }
}

/// A set of keys to purge: one exact key, or every key starting with a prefix.
///
/// The textual form ends in `*` for prefix patterns (`courses:list:*`) and is
/// the key itself otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InvalidationPattern {
    Exact(String),
    Prefix(String),
}

impl InvalidationPattern {
    /// Parse the textual form. A trailing `*` makes a prefix pattern.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix(WILDCARD) {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    /// `<entity>:*`, every key of one entity namespace.
    pub fn entity(entity: &str) -> Self {
        KeyBuilder::new(entity).wildcard()
    }

    /// `<entity>:<selector>:*`.
    pub fn selector(entity: &str, selector: &str) -> Self {
        CacheKey::builder(entity, selector).wildcard()
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => key == exact,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }

    /// The exact key or the prefix, without the trailing `*`.
    pub fn stem(&self) -> &str {
        match self {
            Self::Exact(s) | Self::Prefix(s) => s,
        }
    }
}

impl fmt::Display for InvalidationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => f.write_str(key),
            Self::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
        }
    }
}

impl From<String> for InvalidationPattern {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for InvalidationPattern {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<InvalidationPattern> for String {
    fn from(value: InvalidationPattern) -> Self {
        value.to_string()
    }
}

impl From<&CacheKey> for InvalidationPattern {
    fn from(key: &CacheKey) -> Self {
        key.exact_pattern()
    }
}
