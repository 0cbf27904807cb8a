//! Resource keys identifying one cacheable feed document.
//!
//! A key is `platform:kind:ident` — e.g. `forum:topic:42` or
//! `releases:repo:rust-lang/rust`. The rendered form doubles as the cache
//! key, so it must be stable and round-trip through parsing.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Resource key must have the form platform:kind:ident, got '{0}'")]
    Malformed(String),
    #[error("Resource key has an empty segment: '{0}'")]
    EmptySegment(String),
}

/// Identifies one cacheable feed document within a resource family.
///
/// Immutable once constructed. The `ident` segment may itself contain
/// colons (repository paths, compound author ids); only the first two
/// separators are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    platform: String,
    kind: String,
    ident: String,
}

impl ResourceKey {
    pub fn new(
        platform: impl Into<String>,
        kind: impl Into<String>,
        ident: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let key = Self {
            platform: platform.into(),
            kind: kind.into(),
            ident: ident.into(),
        };
        if key.platform.is_empty() || key.kind.is_empty() || key.ident.is_empty() {
            return Err(KeyError::EmptySegment(key.to_string()));
        }
        Ok(key)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// The resource family this key belongs to (`platform:kind`).
    ///
    /// One coordinator instance serves one family.
    pub fn family(&self) -> String {
        format!("{}:{}", self.platform, self.kind)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.platform, self.kind, self.ident)
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(platform), Some(kind), Some(ident)) => Self::new(platform, kind, ident),
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}
