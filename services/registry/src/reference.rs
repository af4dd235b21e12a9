//! Repository names, tags and manifest references

use std::fmt;
use std::str::FromStr;

use crate::digest::{Digest, DigestError};

/// Maximum length of a tag.
const MAX_TAG_LEN: usize = 128;

/// Check a repository name against the distribution grammar:
/// slash separated components of lowercase alphanumerics, where a single
/// `.`, `_` or `-` may separate alphanumeric runs inside a component.
pub fn is_valid_repository(name: &str) -> bool {
    !name.is_empty() && name.split('/').all(is_valid_component)
}

fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !is_lower_alnum(*first) || !is_lower_alnum(*last) {
        return false;
    }

    let mut previous_separator = false;
    for &b in bytes {
        if is_lower_alnum(b) {
            previous_separator = false;
        } else if matches!(b, b'.' | b'_' | b'-') && !previous_separator {
            previous_separator = true;
        } else {
            return false;
        }
    }
    true
}

fn is_lower_alnum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// A validated tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag does not match `[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tag: {0:?}")]
pub struct InvalidTag(String);

impl FromStr for Tag {
    type Err = InvalidTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let valid = match bytes.split_first() {
            Some((first, rest)) => {
                (first.is_ascii_alphanumeric() || *first == b'_')
                    && bytes.len() <= MAX_TAG_LEN
                    && rest
                        .iter()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
            }
            None => false,
        };

        if valid {
            Ok(Tag(s.to_string()))
        } else {
            Err(InvalidTag(s.to_string()))
        }
    }
}

/// A manifest reference: either a mutable tag or an immutable digest.
///
/// The two forms are kept apart by type rather than by the shape of the
/// string, so a tag can never be mistaken for a digest key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A tag name
    Tag(Tag),
    /// A content digest
    Digest(Digest),
}

/// A string that is neither a valid tag nor a valid digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// Looked like a digest (contains `:`) but did not parse as one
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// Not a valid tag
    #[error(transparent)]
    Tag(#[from] InvalidTag),
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Tags can never contain ':'
        if s.contains(':') {
            Ok(Reference::Digest(s.parse()?))
        } else {
            Ok(Reference::Tag(s.parse()?))
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => tag.fmt(f),
            Reference::Digest(digest) => digest.fmt(f),
        }
    }
}

impl From<Digest> for Reference {
    fn from(value: Digest) -> Self {
        Reference::Digest(value)
    }
}

impl From<Tag> for Reference {
    fn from(value: Tag) -> Self {
        Reference::Tag(value)
    }
}
