use crate::{error::*, Digest};
use regex::Regex;
use std::fmt;

/// Reference of container image stored in the repository, a tag or a digest
///
/// In [OCI distribution spec](https://github.com/opencontainers/distribution-spec/blob/main/spec.md):
/// > `<reference>` as a tag MUST be at most 128 characters
/// > in length and MUST match the following regular expression:
/// > ```text
/// > [a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}
/// > ```
///
/// A digest reference is kept as [Reference::Digest] so that it is never
/// mistaken for a mutable tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}

lazy_static::lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap();
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => write!(f, "{}", tag),
            Reference::Digest(digest) => write!(f, "{}", digest),
        }
    }
}

impl From<Digest> for Reference {
    fn from(digest: Digest) -> Self {
        Reference::Digest(digest)
    }
}

impl Reference {
    /// Parse a tag, or a digest if the input contains `:`
    pub fn new(reference: &str) -> Result<Self> {
        if reference.contains(':') {
            Ok(Reference::Digest(Digest::new(reference)?))
        } else {
            Self::tag(reference)
        }
    }

    /// Parse a tag. Digest-looking input is rejected.
    pub fn tag(tag: &str) -> Result<Self> {
        if TAG_RE.is_match(tag) {
            Ok(Reference::Tag(tag.to_string()))
        } else {
            Err(Error::InvalidReference(tag.to_string()))
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Reference::Digest(digest) => Some(digest),
            Reference::Tag(_) => None,
        }
    }

    pub fn is_digest(&self) -> bool {
        self.digest().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference() -> Result<()> {
        assert_eq!(Reference::new("latest")?, Reference::Tag("latest".to_string()));
        assert_eq!(Reference::new("latest")?.to_string(), "latest");
        // @ is not allowed
        assert!(Reference::new("my_super_tag@2").is_err());
        assert!(Reference::new(".hidden").is_err());
        Ok(())
    }

    #[test]
    fn digest_reference() -> Result<()> {
        let input = "sha256:9a161b6fc2f8ef74bb368f56edcac33a91b494d082da3693a600751a1a68b7d8";
        let reference = Reference::new(input)?;
        assert!(reference.is_digest());
        assert_eq!(reference.to_string(), input);

        // Tags never carry `:`
        assert!(Reference::tag(input).is_err());
        assert!(Reference::new("sha256:xyz").is_err());
        Ok(())
    }
}
