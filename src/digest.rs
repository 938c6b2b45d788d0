use crate::error::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::{fmt, path::PathBuf, str::FromStr};

/// Digest of contents
///
/// Digest is defined in [OCI image spec](https://github.com/opencontainers/image-spec/blob/v1.0.1/descriptor.md#digests)
/// as a string satisfies following EBNF:
///
/// ```text
/// digest                ::= algorithm ":" encoded
/// algorithm             ::= algorithm-component (algorithm-separator algorithm-component)*
/// algorithm-component   ::= [a-z0-9]+
/// algorithm-separator   ::= [+._-]
/// encoded               ::= [a-zA-Z0-9=_-]+
/// ```
///
/// Only `sha256` digests can be verified against content,
/// other algorithms are accepted as opaque identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: String,
    pub encoded: String,
}

lazy_static::lazy_static! {
    static ref ALGORITHM_RE: Regex = Regex::new(r"^[a-z0-9]+([+._-][a-z0-9]+)*$").unwrap();
    static ref ENCODED_RE: Regex = Regex::new(r"^[a-zA-Z0-9=_-]+$").unwrap();
    static ref SHA256_RE: Regex = Regex::new(r"^[a-f0-9]{64}$").unwrap();
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Digest::new(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Digest, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::new(&s).map_err(serde::de::Error::custom)
    }
}

impl Digest {
    pub fn new(input: &str) -> Result<Self> {
        let (algorithm, encoded) = input
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(input.to_string()))?;
        if !ALGORITHM_RE.is_match(algorithm) || !ENCODED_RE.is_match(encoded) {
            return Err(Error::InvalidDigest(input.to_string()));
        }
        if algorithm == "sha256" && !SHA256_RE.is_match(encoded) {
            return Err(Error::InvalidDigest(input.to_string()));
        }
        Ok(Digest {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_string(),
        })
    }

    pub fn from_descriptor(descriptor: &oci_spec::image::Descriptor) -> Result<Self> {
        Self::new(descriptor.digest())
    }

    /// As a path used in OCI image layout
    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(format!("blobs/{}/{}", self.algorithm, self.encoded))
    }

    /// Calc digest using SHA-256 algorithm
    pub fn from_buf_sha256(buf: &[u8]) -> Self {
        let hash = Sha256::digest(buf);
        let digest = base16ct::lower::encode_string(&hash);
        Self {
            algorithm: "sha256".to_string(),
            encoded: digest,
        }
    }

    /// Check `buf` is the content this digest points to.
    ///
    /// Non-sha256 digests cannot be checked and always pass.
    pub fn verify(&self, buf: &[u8]) -> Result<()> {
        if self.algorithm != "sha256" {
            log::debug!("Skip verification of {} digest", self.algorithm);
            return Ok(());
        }
        let actual = Self::from_buf_sha256(buf);
        if &actual != self {
            return Err(Error::DigestMismatch {
                expected: self.clone(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn parse() -> Result<()> {
        let digest = Digest::new(HELLO)?;
        assert_eq!(digest.algorithm, "sha256");
        assert_eq!(digest.to_string(), HELLO);
        assert_eq!(
            digest.as_path(),
            PathBuf::from(
                "blobs/sha256/2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            )
        );

        assert!(Digest::new("sha256").is_err());
        assert!(Digest::new("sha256:").is_err());
        assert!(Digest::new("sha256:abc").is_err());
        assert!(Digest::new("SHA256:abc").is_err());
        assert!(Digest::new("sha512:abc").is_ok());
        Ok(())
    }

    #[test]
    fn sha256() -> Result<()> {
        let digest = Digest::from_buf_sha256(b"hello");
        assert_eq!(digest, Digest::new(HELLO)?);
        digest.verify(b"hello")?;
        assert!(matches!(
            digest.verify(b"hello!"),
            Err(Error::DigestMismatch { .. })
        ));
        Ok(())
    }
}
