//! Content fingerprints for end-to-end integrity checks.
//!
//! Fingerprints are SHA-256 digests rendered as lowercase hex. They are never
//! part of envelope framing; they only travel in the manifest and the
//! reconstruction report.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const DIGEST_HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 digest of a byte buffer.
///
/// Deserialisation goes through [`Fingerprint::parse`], so digests read from a
/// manifest are normalised to lowercase and anything else is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a 64-character hex digest (either case). Returns `None` otherwise.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != DIGEST_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("'{}' is not a {}-character hex digest", s, DIGEST_HEX_LEN))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint `bytes`.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint(hex::encode(Sha256::digest(bytes)))
}
