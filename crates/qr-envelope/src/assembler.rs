//! Reconstruction engine: turn one file's chunk group back into bytes.
//!
//! Chunks are concatenated in numeric `chunk_index` order and the joined
//! base64 text is decoded in one pass. Missing chunks simply contribute no
//! text when partial output has been opted into; a decode failure is always
//! fatal for the file. Fingerprint mismatches are reported, never fatal.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::{fingerprint, Fingerprint};
use crate::collector::FileChunkGroup;

/// How far reconstruction may go when a group is not clean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructPolicy {
    /// Refuse incomplete or inconsistent groups.
    #[default]
    Strict,
    /// Reconstruct incomplete groups, flagged partial.
    AllowPartial,
    /// As `AllowPartial`, and also reconstruct groups that saw conflicting
    /// chunk counts, from the chunks that matched the first-recorded count.
    Force,
}

impl ReconstructPolicy {
    pub fn from_flags(allow_partial: bool, force: bool) -> Self {
        match (allow_partial, force) {
            (_, true) => Self::Force,
            (true, false) => Self::AllowPartial,
            (false, false) => Self::Strict,
        }
    }

    pub fn allows_partial(self) -> bool {
        !matches!(self, Self::Strict)
    }

    pub fn allows_inconsistent(self) -> bool {
        matches!(self, Self::Force)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructError {
    #[error("no chunks available for '{file}'")]
    EmptyGroup { file: String },

    #[error("'{file}' saw conflicting chunk counts {conflicting:?} (recorded {declared})")]
    Inconsistent { file: String, declared: u32, conflicting: Vec<u32> },

    #[error("'{file}' is missing chunks {missing:?}")]
    Incomplete { file: String, missing: Vec<u32> },

    #[error("'{file}' payload does not decode: {reason}")]
    Decode { file: String, reason: String },
}

/// Bytes rebuilt from a chunk group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub chunks_used: usize,
    /// Chunk indices that contributed nothing; empty unless `partial`.
    pub missing: Vec<u32>,
    pub partial: bool,
    /// `None` when no expected fingerprint was supplied.
    pub fingerprint_match: Option<bool>,
}

/// Rebuild `source` from `group`.
///
/// Completeness is checked here against `policy`, so callers may hand over
/// any group without pre-checking it.
pub fn reconstruct(
    source: &str,
    group: &FileChunkGroup,
    policy: ReconstructPolicy,
    expected: Option<&Fingerprint>,
) -> Result<Reconstruction, ReconstructError> {
    if group.is_empty() {
        return Err(ReconstructError::EmptyGroup { file: source.to_string() });
    }
    if !group.is_consistent() && !policy.allows_inconsistent() {
        return Err(ReconstructError::Inconsistent {
            file: source.to_string(),
            declared: group.declared_count,
            conflicting: group.conflicting_counts.iter().copied().collect(),
        });
    }

    let missing = group.missing();
    if !missing.is_empty() && !policy.allows_partial() {
        return Err(ReconstructError::Incomplete { file: source.to_string(), missing });
    }

    // BTreeMap iteration is ascending numeric chunk order.
    let text: String = group.chunks.values().map(|c| c.payload.as_str()).collect();
    let bytes = BASE64.decode(text.as_bytes()).map_err(|e| {
        tracing::debug!(source, chunks = group.len(), err = %e, "base64 decode failed");
        ReconstructError::Decode { file: source.to_string(), reason: e.to_string() }
    })?;

    let fp = fingerprint(&bytes);
    let fingerprint_match = expected.map(|want| *want == fp);
    if fingerprint_match == Some(false) {
        tracing::warn!(
            source,
            expected = %expected.map(Fingerprint::as_str).unwrap_or_default(),
            actual = %fp,
            "fingerprint mismatch"
        );
    }

    let partial = !missing.is_empty();
    if partial {
        tracing::warn!(source, missing = ?missing, "reconstructed with missing chunks");
    }
    tracing::info!(
        source,
        bytes = bytes.len(),
        chunks = group.len(),
        fingerprint = fp.short(),
        "reconstructed file"
    );

    Ok(Reconstruction {
        bytes,
        fingerprint: fp,
        chunks_used: group.len(),
        missing,
        partial,
        fingerprint_match,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
