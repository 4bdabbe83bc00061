//! Per-file reconstruction outcomes, serialisable as the decode report.

use serde::{Deserialize, Serialize};

use crate::assembler::{ReconstructError, Reconstruction};
use crate::checksum::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Every chunk was present and the bytes were saved.
    Complete,
    /// Saved with missing chunks omitted.
    Partial,
    /// Refused: chunks missing and partial output not allowed.
    Incomplete,
    /// Refused: envelopes disagreed on the chunk count.
    Inconsistent,
    /// The joined payload could not be decoded.
    ReconstructionFailed,
    /// Reconstructed, but writing the output failed.
    SaveFailed,
}

impl FileStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Complete | Self::Partial)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub chunks_used: usize,
    pub chunks_available: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_match: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size_match: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    fn failed(status: FileStatus, chunks_available: usize, error: String) -> Self {
        Self {
            status,
            output_path: None,
            size: None,
            fingerprint: None,
            chunks_used: 0,
            chunks_available,
            missing_chunks: Vec::new(),
            fingerprint_match: None,
            expected_size_match: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionReport {
    pub total_files: usize,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub files: std::collections::BTreeMap<String, FileReport>,
}

impl ReconstructionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reconstruction that was written to `output_path`.
    pub fn record_reconstructed(
        &mut self,
        source: &str,
        rec: &Reconstruction,
        output_path: &str,
        expected_size: Option<u64>,
    ) {
        let status = if rec.partial { FileStatus::Partial } else { FileStatus::Complete };
        let size = rec.bytes.len() as u64;
        self.insert(
            source,
            FileReport {
                status,
                output_path: Some(output_path.to_string()),
                size: Some(size),
                fingerprint: Some(rec.fingerprint.clone()),
                chunks_used: rec.chunks_used,
                chunks_available: rec.chunks_used,
                missing_chunks: rec.missing.clone(),
                fingerprint_match: rec.fingerprint_match,
                expected_size_match: expected_size.map(|want| want == size),
                error: None,
            },
        );
    }

    /// Record a file the assembler refused or could not decode.
    pub fn record_failure(&mut self, source: &str, err: &ReconstructError, chunks_available: usize) {
        let (status, missing) = match err {
            ReconstructError::Incomplete { missing, .. } => (FileStatus::Incomplete, missing.clone()),
            ReconstructError::Inconsistent { .. } => (FileStatus::Inconsistent, Vec::new()),
            ReconstructError::Decode { .. } | ReconstructError::EmptyGroup { .. } => {
                (FileStatus::ReconstructionFailed, Vec::new())
            }
        };
        let mut report = FileReport::failed(status, chunks_available, err.to_string());
        report.missing_chunks = missing;
        self.insert(source, report);
    }

    /// Record a reconstruction whose output could not be written.
    pub fn record_save_failed(&mut self, source: &str, rec: &Reconstruction, error: String) {
        let mut report = FileReport::failed(FileStatus::SaveFailed, rec.chunks_used, error);
        report.chunks_used = rec.chunks_used;
        report.size = Some(rec.bytes.len() as u64);
        report.fingerprint = Some(rec.fingerprint.clone());
        report.missing_chunks = rec.missing.clone();
        report.fingerprint_match = rec.fingerprint_match;
        self.insert(source, report);
    }

    /// True when at least one file was reconstructed in full.
    pub fn any_complete(&self) -> bool {
        self.files.values().any(|f| f.status == FileStatus::Complete)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn insert(&mut self, source: &str, report: FileReport) {
        if let Some(old) = self.files.remove(source) {
            self.uncount(old.status);
        }
        self.count(report.status);
        self.files.insert(source.to_string(), report);
    }

    fn count(&mut self, status: FileStatus) {
        self.total_files += 1;
        match status {
            FileStatus::Complete => self.successful += 1,
            FileStatus::Partial => self.partial += 1,
            _ => self.failed += 1,
        }
    }

    fn uncount(&mut self, status: FileStatus) {
        self.total_files -= 1;
        match status {
            FileStatus::Complete => self.successful -= 1,
            FileStatus::Partial => self.partial -= 1,
            _ => self.failed -= 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::fingerprint;

    fn rec(bytes: &[u8], missing: Vec<u32>) -> Reconstruction {
        Reconstruction {
            bytes: bytes.to_vec(),
            fingerprint: fingerprint(bytes),
            chunks_used: 3,
            partial: !missing.is_empty(),
            missing,
            fingerprint_match: Some(true),
        }
    }

    #[test]
    fn test_counts_by_status() {
        let mut r = ReconstructionReport::new();
        r.record_reconstructed("a", &rec(b"abc", vec![]), "out/a", Some(3));
        r.record_reconstructed("b", &rec(b"ab", vec![2]), "out/b", Some(9));
        r.record_failure("c", &ReconstructError::Incomplete { file: "c".into(), missing: vec![1, 4] }, 2);
        r.record_failure("d", &ReconstructError::Decode { file: "d".into(), reason: "bad".into() }, 1);
        r.record_save_failed("e", &rec(b"x", vec![]), "disk full".into());

        assert_eq!((r.total_files, r.successful, r.partial, r.failed), (5, 1, 1, 3));
        assert!(r.any_complete());
        assert_eq!(r.files["a"].expected_size_match, Some(true));
        assert_eq!(r.files["b"].expected_size_match, Some(false));
        assert_eq!(r.files["b"].status, FileStatus::Partial);
        assert_eq!(r.files["c"].missing_chunks, vec![1, 4]);
        assert_eq!(r.files["d"].status, FileStatus::ReconstructionFailed);
        assert_eq!(r.files["e"].status, FileStatus::SaveFailed);
    }

    #[test]
    fn test_rerecording_replaces_counts() {
        let mut r = ReconstructionReport::new();
        r.record_reconstructed("a", &rec(b"abc", vec![]), "out/a", None);
        r.record_save_failed("a", &rec(b"abc", vec![]), "denied".into());
        assert_eq!((r.total_files, r.successful, r.failed), (1, 0, 1));
        assert!(!r.any_complete());
    }

    #[test]
    fn test_json_shape() {
        let mut r = ReconstructionReport::new();
        r.record_failure(
            "x",
            &ReconstructError::Inconsistent { file: "x".into(), declared: 3, conflicting: vec![4] },
            2,
        );
        let json = r.to_json_pretty().unwrap();
        assert!(json.contains("\"status\": \"inconsistent\""));
        assert!(!json.contains("output_path"));
        let back: ReconstructionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
