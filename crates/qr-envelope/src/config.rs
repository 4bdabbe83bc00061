use serde::{Deserialize, Serialize};

use crate::assembler::ReconstructPolicy;
use crate::symbol::ErrorCorrection;

pub const DEFAULT_CHUNK_SIZE_BUDGET: usize = 2048;

/// Codec knobs shared by the encode and decode paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Maximum serialised envelope size in bytes.
    pub chunk_size_budget: usize,
    pub error_correction: ErrorCorrection,
    pub allow_partial_reconstruction: bool,
    pub force_reconstruction: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size_budget: DEFAULT_CHUNK_SIZE_BUDGET,
            error_correction: ErrorCorrection::default(),
            allow_partial_reconstruction: false,
            force_reconstruction: false,
        }
    }
}

impl CodecConfig {
    pub fn policy(&self) -> ReconstructPolicy {
        ReconstructPolicy::from_flags(self.allow_partial_reconstruction, self.force_reconstruction)
    }
}
