//! Seam between envelope text and the optical symbols that carry it.
//!
//! Rendering and scanning real symbols is left to pluggable backends. The
//! built-in [`TextSymbolCodec`] stores envelope text verbatim so the rest of
//! the pipeline can run without an imaging library.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("{len} bytes exceed symbol capacity {capacity} at level {level}")]
    Capacity { len: usize, capacity: usize, level: ErrorCorrection },

    #[error("symbol backend failed: {0}")]
    Backend(String),
}

/// Error-correction level of the optical symbol. Only affects capacity here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

impl ErrorCorrection {
    /// Byte-mode capacity of the largest symbol version.
    pub fn byte_capacity(self) -> usize {
        match self {
            Self::L => 2953,
            Self::M => 2331,
            Self::Q => 1663,
            Self::H => 1273,
        }
    }
}

impl fmt::Display for ErrorCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::L => "L",
            Self::M => "M",
            Self::Q => "Q",
            Self::H => "H",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorCorrection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" => Ok(Self::L),
            "M" => Ok(Self::M),
            "Q" => Ok(Self::Q),
            "H" => Ok(Self::H),
            other => Err(format!("unknown error correction level '{other}' (expected L, M, Q or H)")),
        }
    }
}

pub trait SymbolEncoder: Send + Sync {
    /// File extension for written artifacts, without the dot.
    fn extension(&self) -> &'static str;

    fn encode_symbol(&self, text: &str) -> Result<Vec<u8>, SymbolError>;
}

pub trait SymbolDecoder: Send + Sync {
    /// Text carried by an artifact, or `None` if nothing readable was found.
    fn decode_symbol(&self, artifact: &[u8]) -> Option<String>;
}

/// Plain-text backend: one envelope per file, newline terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSymbolCodec {
    level: ErrorCorrection,
}

impl TextSymbolCodec {
    pub fn new(level: ErrorCorrection) -> Self {
        Self { level }
    }

    pub fn level(&self) -> ErrorCorrection {
        self.level
    }
}

impl SymbolEncoder for TextSymbolCodec {
    fn extension(&self) -> &'static str {
        "sym"
    }

    fn encode_symbol(&self, text: &str) -> Result<Vec<u8>, SymbolError> {
        let capacity = self.level.byte_capacity();
        if text.len() > capacity {
            return Err(SymbolError::Capacity { len: text.len(), capacity, level: self.level });
        }
        let mut out = Vec::with_capacity(text.len() + 1);
        out.extend_from_slice(text.as_bytes());
        out.push(b'\n');
        Ok(out)
    }
}

impl SymbolDecoder for TextSymbolCodec {
    fn decode_symbol(&self, artifact: &[u8]) -> Option<String> {
        let text = std::str::from_utf8(artifact).ok()?.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}
