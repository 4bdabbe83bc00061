pub mod assembler;
pub mod checksum;
pub mod collector;
pub mod config;
pub mod envelope;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod splitter;
pub mod symbol;

pub use assembler::{reconstruct, ReconstructError, ReconstructPolicy, Reconstruction};
pub use checksum::{fingerprint, Fingerprint};
pub use collector::{ChunkCollector, CollectError, CollectorStats, Completeness, FileChunkGroup, IngestOutcome};
pub use config::{CodecConfig, DEFAULT_CHUNK_SIZE_BUDGET};
pub use envelope::{Envelope, EnvelopeError, IndexWidth, DEFAULT_MARKER};
pub use manifest::{EncodeMode, Manifest, ManifestEntry, ManifestError, OriginInfo};
pub use pipeline::{build_report, encode_files, reconstruct_all, EncodeOptions, EncodeOutput, FileOutcome, SourceFile};
pub use report::{FileReport, FileStatus, ReconstructionReport};
pub use splitter::{ChunkSplitter, SequenceAllocator};
pub use symbol::{ErrorCorrection, SymbolDecoder, SymbolEncoder, SymbolError, TextSymbolCodec};
