//! Encode path: cut a byte buffer into size-bounded envelopes.
//!
//! The buffer is base64-encoded first and the *text* is sliced, so slices can
//! be concatenated back in any grouping without re-aligning to 3-byte groups.
//!
//! Overhead policy: every file is budgeted with one worst-case digit width for
//! its numeric fields, starting at [`MIN_INDEX_DIGITS`](crate::envelope::MIN_INDEX_DIGITS)
//! and widened until it covers the file's own chunk count and the highest
//! sequence index the file receives. All of a file's chunks then carry the
//! same payload length (the last may be shorter) and every serialized envelope
//! fits the budget.
//!
//! The payload length is rounded down to whole base64 quartets, so any subset
//! of chunks joined in order is still decodable and a lost chunk removes
//! exactly its own bytes from a partial reconstruction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::envelope::{self, Envelope, EnvelopeError, IndexWidth, DEFAULT_MARKER};

/// Characters per base64 group; every full chunk is a multiple of this.
const BASE64_QUARTET: usize = 4;

// ---------------------------------------------------------------------------
// SequenceAllocator
// ---------------------------------------------------------------------------

/// Run-wide source of sequence indices, starting at 1.
///
/// One allocator is shared by every splitter of an encode run; concurrent
/// runs each own their own allocator.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first.max(1)) }
    }

    /// Next index that would be handed out.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Number of indices handed out so far (for an allocator starting at 1).
    pub fn allocated(&self) -> u64 {
        self.peek_next() - 1
    }

    /// Reserve a contiguous block of indices.
    ///
    /// `plan` is called with the prospective first index and returns the block
    /// length plus any value derived from it. The block is committed with a
    /// compare-and-swap; if another thread moved the counter in between, `plan`
    /// runs again against the new start. An `Err` from `plan` reserves nothing.
    pub fn reserve<T, E>(
        &self,
        mut plan: impl FnMut(u64) -> Result<(u64, T), E>,
    ) -> Result<(u64, T), E> {
        let mut first = self.next.load(Ordering::Acquire);
        loop {
            let (len, value) = plan(first)?;
            match self.next.compare_exchange_weak(
                first,
                first + len,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok((first, value)),
                Err(actual) => first = actual,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Chunk boundaries for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Payload bytes per chunk (the last chunk may carry fewer).
    pub content_per_chunk: usize,
    pub chunk_count: u32,
    /// Digit widths the overhead was priced at.
    pub width: IndexWidth,
    /// Serialized size of an envelope with an empty payload at `width`.
    pub overhead: usize,
}

/// Compute the layout for `text_len` bytes of base64 text whose first chunk
/// receives sequence index `first_sequence`.
pub fn plan(
    text_len: usize,
    source: &str,
    marker: &str,
    max_envelope_size: usize,
    first_sequence: u64,
) -> Result<ChunkLayout, EnvelopeError> {
    let mut width = IndexWidth::covering(first_sequence, 1);
    loop {
        let overhead = envelope::overhead(source, marker, width);
        let room = max_envelope_size.saturating_sub(overhead);
        let content_per_chunk = room - room % BASE64_QUARTET;
        if content_per_chunk == 0 {
            return Err(EnvelopeError::BudgetExceeded {
                file: source.to_string(),
                budget: max_envelope_size,
                overhead,
            });
        }
        let chunks = text_len.div_ceil(content_per_chunk).max(1);
        let chunk_count = u32::try_from(chunks).map_err(|_| EnvelopeError::BudgetExceeded {
            file: source.to_string(),
            budget: max_envelope_size,
            overhead,
        })?;

        let needed =
            IndexWidth::covering(first_sequence + u64::from(chunk_count) - 1, chunk_count);
        if width.covers(needed) {
            return Ok(ChunkLayout { content_per_chunk, chunk_count, width, overhead });
        }
        width = width.max(needed);
    }
}

// ---------------------------------------------------------------------------
// ChunkSplitter
// ---------------------------------------------------------------------------

pub struct ChunkSplitter {
    allocator: Arc<SequenceAllocator>,
    max_envelope_size: usize,
    marker: String,
}

impl ChunkSplitter {
    pub fn new(allocator: Arc<SequenceAllocator>, max_envelope_size: usize) -> Self {
        Self {
            allocator,
            max_envelope_size,
            marker: DEFAULT_MARKER.to_string(),
        }
    }

    pub fn max_envelope_size(&self) -> usize {
        self.max_envelope_size
    }

    pub fn allocator(&self) -> &Arc<SequenceAllocator> {
        &self.allocator
    }

    /// Split `bytes` into envelopes for `source`, in chunk order 1..=count.
    ///
    /// The only side effect is advancing the shared sequence counter by the
    /// number of chunks returned; a budget failure advances nothing.
    pub fn split(&self, bytes: &[u8], source: &str) -> Result<Vec<Envelope>, EnvelopeError> {
        let text = BASE64.encode(bytes);

        let (first, layout) = self.allocator.reserve(|first| {
            let layout = plan(text.len(), source, &self.marker, self.max_envelope_size, first)?;
            Ok::<_, EnvelopeError>((u64::from(layout.chunk_count), layout))
        })?;

        // base64 is pure ASCII, so byte offsets are char boundaries.
        let slices: Vec<&str> = if text.is_empty() {
            vec![""]
        } else {
            text.as_bytes()
                .chunks(layout.content_per_chunk)
                .map(|c| std::str::from_utf8(c).unwrap_or_default())
                .collect()
        };
        debug_assert_eq!(slices.len(), layout.chunk_count as usize);

        let envelopes: Vec<Envelope> = slices
            .into_iter()
            .zip(1u32..)
            .map(|(slice, chunk_index)| Envelope {
                sequence_index: first + u64::from(chunk_index) - 1,
                source: source.to_string(),
                chunk_index,
                chunk_count: layout.chunk_count,
                payload: slice.to_string(),
                marker: self.marker.clone(),
            })
            .collect();

        tracing::debug!(
            source,
            bytes = bytes.len(),
            chunks = layout.chunk_count,
            content_per_chunk = layout.content_per_chunk,
            first_sequence = first,
            "split file into envelopes"
        );
        Ok(envelopes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
