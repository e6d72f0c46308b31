//! Grow-only chunked arena backing one decoded result set.
//!
//! All variable-length data decoded from a reply (row records, pooled strings,
//! blobs, variant payloads) lives here for the lifetime of the owning
//! [`ResultList`](crate::result::ResultList). Allocations hand out opaque
//! [`ArenaRef`] handles rather than raw pointers; a handle stays valid until
//! the arena is dropped, and nothing is ever reclaimed individually.

use crate::protocol::codec::{SliceReader, WireRead};

/// Minimum size of a freshly grown chunk
const MIN_CHUNK: usize = 64 * 1024;

/// Opaque handle to an arena allocation: chunk index in the high half,
/// byte offset in the low half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRef(u64);

impl ArenaRef {
    /// The null reference, distinct from any allocation (including empty ones)
    pub const NULL: ArenaRef = ArenaRef(u64::MAX);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub(crate) fn to_raw(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        ArenaRef(raw)
    }

    fn pack(chunk: usize, offset: usize) -> Self {
        ArenaRef(((chunk as u64) << 32) | offset as u64)
    }

    fn chunk(&self) -> usize {
        (self.0 >> 32) as usize
    }

    fn offset(&self) -> usize {
        self.0 as u32 as usize
    }
}

/// Grow-only chunked pool
#[derive(Debug)]
pub struct Arena {
    chunks: Vec<Vec<u8>>,
}

impl Arena {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Allocate `size` zeroed bytes and return a handle to them.
    ///
    /// Grows by whole chunks of at least [`MIN_CHUNK`] bytes; a chunk is never
    /// reallocated once created, so previously returned handles stay valid.
    pub fn alloc(&mut self, size: usize) -> ArenaRef {
        let need_new = match self.chunks.last() {
            Some(chunk) => chunk.capacity() - chunk.len() < size,
            None => true,
        };
        if need_new {
            self.chunks.push(Vec::with_capacity(MIN_CHUNK.max(size)));
        }

        let chunk_idx = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_idx];
        let offset = chunk.len();
        chunk.resize(offset + size, 0);
        ArenaRef::pack(chunk_idx, offset)
    }

    /// Allocate a copy of `bytes`
    pub fn alloc_copy(&mut self, bytes: &[u8]) -> ArenaRef {
        let r = self.alloc(bytes.len());
        self.get_mut(r, bytes.len()).copy_from_slice(bytes);
        r
    }

    /// Borrow `len` bytes starting at `r`
    pub fn get(&self, r: ArenaRef, len: usize) -> &[u8] {
        &self.chunks[r.chunk()][r.offset()..r.offset() + len]
    }

    pub fn get_mut(&mut self, r: ArenaRef, len: usize) -> &mut [u8] {
        &mut self.chunks[r.chunk()][r.offset()..r.offset() + len]
    }

    /// Borrow everything from `r` to the end of its chunk.
    ///
    /// Pooled values carry their own length prefix, so callers parse the
    /// prefix out of this tail rather than storing lengths beside handles.
    pub fn tail(&self, r: ArenaRef) -> &[u8] {
        &self.chunks[r.chunk()][r.offset()..]
    }

    /// Parse a pooled PString at `r`: `None` for the null handle, otherwise
    /// the string bytes (possibly empty)
    pub fn pstring(&self, r: ArenaRef) -> Option<&[u8]> {
        if r.is_null() {
            return None;
        }
        let mut reader = SliceReader::new(self.tail(r));
        let len = reader.read_vlq() as usize;
        Some(reader.take(len))
    }

    /// Total bytes currently committed across all chunks
    pub fn committed(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
