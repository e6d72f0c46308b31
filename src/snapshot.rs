//! Directory-snapshot enumeration.
//!
//! A find-first-file reply is buffered whole as a chain of fixed-size chunks
//! before the caller sees it; [`FindHandle::next`] then decodes one entry at
//! a time, advancing a byte cursor across chunk boundaries. The cursor is
//! forward-only and single-consumption.

use crate::error::{Error, Result};
use crate::protocol::codec::WireRead;
use crate::protocol::stream::ResponseStream;
use crate::protocol::SIZE_UNKNOWN;

/// Chunk size of the buffered reply
const CHUNK_SIZE: usize = 64 * 1024;

/// Name length past this is a desynchronized stream
const MAX_NAME_LEN: u64 = 1 << 20;

/// Attributes sentinel for "not indexed"
const ATTRIBUTES_UNKNOWN: u32 = u32::MAX;

/// One snapshot entry. Fields the daemon did not index are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub attributes: Option<u32>,
    pub size: Option<u64>,
    pub date_created: Option<u64>,
    pub date_accessed: Option<u64>,
    pub date_modified: Option<u64>,
}

/// Forward-only cursor over a buffered snapshot reply
pub struct FindHandle {
    chunks: Vec<Vec<u8>>,
    chunk: usize,
    offset: usize,
    bad: bool,
}

impl FindHandle {
    /// Buffer the whole reply into a chunk chain
    pub(crate) fn read_from(stream: &mut ResponseStream<'_>) -> Self {
        let mut chunks = Vec::new();
        loop {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = stream.read_up_to(&mut chunk);
            if n == 0 {
                break;
            }
            chunk.truncate(n);
            chunks.push(chunk);
            if chunks.last().map(Vec::len) != Some(CHUNK_SIZE) {
                break;
            }
        }
        Self { chunks, chunk: 0, offset: 0, bad: false }
    }

    fn exhausted(&self) -> bool {
        self.chunk >= self.chunks.len()
            || (self.chunk == self.chunks.len() - 1 && self.offset >= self.chunks[self.chunk].len())
    }

    /// Decode the next entry; `Ok(None)` at a clean end of the buffer,
    /// `BadResponse` if the buffer ends mid-record.
    pub fn next(&mut self) -> Result<Option<SnapshotEntry>> {
        if self.bad {
            return Err(Error::BadResponse);
        }
        if self.exhausted() {
            return Ok(None);
        }

        let attributes = self.read_u32();
        let size = self.read_u64();
        let date_created = self.read_u64();
        let date_accessed = self.read_u64();
        let date_modified = self.read_u64();
        let name_len = self.read_vlq();
        if name_len > MAX_NAME_LEN {
            self.bad = true;
        }
        let mut name = vec![0u8; if self.bad { 0 } else { name_len as usize }];
        self.read_exact_or_zero(&mut name);

        if self.bad {
            return Err(Error::BadResponse);
        }

        let opt_time = |v: u64| if v == SIZE_UNKNOWN { None } else { Some(v) };
        Ok(Some(SnapshotEntry {
            name: String::from_utf8_lossy(&name).into_owned(),
            attributes: if attributes == ATTRIBUTES_UNKNOWN { None } else { Some(attributes) },
            size: opt_time(size),
            date_created: opt_time(date_created),
            date_accessed: opt_time(date_accessed),
            date_modified: opt_time(date_modified),
        }))
    }
}

impl WireRead for FindHandle {
    fn read_exact_or_zero(&mut self, buf: &mut [u8]) {
        let mut filled = 0;
        while filled < buf.len() {
            if self.bad || self.chunk >= self.chunks.len() {
                self.bad = true;
                break;
            }
            let chunk = &self.chunks[self.chunk];
            if self.offset >= chunk.len() {
                self.chunk += 1;
                self.offset = 0;
                continue;
            }
            let n = (buf.len() - filled).min(chunk.len() - self.offset);
            buf[filled..filled + n].copy_from_slice(&chunk[self.offset..self.offset + n]);
            self.offset += n;
            filled += n;
        }
        buf[filled..].fill(0);
    }

    fn mark_bad(&mut self) {
        self.bad = true;
    }
}
