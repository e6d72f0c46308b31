//! Mutable search request description.
//!
//! A [`SearchState`] collects everything a search/sort/get-results request
//! needs: the query text, the match-behaviour flags, the viewport window, the
//! sort list, and the property-request list. It carries its own lock, so a
//! caller may mutate it while a previous request is still in flight; the
//! in-flight request works from a snapshot copied under the lock at send time.

use crate::error::{Error, Result};
use crate::protocol::codec::{write_pstring, write_vlq};
use bitflags::bitflags;
use parking_lot::Mutex;

bitflags! {
    /// Match-behaviour and request flags for a search
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SearchFlags: u32 {
        const MATCH_CASE = 1 << 0;
        const MATCH_WHOLE_WORD = 1 << 1;
        const MATCH_PATH = 1 << 2;
        const MATCH_REGEX = 1 << 3;
        const MATCH_PREFIX = 1 << 4;
        const MATCH_SUFFIX = 1 << 5;
        const MATCH_DIACRITICS = 1 << 6;
        const MATCH_PUNCTUATION = 1 << 7;
        const MATCH_WHITESPACE = 1 << 8;
        /// Group folders before files regardless of the sort
        const FOLDERS_FIRST = 1 << 9;
        /// Ask the daemon to compute the total byte size of all results
        const TOTAL_SIZE = 1 << 10;
        /// Hide results the daemon marked as omitted
        const HIDE_OMITTED = 1 << 11;
        /// Mix folders and files in sort order
        const MIX_SORT = 1 << 12;
        /// Force a fresh query even if the daemon has a cached result
        const FORCE = 1 << 13;
        /// Request 64-bit size fields in the reply
        const WIDE_TOTALS = 1 << 14;
    }
}

bitflags! {
    /// Per-property request flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropertyRequestFlags: u32 {
        /// Return the value with match-highlighting markers, as text
        const HIGHLIGHT = 1 << 0;
        /// Return the value formatted for display, as text
        const FORMAT = 1 << 1;
    }
}

/// Sort flag: descending order
pub const SORT_DESCENDING: u32 = 1 << 0;

/// Viewport count meaning "everything from the offset on"
pub const VIEWPORT_UNBOUNDED: u64 = u64::MAX;

/// One (property, direction) sort entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortEntry {
    pub property_id: u32,
    pub flags: u32,
}

impl SortEntry {
    pub fn descending(&self) -> bool {
        self.flags & SORT_DESCENDING != 0
    }
}

/// One property-request entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRequest {
    pub property_id: u32,
    pub flags: PropertyRequestFlags,
}

#[derive(Debug, Clone, Default)]
struct SearchInner {
    text: Vec<u8>,
    flags: SearchFlags,
    viewport_offset: u64,
    viewport_count: u64,
    sorts: Vec<SortEntry>,
    requests: Vec<PropertyRequest>,
}

/// Lock-guarded search request description
pub struct SearchState {
    inner: Mutex<SearchInner>,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SearchInner {
                viewport_count: VIEWPORT_UNBOUNDED,
                ..Default::default()
            }),
        }
    }

    /// Replace the query text atomically
    pub fn set_text(&self, text: &str) {
        self.inner.lock().text = text.as_bytes().to_vec();
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().text).into_owned()
    }

    pub fn set_flags(&self, flags: SearchFlags) {
        self.inner.lock().flags = flags;
    }

    pub fn flags(&self) -> SearchFlags {
        self.inner.lock().flags
    }

    /// Set or clear one flag
    pub fn set_flag(&self, flag: SearchFlags, on: bool) {
        self.inner.lock().flags.set(flag, on);
    }

    /// Set the (offset, count) window the daemon should materialize.
    /// `VIEWPORT_UNBOUNDED` for `count` means "everything from the offset on".
    pub fn set_viewport(&self, offset: u64, count: u64) {
        let mut inner = self.inner.lock();
        inner.viewport_offset = offset;
        inner.viewport_count = count;
    }

    pub fn viewport(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.viewport_offset, inner.viewport_count)
    }

    /// Append a sort entry
    pub fn add_sort(&self, property_id: u32, descending: bool) {
        self.inner.lock().sorts.push(SortEntry {
            property_id,
            flags: if descending { SORT_DESCENDING } else { 0 },
        });
    }

    pub fn clear_sorts(&self) {
        self.inner.lock().sorts.clear();
    }

    /// Replace the whole sort list with a single entry
    pub fn set_search_sort(&self, property_id: u32, descending: bool) {
        let mut inner = self.inner.lock();
        inner.sorts.clear();
        inner.sorts.push(SortEntry {
            property_id,
            flags: if descending { SORT_DESCENDING } else { 0 },
        });
    }

    pub fn sorts(&self) -> Vec<SortEntry> {
        self.inner.lock().sorts.clone()
    }

    pub fn sort_count(&self) -> usize {
        self.inner.lock().sorts.len()
    }

    /// Sort entry by position; [`Error::InvalidParameter`] out of range
    pub fn sort_entry(&self, index: usize) -> Result<SortEntry> {
        self.inner.lock().sorts.get(index).copied().ok_or(Error::InvalidParameter)
    }

    /// Append a property request
    pub fn add_property_request(&self, property_id: u32, flags: PropertyRequestFlags) {
        self.inner.lock().requests.push(PropertyRequest { property_id, flags });
    }

    pub fn clear_property_requests(&self) {
        self.inner.lock().requests.clear();
    }

    pub fn property_requests(&self) -> Vec<PropertyRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn property_request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Property request by position; [`Error::InvalidParameter`] out of range
    pub fn property_request(&self, index: usize) -> Result<PropertyRequest> {
        self.inner.lock().requests.get(index).copied().ok_or(Error::InvalidParameter)
    }

    /// Copy the state under its lock into an immutable request snapshot
    pub(crate) fn snapshot(&self) -> SearchSnapshot {
        let inner = self.inner.lock();
        SearchSnapshot {
            text: inner.text.clone(),
            flags: inner.flags,
            viewport_offset: inner.viewport_offset,
            viewport_count: inner.viewport_count,
            sorts: inner.sorts.clone(),
            requests: inner.requests.clone(),
        }
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable copy of a [`SearchState`] taken at send time
#[derive(Debug, Clone)]
pub(crate) struct SearchSnapshot {
    pub text: Vec<u8>,
    pub flags: SearchFlags,
    pub viewport_offset: u64,
    pub viewport_count: u64,
    pub sorts: Vec<SortEntry>,
    pub requests: Vec<PropertyRequest>,
}

impl SearchSnapshot {
    /// Encode the search request payload: flags, text, viewport, sort list,
    /// property-request list.
    ///
    /// The viewport is written wide (64-bit); `WIDE_TOTALS` is always set so
    /// the daemon knows the client reads wide replies.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.text.len());
        let flags = self.flags | SearchFlags::WIDE_TOTALS;
        buf.extend_from_slice(&flags.bits().to_le_bytes());
        write_pstring(&mut buf, &self.text);
        buf.extend_from_slice(&self.viewport_offset.to_le_bytes());
        buf.extend_from_slice(&self.viewport_count.to_le_bytes());

        write_vlq(&mut buf, self.sorts.len() as u64);
        for sort in &self.sorts {
            buf.extend_from_slice(&sort.property_id.to_le_bytes());
            buf.extend_from_slice(&sort.flags.to_le_bytes());
        }

        write_vlq(&mut buf, self.requests.len() as u64);
        for req in &self.requests {
            buf.extend_from_slice(&req.property_id.to_le_bytes());
            buf.extend_from_slice(&req.flags.bits().to_le_bytes());
        }
        buf
    }
}
