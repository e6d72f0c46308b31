//! Decoded result set and typed column access.
//!
//! A [`ResultList`] owns everything one search/sort/get-results reply
//! decoded to: the counts, the echoed sort and property-request metadata,
//! one fixed-size record per row inside the arena, and the sorted lookup
//! index. Column reads never block and never touch the transport; handles
//! and offsets are stable until the list is dropped.

pub(crate) mod decode;
mod index;

use crate::arena::{Arena, ArenaRef};
use crate::error::{Error, Result};
use crate::protocol::SIZE_UNKNOWN;
use crate::search::{PropertyRequestFlags, SortEntry};
use crate::variant::{self, PropertyValueType, PropertyVariant};
use std::borrow::Cow;

/// Row flag: this row is a folder
pub const ROW_FOLDER: u8 = 1 << 0;
/// Row flag: this row is a volume root
pub const ROW_ROOT: u8 = 1 << 1;

/// One echoed property request, with its resolved type and its slot offset
/// inside the per-row record
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRequest {
    pub property_id: u32,
    pub flags: PropertyRequestFlags,
    pub value_type: PropertyValueType,
    /// Byte offset of this property's slot (the record starts with one
    /// flags byte, so the first slot sits at offset 1)
    pub offset: usize,
}

/// A 32-bit fixed-point column value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoint {
    pub raw: i32,
    /// Decimal places: 1 or 2
    pub decimals: u8,
}

impl FixedPoint {
    pub fn to_f64(self) -> f64 {
        self.raw as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// One decoded result set
#[derive(Debug)]
pub struct ResultList {
    arena: Arena,
    folder_count: u64,
    file_count: u64,
    total_size: Option<u64>,
    viewport_offset: u64,
    viewport_count: u64,
    sorts: Vec<SortEntry>,
    requests: Vec<ResolvedRequest>,
    /// Positions into `requests`, sorted by (property-id, flags)
    index: Vec<u32>,
    rows: Vec<ArenaRef>,
    record_len: usize,
}

impl ResultList {
    pub fn folder_count(&self) -> u64 {
        self.folder_count
    }

    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Total byte size of all results; `None` unless the search requested it
    /// and the daemon knew it
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// The (offset, count) window the daemon materialized
    pub fn viewport(&self) -> (u64, u64) {
        (self.viewport_offset, self.viewport_count)
    }

    /// Rows in this list; always equals the echoed viewport count
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Echoed sort list
    pub fn sorts(&self) -> &[SortEntry] {
        &self.sorts
    }

    /// Echoed property requests with resolved types and slot offsets
    pub fn requests(&self) -> &[ResolvedRequest] {
        &self.requests
    }

    pub fn is_folder(&self, row: usize) -> Result<bool> {
        Ok(self.row_flags(row)? & ROW_FOLDER != 0)
    }

    pub fn is_root(&self, row: usize) -> Result<bool> {
        Ok(self.row_flags(row)? & ROW_ROOT != 0)
    }

    fn row_flags(&self, row: usize) -> Result<u8> {
        let r = *self.rows.get(row).ok_or(Error::InvalidParameter)?;
        Ok(self.arena.get(r, 1)[0])
    }

    /// Find the echoed request for (property, flags); O(log P)
    pub fn lookup(&self, property_id: u32, flags: PropertyRequestFlags) -> Result<&ResolvedRequest> {
        index::find(&self.index, (property_id, flags.bits()), |p| {
            let req = &self.requests[p as usize];
            (req.property_id, req.flags.bits())
        })
        .map(|p| &self.requests[p as usize])
        .ok_or(Error::NotFound)
    }

    /// Borrow one slot's bytes
    fn slot(&self, row: usize, req: &ResolvedRequest) -> Result<&[u8]> {
        let r = *self.rows.get(row).ok_or(Error::InvalidParameter)?;
        let record = self.arena.get(r, self.record_len);
        Ok(&record[req.offset..req.offset + req.value_type.slot_width()])
    }

    fn typed_slot(
        &self,
        row: usize,
        property_id: u32,
        flags: PropertyRequestFlags,
        want: &[PropertyValueType],
    ) -> Result<(&ResolvedRequest, &[u8])> {
        let req = self.lookup(property_id, flags)?;
        if !want.contains(&req.value_type) {
            return Err(Error::InvalidPropertyValueType);
        }
        Ok((req, self.slot(row, req)?))
    }

    fn pooled_ref(slot: &[u8]) -> ArenaRef {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(slot);
        ArenaRef::from_raw(u64::from_le_bytes(raw))
    }

    pub fn property_u8(&self, row: usize, property_id: u32) -> Result<u8> {
        let (_, s) =
            self.typed_slot(row, property_id, PropertyRequestFlags::empty(), &[PropertyValueType::Byte])?;
        Ok(s[0])
    }

    pub fn property_u16(&self, row: usize, property_id: u32) -> Result<u16> {
        let (_, s) =
            self.typed_slot(row, property_id, PropertyRequestFlags::empty(), &[PropertyValueType::Word])?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    pub fn property_u32(&self, row: usize, property_id: u32) -> Result<u32> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::Dword, PropertyValueType::DwordText],
        )?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub fn property_u64(&self, row: usize, property_id: u32) -> Result<u64> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::UInt64],
        )?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(s);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn property_u128(&self, row: usize, property_id: u32) -> Result<u128> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::UInt128],
        )?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(s);
        Ok(u128::from_le_bytes(raw))
    }

    /// Width and height of a dimensions column
    pub fn property_dimensions(&self, row: usize, property_id: u32) -> Result<(u32, u32)> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::Dimensions],
        )?;
        Ok((
            u32::from_le_bytes([s[0], s[1], s[2], s[3]]),
            u32::from_le_bytes([s[4], s[5], s[6], s[7]]),
        ))
    }

    /// Size column; `None` when the daemon reported it unknown
    pub fn property_size(&self, row: usize, property_id: u32) -> Result<Option<u64>> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::Size],
        )?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(s);
        match u64::from_le_bytes(raw) {
            SIZE_UNKNOWN => Ok(None),
            v => Ok(Some(v)),
        }
    }

    pub fn property_fixed_point(&self, row: usize, property_id: u32) -> Result<FixedPoint> {
        let (req, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::FixedPoint10, PropertyValueType::FixedPoint100],
        )?;
        let raw = i32::from_le_bytes([s[0], s[1], s[2], s[3]]);
        let decimals = if req.value_type == PropertyValueType::FixedPoint10 { 1 } else { 2 };
        Ok(FixedPoint { raw, decimals })
    }

    /// Blob column; `None` for an absent value
    pub fn property_blob(&self, row: usize, property_id: u32) -> Result<Option<&[u8]>> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::Blob8, PropertyValueType::Blob16],
        )?;
        Ok(self.arena.pstring(Self::pooled_ref(s)))
    }

    /// Generic variant column, decoded on access
    pub fn property_variant(&self, row: usize, property_id: u32) -> Result<PropertyVariant> {
        let (_, s) = self.typed_slot(
            row,
            property_id,
            PropertyRequestFlags::empty(),
            &[PropertyValueType::Variant],
        )?;
        let r = Self::pooled_ref(s);
        if r.is_null() {
            return Ok(PropertyVariant::Null);
        }
        variant::decode(self.arena.tail(r))
    }

    /// Text column: a property resolved as a string, or any property
    /// requested with FORMAT/HIGHLIGHT. `flags` must match the flags the
    /// property was requested with; `None` for an absent value (distinct
    /// from an empty string).
    pub fn property_string(
        &self,
        row: usize,
        property_id: u32,
        flags: PropertyRequestFlags,
    ) -> Result<Option<Cow<'_, str>>> {
        let (_, s) = self.typed_slot(row, property_id, flags, &[PropertyValueType::PString])?;
        Ok(self
            .arena
            .pstring(Self::pooled_ref(s))
            .map(String::from_utf8_lossy))
    }

    /// Copy a string column into `dst`, returning the byte length written.
    /// A too-small buffer still receives the truncated prefix and fails with
    /// [`Error::InsufficientBuffer`].
    pub fn property_string_into(
        &self,
        row: usize,
        property_id: u32,
        flags: PropertyRequestFlags,
        dst: &mut [u8],
    ) -> Result<usize> {
        let (_, s) = self.typed_slot(row, property_id, flags, &[PropertyValueType::PString])?;
        let bytes = self.arena.pstring(Self::pooled_ref(s)).unwrap_or(&[]);
        let n = bytes.len().min(dst.len());
        dst[..n].copy_from_slice(&bytes[..n]);
        if n < bytes.len() {
            return Err(Error::InsufficientBuffer);
        }
        Ok(n)
    }
}
