//! Reply-stream to [`ResultList`] decoding.
//!
//! The pass reads the whole reply in order: capability word, counts, echoed
//! viewport, echoed sort list, echoed property requests (assigning each its
//! slot offset as a running total), then one fixed-size record per row.
//! Decode failures are recorded on the stream and checked once by the caller
//! via `ResponseStream::finish`; a partially built list is discarded there.

use crate::arena::{Arena, ArenaRef};
use crate::protocol::codec::{write_vlq, WireRead};
use crate::protocol::stream::ResponseStream;
use crate::protocol::CAP_WIDE_SIZES;
use crate::result::{index, ResolvedRequest, ResultList};
use crate::search::{PropertyRequestFlags, SortEntry};
use crate::variant::{self, PropertyValueType};
use tracing::trace;

/// Sanity bounds; anything past these is a desynchronized stream
const MAX_LIST_ENTRIES: u64 = 1 << 16;
const MAX_ROWS: u64 = 1 << 24;
const MAX_POOLED_LEN: u64 = 16 * 1024 * 1024;

/// Decode one search/sort/get-results reply.
///
/// `total_size_requested` mirrors the TOTAL_SIZE request flag: the size
/// field is only present on the wire when it was asked for.
pub(crate) fn decode_result_list(
    stream: &mut ResponseStream<'_>,
    total_size_requested: bool,
) -> ResultList {
    let caps = stream.read_u32();
    stream.set_wide(caps & CAP_WIDE_SIZES != 0);

    let folder_count = stream.read_size();
    let file_count = stream.read_size();
    let total_size = if total_size_requested {
        match stream.read_size() {
            crate::protocol::SIZE_UNKNOWN => None,
            v => Some(v),
        }
    } else {
        None
    };

    let viewport_offset = stream.read_size();
    let echoed_count = stream.read_size();
    let viewport_count = bounded(stream, echoed_count, MAX_ROWS);

    let sorts = read_sorts(stream);
    let requests = read_requests(stream);
    let record_len = 1 + requests.iter().map(|r| r.value_type.slot_width()).sum::<usize>();

    let mut positions: Vec<u32> = (0..requests.len() as u32).collect();
    index::sort_positions(&mut positions, |p| {
        let req = &requests[p as usize];
        (req.property_id, req.flags.bits())
    });

    trace!(
        rows = viewport_count,
        properties = requests.len(),
        record_len,
        wide = stream.is_wide(),
        "result header decoded"
    );

    let mut arena = Arena::new();
    let mut scratch = Vec::new();
    let mut rows = Vec::with_capacity(viewport_count as usize);
    for _ in 0..viewport_count {
        rows.push(read_row(stream, &mut arena, &requests, record_len, &mut scratch));
        if stream.error().is_some() {
            break;
        }
    }

    ResultList {
        arena,
        folder_count,
        file_count,
        total_size,
        viewport_offset,
        viewport_count,
        sorts,
        requests,
        index: positions,
        rows,
        record_len,
    }
}

/// Clamp a wire count to a sanity bound, recording a desync past it
fn bounded(stream: &mut ResponseStream<'_>, value: u64, max: u64) -> u64 {
    if value > max {
        stream.mark_bad();
        0
    } else {
        value
    }
}

fn read_sorts(stream: &mut ResponseStream<'_>) -> Vec<SortEntry> {
    let count = stream.read_vlq();
    let count = bounded(stream, count, MAX_LIST_ENTRIES);
    let mut sorts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let property_id = stream.read_u32();
        let flags = stream.read_u32();
        sorts.push(SortEntry { property_id, flags });
    }
    sorts
}

fn read_requests(stream: &mut ResponseStream<'_>) -> Vec<ResolvedRequest> {
    let count = stream.read_vlq();
    let count = bounded(stream, count, MAX_LIST_ENTRIES);
    let mut requests = Vec::with_capacity(count as usize);
    // the record starts with one flags byte
    let mut offset = 1usize;
    for _ in 0..count {
        let property_id = stream.read_u32();
        let flags = PropertyRequestFlags::from_bits_truncate(stream.read_u32());
        let tag = stream.read_u8();
        let mut value_type = match PropertyValueType::from_tag(tag) {
            Some(vt) => vt,
            None => {
                stream.mark_bad();
                PropertyValueType::Byte
            }
        };
        // formatted and highlighted values always arrive as rendered text
        if flags.intersects(PropertyRequestFlags::FORMAT | PropertyRequestFlags::HIGHLIGHT) {
            value_type = PropertyValueType::PString;
        }
        requests.push(ResolvedRequest { property_id, flags, value_type, offset });
        offset += value_type.slot_width();
    }
    requests
}

/// Read one pooled length-prefixed payload (string or blob). Zero length is
/// the absent value and pools nothing.
fn read_pooled(
    stream: &mut ResponseStream<'_>,
    arena: &mut Arena,
    scratch: &mut Vec<u8>,
    len: u64,
) -> ArenaRef {
    if len == 0 {
        return ArenaRef::NULL;
    }
    if len > MAX_POOLED_LEN {
        stream.mark_bad();
        return ArenaRef::NULL;
    }
    scratch.clear();
    write_vlq(scratch, len);
    let prefix = scratch.len();
    scratch.resize(prefix + len as usize, 0);
    stream.read_exact_or_zero(&mut scratch[prefix..]);
    arena.alloc_copy(scratch)
}

fn read_row(
    stream: &mut ResponseStream<'_>,
    arena: &mut Arena,
    requests: &[ResolvedRequest],
    record_len: usize,
    scratch: &mut Vec<u8>,
) -> ArenaRef {
    let record = arena.alloc(record_len);

    let row_flags = stream.read_u8();
    arena.get_mut(record, 1)[0] = row_flags;

    // values arrive in original request order
    for req in requests {
        let mut slot_val = [0u8; 16];
        let width = req.value_type.slot_width();
        match req.value_type {
            PropertyValueType::Byte => slot_val[0] = stream.read_u8(),
            PropertyValueType::Word => {
                slot_val[..2].copy_from_slice(&stream.read_u16().to_le_bytes())
            }
            PropertyValueType::Dword
            | PropertyValueType::DwordText
            | PropertyValueType::FixedPoint10
            | PropertyValueType::FixedPoint100 => {
                slot_val[..4].copy_from_slice(&stream.read_u32().to_le_bytes())
            }
            PropertyValueType::UInt64 => {
                slot_val[..8].copy_from_slice(&stream.read_u64().to_le_bytes())
            }
            PropertyValueType::UInt128 => stream.read_exact_or_zero(&mut slot_val),
            PropertyValueType::Dimensions => {
                slot_val[..4].copy_from_slice(&stream.read_u32().to_le_bytes());
                slot_val[4..8].copy_from_slice(&stream.read_u32().to_le_bytes());
            }
            PropertyValueType::Size => {
                slot_val[..8].copy_from_slice(&stream.read_size().to_le_bytes())
            }
            PropertyValueType::Blob8 => {
                let len = stream.read_u8() as u64;
                let r = read_pooled(stream, arena, scratch, len);
                slot_val[..8].copy_from_slice(&r.to_raw().to_le_bytes());
            }
            PropertyValueType::Blob16 => {
                let len = stream.read_u16() as u64;
                let r = read_pooled(stream, arena, scratch, len);
                slot_val[..8].copy_from_slice(&r.to_raw().to_le_bytes());
            }
            PropertyValueType::PString => {
                let len = stream.read_vlq();
                let r = read_pooled(stream, arena, scratch, len);
                slot_val[..8].copy_from_slice(&r.to_raw().to_le_bytes());
            }
            PropertyValueType::Variant => {
                scratch.clear();
                variant::copy_wire(stream, scratch);
                let r = arena.alloc_copy(scratch);
                slot_val[..8].copy_from_slice(&r.to_raw().to_le_bytes());
            }
        }
        arena
            .get_mut(record, record_len)[req.offset..req.offset + width]
            .copy_from_slice(&slot_val[..width]);
    }
    record
}
