//! Sorted index over the echoed property-request list.
//!
//! The decoder builds an array of positions into the request list and sorts
//! it by (property-id, flags) with an explicit merge sort: stable and
//! deterministic, so duplicate keys keep their request order and lookups can
//! binary-search the result.

use std::cmp::Ordering;

/// Sort key for one request-list entry
pub(crate) type PropertyKey = (u32, u32);

/// Stable merge sort of `positions` by the key each position maps to
pub(crate) fn sort_positions(positions: &mut [u32], key_of: impl Fn(u32) -> PropertyKey) {
    let mut scratch = positions.to_vec();
    merge_sort(positions, &mut scratch, &key_of);
}

fn merge_sort(items: &mut [u32], scratch: &mut [u32], key_of: &impl Fn(u32) -> PropertyKey) {
    let len = items.len();
    if len <= 1 {
        return;
    }
    let mid = len / 2;
    merge_sort(&mut items[..mid], &mut scratch[..mid], key_of);
    merge_sort(&mut items[mid..], &mut scratch[mid..], key_of);

    let (mut left, mut right, mut out) = (0, mid, 0);
    while left < mid && right < len {
        // <= keeps the left run first for equal keys
        if key_of(items[left]) <= key_of(items[right]) {
            scratch[out] = items[left];
            left += 1;
        } else {
            scratch[out] = items[right];
            right += 1;
        }
        out += 1;
    }
    scratch[out..out + (mid - left)].copy_from_slice(&items[left..mid]);
    let out = out + (mid - left);
    scratch[out..out + (len - right)].copy_from_slice(&items[right..len]);
    items.copy_from_slice(&scratch[..len]);
}

/// Binary search the sorted positions for `key`; returns the position of the
/// first matching entry
pub(crate) fn find(
    positions: &[u32],
    key: PropertyKey,
    key_of: impl Fn(u32) -> PropertyKey,
) -> Option<u32> {
    let mut lo = 0usize;
    let mut hi = positions.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match key_of(positions[mid]).cmp(&key) {
            Ordering::Less => lo = mid + 1,
            _ => hi = mid,
        }
    }
    if lo < positions.len() && key_of(positions[lo]) == key {
        Some(positions[lo])
    } else {
        None
    }
}
