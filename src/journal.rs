//! Change-journal streaming.
//!
//! The read-journal request never terminates: the daemon keeps appending
//! chained messages, one change record at a time. Each record is a type byte
//! followed by exactly the fields the caller's mask selected, in a fixed
//! order; move records additionally carry the old path and name. The caller's
//! callback decides whether to keep reading.

use crate::error::{Error, Result};
use crate::protocol::codec::WireRead;
use crate::protocol::stream::ResponseStream;
use crate::protocol::SIZE_UNKNOWN;
use bitflags::bitflags;

/// FILE_ATTRIBUTE_DIRECTORY, corrected from the record type
const ATTR_DIRECTORY: u32 = 0x10;

/// Name or path length past this is a desynchronized stream
const MAX_STRING_LEN: u64 = 1 << 20;

bitflags! {
    /// Selects which fields each journal record carries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct JournalFields: u32 {
        const CHANGE_ID = 1 << 0;
        /// When the journal recorded the change
        const TIMESTAMP = 1 << 1;
        /// When the item itself changed
        const ITEM_TIMESTAMP = 1 << 2;
        const PATH = 1 << 3;
        const NAME = 1 << 4;
        /// Previous path; present on move records only
        const OLD_PATH = 1 << 5;
        /// Previous name; present on move records only
        const OLD_NAME = 1 << 6;
        const SIZE = 1 << 7;
        const DATE_CREATED = 1 << 8;
        const DATE_ACCESSED = 1 << 9;
        const DATE_MODIFIED = 1 << 10;
        const ATTRIBUTES = 1 << 11;
        const PARENT_DATE_MODIFIED = 1 << 12;
        const OLD_PARENT_DATE_MODIFIED = 1 << 13;
    }
}

/// Kind of change a journal record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalChangeType {
    FileCreated = 0,
    FolderCreated = 1,
    FileModified = 2,
    FolderModified = 3,
    FileMoved = 4,
    FolderMoved = 5,
    FileDeleted = 6,
    FolderDeleted = 7,
}

impl JournalChangeType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        use JournalChangeType::*;
        Some(match tag {
            0 => FileCreated,
            1 => FolderCreated,
            2 => FileModified,
            3 => FolderModified,
            4 => FileMoved,
            5 => FolderMoved,
            6 => FileDeleted,
            7 => FolderDeleted,
            _ => return None,
        })
    }

    pub fn is_folder(&self) -> bool {
        use JournalChangeType::*;
        matches!(self, FolderCreated | FolderModified | FolderMoved | FolderDeleted)
    }

    pub fn is_move(&self) -> bool {
        use JournalChangeType::*;
        matches!(self, FileMoved | FolderMoved)
    }
}

/// One decoded change record; unselected fields are `None`
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub change_type: JournalChangeType,
    pub change_id: Option<u64>,
    pub timestamp: Option<u64>,
    pub item_timestamp: Option<u64>,
    pub path: Option<String>,
    pub name: Option<String>,
    pub old_path: Option<String>,
    pub old_name: Option<String>,
    pub size: Option<u64>,
    pub date_created: Option<u64>,
    pub date_accessed: Option<u64>,
    pub date_modified: Option<u64>,
    pub attributes: Option<u32>,
    pub parent_date_modified: Option<u64>,
    pub old_parent_date_modified: Option<u64>,
}

/// Journal identity and bounds, from the journal-info request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalInfo {
    pub enabled: bool,
    pub journal_id: u64,
    pub first_change_id: u64,
    pub next_change_id: u64,
}

fn read_string(stream: &mut ResponseStream<'_>) -> Option<String> {
    let len = stream.read_vlq();
    if len > MAX_STRING_LEN {
        stream.mark_bad();
        return None;
    }
    let mut bytes = vec![0u8; len as usize];
    stream.read_exact_or_zero(&mut bytes);
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_masked_u64(stream: &mut ResponseStream<'_>, mask: JournalFields, field: JournalFields) -> Option<u64> {
    if !mask.contains(field) {
        return None;
    }
    match stream.read_u64() {
        SIZE_UNKNOWN => None,
        v => Some(v),
    }
}

fn read_record(
    stream: &mut ResponseStream<'_>,
    change_type: JournalChangeType,
    mask: JournalFields,
) -> JournalRecord {
    let change_id = read_masked_u64(stream, mask, JournalFields::CHANGE_ID);
    let timestamp = read_masked_u64(stream, mask, JournalFields::TIMESTAMP);
    let item_timestamp = read_masked_u64(stream, mask, JournalFields::ITEM_TIMESTAMP);

    let path = mask.contains(JournalFields::PATH).then(|| read_string(stream)).flatten();
    let name = mask.contains(JournalFields::NAME).then(|| read_string(stream)).flatten();
    let wants_old = change_type.is_move();
    let old_path = (wants_old && mask.contains(JournalFields::OLD_PATH))
        .then(|| read_string(stream))
        .flatten();
    let old_name = (wants_old && mask.contains(JournalFields::OLD_NAME))
        .then(|| read_string(stream))
        .flatten();

    let size = read_masked_u64(stream, mask, JournalFields::SIZE);
    let date_created = read_masked_u64(stream, mask, JournalFields::DATE_CREATED);
    let date_accessed = read_masked_u64(stream, mask, JournalFields::DATE_ACCESSED);
    let date_modified = read_masked_u64(stream, mask, JournalFields::DATE_MODIFIED);

    let attributes = if mask.contains(JournalFields::ATTRIBUTES) {
        // the wire bit is unreliable for moves across folder boundaries;
        // the record type is authoritative
        let raw = stream.read_u32();
        Some(if change_type.is_folder() {
            raw | ATTR_DIRECTORY
        } else {
            raw & !ATTR_DIRECTORY
        })
    } else {
        None
    };

    let parent_date_modified = read_masked_u64(stream, mask, JournalFields::PARENT_DATE_MODIFIED);
    let old_parent_date_modified =
        read_masked_u64(stream, mask, JournalFields::OLD_PARENT_DATE_MODIFIED);

    JournalRecord {
        change_type,
        change_id,
        timestamp,
        item_timestamp,
        path,
        name,
        old_path,
        old_name,
        size,
        date_created,
        date_accessed,
        date_modified,
        attributes,
        parent_date_modified,
        old_parent_date_modified,
    }
}

/// Drive the journal stream until the callback stops it or the stream fails.
///
/// Returning `false` from the callback ends the read with
/// [`Error::Cancelled`]; the stream never ends on its own, so `Ok` is never
/// returned.
pub(crate) fn run(
    stream: &mut ResponseStream<'_>,
    mask: JournalFields,
    mut callback: impl FnMut(&JournalRecord) -> bool,
) -> Result<()> {
    loop {
        let tag = stream.read_u8();
        if let Some(err) = stream.take_error() {
            return Err(err);
        }
        let change_type = JournalChangeType::from_tag(tag).ok_or(Error::BadResponse)?;

        let record = read_record(stream, change_type, mask);
        if let Some(err) = stream.take_error() {
            return Err(err);
        }

        if !callback(&record) {
            return Err(Error::Cancelled);
        }
    }
}
