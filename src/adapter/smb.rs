//! SMB directory records
//!
//! SMB2 `QUERY_DIRECTORY` responses carry Windows attribute bits and FILETIME stamps.

use super::is_dot_entry;
use crate::entry::{RawEntry, RawKind};

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0001;
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0002;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0010;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0400;

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// One entry of a directory query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbDirectoryRecord {
    pub file_name: String,
    pub file_attributes: u32,
    pub end_of_file: u64,
    /// Windows FILETIME
    pub last_write_time: u64,
}

pub fn from_record(record: SmbDirectoryRecord) -> Option<RawEntry> {
    if is_dot_entry(&record.file_name) {
        return None;
    }
    let attributes = record.file_attributes;
    let kind = if attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
        RawKind::Symlink { target: None }
    } else if attributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
        RawKind::Directory
    } else {
        RawKind::File
    };
    Some(RawEntry {
        name: record.file_name,
        kind,
        size: record.end_of_file,
        modified: filetime_to_millis(record.last_write_time),
        can_read: true,
        can_write: attributes & FILE_ATTRIBUTE_READONLY == 0,
    })
}

pub fn filetime_to_millis(filetime: u64) -> i64 {
    if filetime <= FILETIME_UNIX_EPOCH {
        return 0;
    }
    ((filetime - FILETIME_UNIX_EPOCH) / 10_000) as i64
}
