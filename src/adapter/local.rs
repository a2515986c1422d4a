//! Local filesystem metadata

use std::fs::Metadata;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::entry::{RawEntry, RawKind};

/// Convert metadata obtained with `symlink_metadata`
pub fn from_metadata(name: impl Into<String>, metadata: &Metadata) -> RawEntry {
    let kind = if metadata.file_type().is_symlink() {
        RawKind::Symlink { target: None }
    } else if metadata.is_dir() {
        RawKind::Directory
    } else {
        RawKind::File
    };
    RawEntry {
        name: name.into(),
        kind,
        size: metadata.len(),
        modified: metadata.modified().map(epoch_millis).unwrap_or(0),
        can_read: true,
        can_write: !metadata.permissions().readonly(),
    }
}

pub(crate) fn epoch_millis(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}
