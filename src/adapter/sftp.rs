//! SFTP file attributes

use russh_sftp::protocol::FileAttributes;

use crate::entry::{RawEntry, RawKind};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

pub fn from_attributes(name: impl Into<String>, attrs: &FileAttributes) -> RawEntry {
    from_mode(name, attrs.size, attrs.mtime, attrs.permissions)
}

/// Build a record from the raw SFTP attribute fields; `mtime` is in seconds
pub fn from_mode(
    name: impl Into<String>,
    size: Option<u64>,
    mtime: Option<u32>,
    permissions: Option<u32>,
) -> RawEntry {
    let kind = match permissions.map(|p| p & S_IFMT) {
        Some(S_IFDIR) => RawKind::Directory,
        Some(S_IFLNK) => RawKind::Symlink { target: None },
        _ => RawKind::File,
    };
    RawEntry {
        name: name.into(),
        kind,
        size: size.unwrap_or(0),
        modified: mtime.map(|t| t as i64 * 1000).unwrap_or(0),
        can_read: true,
        can_write: true,
    }
    .with_mode(permissions)
}
