//! Common entry representation
//!
//! Backends produce [`RawEntry`] records from their native metadata; the listing and
//! describe paths turn those into immutable [`Entry`] values.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::uri::FileUri;

/// Classification of a raw directory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawKind {
    File,
    Directory,
    /// Link whose target still has to be classified
    Symlink { target: Option<String> },
}

/// Final classification of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// Protocol-neutral metadata as handed over by a backend entry adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub kind: RawKind,
    pub size: u64,
    /// Epoch millis, 0 if unknown
    pub modified: i64,
    pub can_read: bool,
    pub can_write: bool,
}

impl RawEntry {
    pub fn file(name: impl Into<String>, size: u64, modified: i64) -> Self {
        Self {
            name: name.into(),
            kind: RawKind::File,
            size,
            modified,
            can_read: true,
            can_write: true,
        }
    }

    pub fn directory(name: impl Into<String>, modified: i64) -> Self {
        Self {
            name: name.into(),
            kind: RawKind::Directory,
            size: 0,
            modified,
            can_read: true,
            can_write: true,
        }
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, RawKind::Symlink { .. })
    }

    /// Map a POSIX mode to read/write flags for the owner
    pub fn with_mode(mut self, mode: Option<u32>) -> Self {
        if let Some(mode) = mode {
            self.can_read = mode & 0o400 != 0;
            self.can_write = mode & 0o200 != 0;
        }
        self
    }
}

/// Child counts of a directory, reported by the local supplemental pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildCounts {
    pub files: u32,
    pub directories: u32,
}

/// One file or directory inside a listing snapshot
///
/// Two entries are equal when their canonical URIs are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    name: String,
    uri: FileUri,
    kind: EntryKind,
    size: u64,
    modified: i64,
    can_read: bool,
    can_write: bool,
    remote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    children: Option<ChildCounts>,
}

impl Entry {
    /// Build an entry located at `uri`.
    ///
    /// `link_target` is the classification of a symlink's target, resolved one hop by the
    /// caller. Links whose target could not be resolved are treated as files.
    pub fn from_raw(raw: RawEntry, uri: FileUri, remote: bool, link_target: Option<EntryKind>) -> Self {
        let kind = match raw.kind {
            RawKind::File => EntryKind::File,
            RawKind::Directory => EntryKind::Directory,
            RawKind::Symlink { .. } => link_target.unwrap_or(EntryKind::File),
        };
        Self {
            name: raw.name,
            uri,
            kind,
            size: if kind == EntryKind::Directory { 0 } else { raw.size },
            modified: raw.modified.max(0),
            can_read: raw.can_read,
            can_write: raw.can_write,
            remote,
            children: None,
        }
    }

    /// Copy of this entry carrying child counts
    pub fn with_children(&self, counts: ChildCounts) -> Self {
        Self {
            children: Some(counts),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &FileUri {
        &self.uri
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> i64 {
        self.modified
    }

    pub fn can_read(&self) -> bool {
        self.can_read
    }

    pub fn can_write(&self) -> bool {
        self.can_write
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn children(&self) -> Option<ChildCounts> {
        self.children
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}
