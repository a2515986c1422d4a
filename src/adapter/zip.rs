//! ZIP central-directory entries
//!
//! Archives only store full entry paths, and many omit explicit directory entries.
//! Listing a directory inside an archive means picking the records one level below
//! the prefix and synthesizing directories implied by deeper paths.

use std::collections::BTreeMap;

use crate::entry::RawEntry;

/// One central-directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipRecord {
    /// Full path inside the archive, `/` separated; directories end with `/`
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: i64,
}

/// Direct children of `prefix` (no leading slash, empty for the archive root)
pub fn children_of(records: &[ZipRecord], prefix: &str) -> Vec<RawEntry> {
    let prefix = prefix.trim_matches('/');
    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    };

    let mut children: BTreeMap<String, RawEntry> = BTreeMap::new();
    for record in records {
        let Some(rest) = record.name.strip_prefix(&prefix) else {
            continue;
        };
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            continue;
        }
        match rest.split_once('/') {
            // direct child directory, explicit or implied
            Some((dir, tail)) => {
                let explicit = tail.is_empty() && record.is_dir;
                let modified = if explicit { record.modified } else { 0 };
                children
                    .entry(dir.to_string())
                    .and_modify(|existing| {
                        if explicit {
                            existing.modified = modified;
                        }
                    })
                    .or_insert_with(|| readonly(RawEntry::directory(dir, modified)));
            }
            None if record.is_dir => {
                children
                    .entry(rest.to_string())
                    .or_insert_with(|| readonly(RawEntry::directory(rest, record.modified)));
            }
            None => {
                children.insert(
                    rest.to_string(),
                    readonly(RawEntry::file(rest, record.size, record.modified)),
                );
            }
        }
    }
    children.into_values().collect()
}

/// Record describing `path` itself, if the archive contains it or implies it
pub fn find(records: &[ZipRecord], path: &str) -> Option<RawEntry> {
    let path = path.trim_matches('/');
    let name = path.rsplit('/').next().unwrap_or(path);
    let as_dir = format!("{}/", path);
    for record in records {
        if record.name == path && !record.is_dir {
            return Some(readonly(RawEntry::file(name, record.size, record.modified)));
        }
        if record.name == as_dir {
            return Some(readonly(RawEntry::directory(name, record.modified)));
        }
    }
    records
        .iter()
        .any(|r| r.name.starts_with(&as_dir))
        .then(|| readonly(RawEntry::directory(name, 0)))
}

fn readonly(mut raw: RawEntry) -> RawEntry {
    raw.can_write = false;
    raw
}
