//! Sort orders and directory/file merge policies

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;

/// Sort order for directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    UriAsc,
    UriDesc,
    #[default]
    NameAsc,
    NameDesc,
    SizeAsc,
    SizeDesc,
    DateAsc,
    DateDesc,
}

/// Sort key family of a [`SortOrder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Uri,
    Name,
    Size,
    Date,
}

impl SortOrder {
    pub const ALL: [SortOrder; 8] = [
        SortOrder::UriAsc,
        SortOrder::UriDesc,
        SortOrder::NameAsc,
        SortOrder::NameDesc,
        SortOrder::SizeAsc,
        SortOrder::SizeDesc,
        SortOrder::DateAsc,
        SortOrder::DateDesc,
    ];

    pub fn key(&self) -> SortKey {
        match self {
            SortOrder::UriAsc | SortOrder::UriDesc => SortKey::Uri,
            SortOrder::NameAsc | SortOrder::NameDesc => SortKey::Name,
            SortOrder::SizeAsc | SortOrder::SizeDesc => SortKey::Size,
            SortOrder::DateAsc | SortOrder::DateDesc => SortKey::Date,
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(
            self,
            SortOrder::UriDesc | SortOrder::NameDesc | SortOrder::SizeDesc | SortOrder::DateDesc
        )
    }

    /// Compare two entries under this order
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        let ordering = match self.key() {
            SortKey::Uri => compare_ignore_case(a.uri().as_str(), b.uri().as_str()),
            SortKey::Name => compare_ignore_case(a.name(), b.name()),
            // Sizes of directories are meaningless, fall back to the URI.
            SortKey::Size if a.is_directory() => {
                compare_ignore_case(a.uri().as_str(), b.uri().as_str())
            }
            SortKey::Size => a.size().cmp(&b.size()),
            SortKey::Date => a.modified().cmp(&b.modified()),
        };
        if self.is_descending() {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// How a backend combines directories and files into one listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Sort each group on its own, directories first
    SeparateThenConcat,
    /// Name/date interleave both groups, size lists files before directories,
    /// URI behaves like `SeparateThenConcat`
    Unified,
}

/// Order `directories` and `files` into the delivered listing
pub fn arrange(
    mut directories: Vec<Entry>,
    mut files: Vec<Entry>,
    order: SortOrder,
    policy: MergePolicy,
) -> Vec<Entry> {
    let cmp = |a: &Entry, b: &Entry| order.compare(a, b);

    let separate = |mut dirs: Vec<Entry>, mut files: Vec<Entry>| {
        dirs.sort_by(cmp);
        files.sort_by(cmp);
        dirs.extend(files);
        dirs
    };

    match (policy, order.key()) {
        (MergePolicy::SeparateThenConcat, _) | (MergePolicy::Unified, SortKey::Uri) => {
            separate(directories, files)
        }
        (MergePolicy::Unified, SortKey::Name) | (MergePolicy::Unified, SortKey::Date) => {
            directories.append(&mut files);
            directories.sort_by(cmp);
            directories
        }
        (MergePolicy::Unified, SortKey::Size) => {
            files.sort_by(cmp);
            directories.sort_by(cmp);
            files.append(&mut directories);
            files
        }
    }
}
