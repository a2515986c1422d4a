//! ZIP archive backend (read-only)
//!
//! `zip:///home/me/photos.zip/2024/beach.jpg` addresses `2024/beach.jpg` inside
//! `/home/me/photos.zip`. The archive part ends at the first segment that is a regular
//! file on disk or whose name ends in `.zip`.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;
use zip::ZipArchive;

use crate::adapter::zip::{children_of, find, ZipRecord};
use crate::capability::{Describable, Editable, Listable, ReadStream, WriteStream};
use crate::entry::{Entry, RawEntry};
use crate::error::{FsError, FsResult};
use crate::listing::MergePolicy;
use crate::uri::{FileUri, Scheme};

/// Archive on disk plus the path inside it
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArchivePath {
    archive: PathBuf,
    /// No leading or trailing slash, empty for the archive root
    inner: String,
}

impl ArchivePath {
    fn parse(uri: &FileUri) -> FsResult<Self> {
        if uri.scheme()? != Scheme::Zip {
            return Err(FsError::InvalidUri(format!("not a zip URI: {}", uri)));
        }
        let mut full = String::new();
        if let Some(host) = uri.host().filter(|h| !h.is_empty()) {
            full.push('/');
            full.push_str(host);
        }
        full.push_str(&uri.path());

        let segments: Vec<&str> = full.split('/').filter(|s| !s.is_empty()).collect();
        let mut archive = PathBuf::from("/");
        for (i, segment) in segments.iter().enumerate() {
            archive.push(segment);
            if segment.to_lowercase().ends_with(".zip") || archive.is_file() {
                return Ok(Self {
                    archive,
                    inner: segments[i + 1..].join("/"),
                });
            }
        }
        Err(FsError::InvalidUri(format!("no archive in {}", uri)))
    }
}

fn zip_error(archive: &std::path::Path, e: zip::result::ZipError) -> FsError {
    match e {
        zip::result::ZipError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            FsError::FileNotFound(archive.display().to_string())
        }
        zip::result::ZipError::Io(io) => FsError::Io(io),
        zip::result::ZipError::FileNotFound => FsError::FileNotFound(archive.display().to_string()),
        other => FsError::Protocol(format!("{}: {}", archive.display(), other)),
    }
}

fn open_archive(path: &std::path::Path) -> FsResult<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FsError::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.display().to_string()),
        _ => FsError::Io(e),
    })?;
    ZipArchive::new(file).map_err(|e| zip_error(path, e))
}

fn modified_millis(stamp: Option<zip::DateTime>) -> i64 {
    stamp
        .and_then(|dt| {
            NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?.and_hms_opt(
                dt.hour() as u32,
                dt.minute() as u32,
                dt.second() as u32,
            )
        })
        .map(|stamp| stamp.and_utc().timestamp_millis())
        .unwrap_or(0)
}

fn read_records(path: &std::path::Path) -> FsResult<Vec<ZipRecord>> {
    let mut archive = open_archive(path)?;
    let mut records = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(|e| zip_error(path, e))?;
        records.push(ZipRecord {
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            size: file.size(),
            modified: modified_millis(file.last_modified()),
        });
    }
    Ok(records)
}

async fn blocking<T, F>(f: F) -> FsResult<T>
where
    F: FnOnce() -> FsResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FsError::Protocol(format!("blocking task failed: {}", e)))?
}

/// `zip://` URIs
#[derive(Debug, Default, Clone)]
pub struct ZipBackend;

impl ZipBackend {
    pub fn new() -> Self {
        Self
    }

    fn read_only(uri: &FileUri) -> FsError {
        FsError::Unsupported(format!("zip archives are read-only: {}", uri))
    }

    async fn lookup(&self, uri: &FileUri) -> FsResult<Option<RawEntry>> {
        let location = ArchivePath::parse(uri)?;
        blocking(move || {
            if location.inner.is_empty() {
                let metadata = std::fs::metadata(&location.archive)
                    .map_err(|_| FsError::FileNotFound(location.archive.display().to_string()))?;
                let name = location
                    .archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let modified = metadata
                    .modified()
                    .map(crate::adapter::local::epoch_millis)
                    .unwrap_or(0);
                let mut raw = RawEntry::directory(name, modified);
                raw.can_write = false;
                return Ok(Some(raw));
            }
            let records = read_records(&location.archive)?;
            Ok(find(&records, &location.inner))
        })
        .await
    }
}

#[async_trait]
impl Listable for ZipBackend {
    async fn list(&self, dir: &FileUri) -> FsResult<Vec<Entry>> {
        let location = ArchivePath::parse(dir)?;
        debug!("Listing {:?} inside {}", location.inner, location.archive.display());
        let children = blocking(move || {
            let records = read_records(&location.archive)?;
            let children = children_of(&records, &location.inner);
            if children.is_empty() && !location.inner.is_empty() && find(&records, &location.inner).is_none() {
                return Err(FsError::FileNotFound(location.inner.clone()));
            }
            Ok(children)
        })
        .await?;

        let dir = dir.normalized();
        Ok(children
            .into_iter()
            .map(|raw| {
                let uri = dir.join(&raw.name);
                Entry::from_raw(raw, uri, false, None)
            })
            .collect())
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::SeparateThenConcat
    }
}

#[async_trait]
impl Editable for ZipBackend {
    async fn open_read(&self, uri: &FileUri, offset: u64) -> FsResult<ReadStream> {
        let location = ArchivePath::parse(uri)?;
        let data = blocking(move || {
            let mut archive = open_archive(&location.archive)?;
            let mut file = archive
                .by_name(&location.inner)
                .map_err(|_| FsError::FileNotFound(location.inner.clone()))?;
            if file.is_dir() {
                return Err(FsError::FileNotFound(format!("{} is a directory", location.inner)));
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            Ok(data)
        })
        .await?;
        let start = (offset as usize).min(data.len());
        let mut cursor = Cursor::new(data);
        cursor.set_position(start as u64);
        Ok(Box::pin(cursor))
    }

    async fn open_write(&self, uri: &FileUri) -> FsResult<WriteStream> {
        Err(Self::read_only(uri))
    }

    async fn delete(&self, uri: &FileUri) -> FsResult<()> {
        Err(Self::read_only(uri))
    }

    async fn make_dir(&self, uri: &FileUri) -> FsResult<()> {
        Err(Self::read_only(uri))
    }

    async fn rename(&self, uri: &FileUri, _new_name: &str) -> FsResult<()> {
        Err(Self::read_only(uri))
    }

    async fn move_to(&self, uri: &FileUri, _target: &FileUri) -> FsResult<()> {
        Err(Self::read_only(uri))
    }

    async fn exists(&self, uri: &FileUri) -> FsResult<bool> {
        match self.lookup(uri).await {
            Ok(found) => Ok(found.is_some()),
            Err(FsError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Describable for ZipBackend {
    async fn describe(&self, uri: &FileUri) -> FsResult<Entry> {
        let raw = self
            .lookup(uri)
            .await?
            .ok_or_else(|| FsError::FileNotFound(uri.to_string()))?;
        Ok(Entry::from_raw(raw, uri.normalized(), false, None))
    }
}
