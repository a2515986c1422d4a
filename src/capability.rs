//! Capability traits implemented by every backend
//!
//! A backend is whatever can list, edit and describe URIs of its scheme. The factory in
//! [`crate::backend`] hands out trait objects of these capabilities.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::entry::{ChildCounts, Entry};
use crate::error::{FsError, FsResult};
use crate::listing::{KeepPolicy, MergePolicy};
use crate::uri::FileUri;

/// Byte stream returned by `open_read`
pub type ReadStream = Pin<Box<dyn AsyncRead + Send>>;

/// Byte sink returned by `open_write`
pub type WriteStream = Pin<Box<dyn AsyncWrite + Send>>;

/// Directory discovery
#[async_trait]
pub trait Listable: Send + Sync {
    /// List `dir`, converting every native record into an [`Entry`].
    ///
    /// This is the expensive protocol call the listing timeout races against.
    async fn list(&self, dir: &FileUri) -> FsResult<Vec<Entry>>;

    /// How directories and files are combined when sorting
    fn merge_policy(&self) -> MergePolicy;

    /// Whether listings are followed by a per-directory child count pass
    fn reports_child_counts(&self) -> bool {
        false
    }

    async fn count_children(&self, dir: &Entry, _keep: &dyn KeepPolicy) -> FsResult<ChildCounts> {
        Err(FsError::Unsupported(format!("child counts for {}", dir.uri())))
    }
}

/// Stream-based editing bound to URIs of one backend
#[async_trait]
pub trait Editable: Send + Sync {
    /// Open for reading, skipping `offset` bytes first
    async fn open_read(&self, uri: &FileUri, offset: u64) -> FsResult<ReadStream>;

    /// Open for writing, truncating any existing content
    async fn open_write(&self, uri: &FileUri) -> FsResult<WriteStream>;

    async fn delete(&self, uri: &FileUri) -> FsResult<()>;

    async fn make_dir(&self, uri: &FileUri) -> FsResult<()>;

    /// Rename within the same parent directory
    async fn rename(&self, uri: &FileUri, new_name: &str) -> FsResult<()>;

    /// Move to `target`; only supported on the same scheme, host and port
    async fn move_to(&self, uri: &FileUri, target: &FileUri) -> FsResult<()>;

    async fn exists(&self, uri: &FileUri) -> FsResult<bool>;
}

/// Single-entry metadata lookup
#[async_trait]
pub trait Describable: Send + Sync {
    async fn describe(&self, uri: &FileUri) -> FsResult<Entry>;
}
