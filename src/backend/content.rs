//! Content-provider backend
//!
//! `content://` documents are owned by an external provider (a document picker,
//! a sandboxed storage service). The provider is injected; this backend only adapts
//! its records and streams to the common capabilities.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::capability::{Describable, Editable, Listable, ReadStream, WriteStream};
use crate::entry::{Entry, RawEntry};
use crate::error::{FsError, FsResult};
use crate::listing::MergePolicy;
use crate::path_utils::is_valid_name;
use crate::uri::FileUri;

/// Document storage reachable through `content://` URIs
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Children of a tree document
    async fn query_children(&self, uri: &FileUri) -> FsResult<Vec<RawEntry>>;

    async fn query(&self, uri: &FileUri) -> FsResult<RawEntry>;

    /// Providers have no seek; offsets are applied by skipping
    async fn open_read(&self, uri: &FileUri) -> FsResult<ReadStream>;

    async fn open_write(&self, uri: &FileUri) -> FsResult<WriteStream>;

    async fn delete(&self, uri: &FileUri) -> FsResult<()>;

    async fn create_directory(&self, uri: &FileUri) -> FsResult<()>;

    async fn rename(&self, uri: &FileUri, new_name: &str) -> FsResult<()>;

    async fn move_document(&self, uri: &FileUri, target: &FileUri) -> FsResult<()> {
        Err(FsError::Unsupported(format!("move from {} to {}", uri, target)))
    }
}

/// `content://` URIs
pub struct ContentBackend {
    provider: Arc<dyn DocumentProvider>,
}

impl ContentBackend {
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Listable for ContentBackend {
    async fn list(&self, dir: &FileUri) -> FsResult<Vec<Entry>> {
        let records = self.provider.query_children(dir).await?;
        let dir = dir.normalized();
        Ok(records
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
impl Editable for ContentBackend {
    async fn open_read(&self, uri: &FileUri, offset: u64) -> FsResult<ReadStream> {
        let mut stream = self.provider.open_read(uri).await?;
        if offset > 0 {
            let skipped = tokio::io::copy(&mut (&mut stream).take(offset), &mut tokio::io::sink()).await?;
            if skipped < offset {
                tracing::debug!("{} shorter than offset {} ({} bytes)", uri, offset, skipped);
            }
        }
        Ok(stream)
    }

    async fn open_write(&self, uri: &FileUri) -> FsResult<WriteStream> {
        self.provider.open_write(uri).await
    }

    async fn delete(&self, uri: &FileUri) -> FsResult<()> {
        self.provider.delete(uri).await
    }

    async fn make_dir(&self, uri: &FileUri) -> FsResult<()> {
        self.provider.create_directory(uri).await
    }

    async fn rename(&self, uri: &FileUri, new_name: &str) -> FsResult<()> {
        if !is_valid_name(new_name) {
            return Err(FsError::InvalidUri(format!("invalid name '{}'", new_name)));
        }
        self.provider.rename(uri, new_name).await
    }

    async fn move_to(&self, uri: &FileUri, target: &FileUri) -> FsResult<()> {
        if !uri.same_authority(target) {
            return Err(FsError::Unsupported(format!("move from {} to {}", uri, target)));
        }
        self.provider.move_document(uri, target).await
    }

    async fn exists(&self, uri: &FileUri) -> FsResult<bool> {
        match self.provider.query(uri).await {
            Ok(_) => Ok(true),
            Err(FsError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Describable for ContentBackend {
    async fn describe(&self, uri: &FileUri) -> FsResult<Entry> {
        let raw = self.provider.query(uri).await?;
        Ok(Entry::from_raw(raw, uri.normalized(), false, None))
    }
}
