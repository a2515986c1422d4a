//! File editor bound to one URI
//!
//! Editors are stateless between calls; every operation borrows whatever the backend
//! needs (a pooled or dedicated connection, a file handle) and gives it back on every
//! exit path. Protected local directories are refused before the backend is touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::capability::{Editable, ReadStream, WriteStream};
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::path_utils::strip_trailing_slash;
use crate::uri::{FileUri, Scheme};

/// Buffer size used by [`FileEditor::copy_to`]
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Local directories that may not be deleted, renamed or moved, directly or through an ancestor
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    paths: Vec<String>,
}

impl ProtectedPaths {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths = paths
            .into_iter()
            .map(|p| strip_trailing_slash(&p.as_ref().to_string_lossy()).to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { paths }
    }

    /// Media folders of the current user
    pub fn platform_defaults() -> Self {
        let mut paths: Vec<PathBuf> = [dirs::picture_dir(), dirs::video_dir(), dirs::audio_dir()]
            .into_iter()
            .flatten()
            .collect();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("DCIM"));
        }
        Self::new(paths)
    }

    pub fn from_config(config: &FsConfig) -> Self {
        match &config.protected_paths {
            Some(paths) => Self::new(paths),
            None => Self::platform_defaults(),
        }
    }

    /// A `file://` URI naming a protected directory or one of its ancestors.
    ///
    /// Removing or moving an ancestor would take the protected directory with it;
    /// entries inside a protected directory stay editable.
    pub fn is_protected(&self, uri: &FileUri) -> bool {
        if !matches!(uri.scheme(), Ok(Scheme::File)) {
            return false;
        }
        let path = uri.path();
        let path = strip_trailing_slash(&path);
        self.paths.iter().any(|p| p == path || is_ancestor(path, p))
    }
}

fn is_ancestor(dir: &str, path: &str) -> bool {
    if dir == "/" {
        return path.len() > 1 && path.starts_with('/');
    }
    path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Stream-based editing of one entry
#[derive(Clone)]
pub struct FileEditor {
    uri: FileUri,
    editable: Arc<dyn Editable>,
    protected: Arc<ProtectedPaths>,
}

impl FileEditor {
    pub fn new(uri: FileUri, editable: Arc<dyn Editable>, protected: Arc<ProtectedPaths>) -> Self {
        Self {
            uri,
            editable,
            protected,
        }
    }

    pub fn uri(&self) -> &FileUri {
        &self.uri
    }

    fn ensure_unprotected(&self, operation: &str) -> FsResult<()> {
        if self.protected.is_protected(&self.uri) {
            warn!("Refusing to {} protected directory {}", operation, self.uri);
            return Err(FsError::Protected(self.uri.path()));
        }
        Ok(())
    }

    /// Open for reading, starting `offset` bytes in
    pub async fn open_read(&self, offset: u64) -> FsResult<ReadStream> {
        self.editable.open_read(&self.uri, offset).await
    }

    /// Open for writing, truncating existing content
    pub async fn open_write(&self) -> FsResult<WriteStream> {
        self.editable.open_write(&self.uri).await
    }

    pub async fn delete(&self) -> FsResult<()> {
        self.ensure_unprotected("delete")?;
        self.editable.delete(&self.uri).await
    }

    pub async fn make_dir(&self) -> FsResult<()> {
        self.editable.make_dir(&self.uri).await
    }

    /// Rename inside the same parent directory
    pub async fn rename(&self, new_name: &str) -> FsResult<()> {
        self.ensure_unprotected("rename")?;
        self.editable.rename(&self.uri, new_name).await
    }

    /// Move to `target` on the same scheme, host and port
    pub async fn move_to(&self, target: &FileUri) -> FsResult<()> {
        self.ensure_unprotected("move")?;
        if !self.uri.same_authority(target) {
            return Err(FsError::Unsupported(format!("move from {} to {}", self.uri, target)));
        }
        self.editable.move_to(&self.uri, target).await
    }

    pub async fn exists(&self) -> FsResult<bool> {
        self.editable.exists(&self.uri).await
    }

    /// Create an empty file if nothing exists yet; returns whether one was created
    pub async fn touch(&self) -> FsResult<bool> {
        if self.exists().await? {
            return Ok(false);
        }
        let mut writer = self.open_write().await?;
        writer.shutdown().await?;
        Ok(true)
    }

    /// Stream this entry's content into `target`; returns the number of bytes copied
    pub async fn copy_to(&self, target: &FileEditor) -> FsResult<u64> {
        let mut reader = self.open_read(0).await?;
        let mut writer = target.open_write().await?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n]).await?;
            copied += n as u64;
        }
        writer.shutdown().await?;
        debug!("Copied {} bytes from {} to {}", copied, self.uri, target.uri);
        Ok(copied)
    }
}
