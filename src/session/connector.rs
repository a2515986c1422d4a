//! Connector seam between the session pools and protocol clients
//!
//! A [`Connector`] opens and authenticates one connection; the resulting
//! [`RemoteSession`] exposes the handful of wire calls the listing engines and editors
//! need. Each protocol client converts its native directory records into
//! [`RawEntry`] values before handing them over.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{ReadStream, WriteStream};
use crate::credentials::Credential;
use crate::entry::{EntryKind, RawEntry, RawKind};
use crate::error::FsResult;
use crate::uri::Scheme;

/// Resolved server address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One live, authenticated protocol connection
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Whether the underlying transport is still usable
    fn is_connected(&self) -> bool;

    async fn disconnect(&self);

    /// Raw records of `path`, without `.` and `..`
    async fn list(&self, path: &str) -> FsResult<Vec<RawEntry>>;

    /// Metadata of `path`, following links
    async fn stat(&self, path: &str) -> FsResult<RawEntry>;

    /// Classify the target of the link at `path`
    async fn resolve_link(&self, path: &str) -> FsResult<EntryKind> {
        Ok(match self.stat(path).await?.kind {
            RawKind::Directory => EntryKind::Directory,
            _ => EntryKind::File,
        })
    }

    async fn open_read(&self, path: &str, offset: u64) -> FsResult<ReadStream>;

    /// Create or truncate `path`
    async fn open_write(&self, path: &str) -> FsResult<WriteStream>;

    async fn remove_file(&self, path: &str) -> FsResult<()>;

    async fn remove_dir(&self, path: &str) -> FsResult<()>;

    async fn make_dir(&self, path: &str) -> FsResult<()>;

    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;
}

/// Opens connections for one protocol
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate.
    ///
    /// Resolution failures are `UnknownHost`, unreachable servers `HostNotFound`.
    /// When the server rejects the credential the half-open connection is closed and
    /// `AuthenticationFailed` is returned.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: &Credential,
    ) -> FsResult<Arc<dyn RemoteSession>>;
}
