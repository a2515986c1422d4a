//! Network backends (FTP/FTPS, SFTP, SMB, WebDAV)
//!
//! Every network protocol shares this implementation. What differs between them is
//! captured by a [`ProtocolProfile`]: the default port, the anonymous user name, how
//! each kind of operation borrows its connection, and how listings are merged.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::adapter::is_dot_entry;
use crate::capability::{Describable, Editable, Listable, ReadStream, WriteStream};
use crate::entry::{Entry, RawKind};
use crate::error::{FsError, FsResult};
use crate::listing::MergePolicy;
use crate::path_utils::{is_valid_name, join_remote_path};
use crate::session::{AcquireMode, RemoteSession, SessionLease, SessionPool};
use crate::uri::{FileUri, Scheme};

/// Per-protocol connection and ordering defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolProfile {
    pub scheme: Scheme,
    pub default_port: u16,
    /// User name for anonymous access
    pub fallback_user: &'static str,
    /// Directory listings
    pub listing: AcquireMode,
    /// stat, exists, delete, mkdir, rename
    pub metadata: AcquireMode,
    /// open_read / open_write
    pub streaming: AcquireMode,
    pub merge_policy: MergePolicy,
}

impl ProtocolProfile {
    /// Defaults for a network scheme; `None` for local schemes
    pub fn for_scheme(scheme: Scheme) -> Option<Self> {
        use AcquireMode::{Dedicated, Pooled};

        let profile = |default_port, fallback_user, listing, metadata, streaming, merge_policy| Self {
            scheme,
            default_port,
            fallback_user,
            listing,
            metadata,
            streaming,
            merge_policy,
        };
        match scheme {
            // FTP control connections carry one transfer at a time
            Scheme::Ftp | Scheme::Ftps => Some(profile(
                21,
                "anonymous",
                Dedicated,
                Pooled,
                Dedicated,
                MergePolicy::SeparateThenConcat,
            )),
            Scheme::Sftp => Some(profile(22, "anonymous", Pooled, Pooled, Dedicated, MergePolicy::Unified)),
            Scheme::Smb => Some(profile(445, "guest", Pooled, Pooled, Pooled, MergePolicy::Unified)),
            Scheme::WebDav => Some(profile(80, "anonymous", Pooled, Pooled, Pooled, MergePolicy::Unified)),
            Scheme::WebDavs => Some(profile(443, "anonymous", Pooled, Pooled, Pooled, MergePolicy::Unified)),
            Scheme::File | Scheme::Content | Scheme::Zip => None,
        }
    }

    /// Force one acquisition strategy for every operation
    pub fn with_strategy(mut self, mode: AcquireMode) -> Self {
        self.listing = mode;
        self.metadata = mode;
        self.streaming = mode;
        self
    }
}

/// Listing, editing and describing over a [`SessionPool`]
pub struct RemoteBackend {
    profile: ProtocolProfile,
    pool: Arc<SessionPool>,
}

impl RemoteBackend {
    pub fn new(profile: ProtocolProfile, pool: Arc<SessionPool>) -> Self {
        Self { profile, pool }
    }

    pub fn profile(&self) -> &ProtocolProfile {
        &self.profile
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Borrow a connection and run `op` on it.
    ///
    /// When `op` fails in a way that leaves the connection unusable, the cached
    /// connection is evicted and `op` runs once more on a fresh one. The lease is
    /// returned alongside the result so streams can keep their connection alive.
    async fn leased<T, F, Fut>(&self, uri: &FileUri, mode: AcquireMode, op: F) -> FsResult<(SessionLease, T)>
    where
        F: Fn(Arc<dyn RemoteSession>) -> Fut,
        Fut: Future<Output = FsResult<T>>,
    {
        let lease = self.pool.acquire(uri, mode).await?;
        match op(lease.session().clone()).await {
            Ok(value) => Ok((lease, value)),
            Err(e) if e.poisons_connection() => {
                warn!("Session {} to {} failed ({}), retrying once", lease.session_id(), uri.credential_key(), e);
                let pooled = !lease.is_dedicated();
                lease.release().await;
                if pooled {
                    self.pool.invalidate(uri).await;
                }
                let lease = self.pool.acquire(uri, mode).await?;
                let value = op(lease.session().clone()).await?;
                Ok((lease, value))
            }
            Err(e) => Err(e),
        }
    }

    async fn with_session<T, F, Fut>(&self, uri: &FileUri, mode: AcquireMode, op: F) -> FsResult<T>
    where
        F: Fn(Arc<dyn RemoteSession>) -> Fut,
        Fut: Future<Output = FsResult<T>>,
    {
        let (lease, value) = self.leased(uri, mode, op).await?;
        lease.release().await;
        Ok(value)
    }
}

/// Wire path of `uri`, without a trailing slash
fn remote_path(uri: &FileUri) -> String {
    uri.normalized().path()
}

#[async_trait]
impl Listable for RemoteBackend {
    async fn list(&self, dir: &FileUri) -> FsResult<Vec<Entry>> {
        let path = remote_path(dir);
        let path = path.as_str();
        debug!("Listing {}", dir);

        let records = self
            .with_session(dir, self.profile.listing, |session| async move {
                let raws = session.list(path).await?;
                let mut records = Vec::with_capacity(raws.len());
                for raw in raws {
                    if is_dot_entry(&raw.name) {
                        continue;
                    }
                    // one hop only; dangling links become files
                    let target = match &raw.kind {
                        RawKind::Symlink { .. } => session
                            .resolve_link(&join_remote_path(path, &raw.name))
                            .await
                            .ok(),
                        _ => None,
                    };
                    records.push((raw, target));
                }
                Ok(records)
            })
            .await?;

        let dir = dir.normalized();
        Ok(records
            .into_iter()
            .map(|(raw, target)| {
                let uri = dir.join(&raw.name);
                Entry::from_raw(raw, uri, true, target)
            })
            .collect())
    }

    fn merge_policy(&self) -> MergePolicy {
        self.profile.merge_policy
    }
}

#[async_trait]
impl Editable for RemoteBackend {
    async fn open_read(&self, uri: &FileUri, offset: u64) -> FsResult<ReadStream> {
        let path = remote_path(uri);
        let path = path.as_str();
        let (lease, stream) = self
            .leased(uri, self.profile.streaming, |session| async move {
                session.open_read(path, offset).await
            })
            .await?;
        Ok(lease.wrap_reader(stream))
    }

    async fn open_write(&self, uri: &FileUri) -> FsResult<WriteStream> {
        let path = remote_path(uri);
        let path = path.as_str();
        let (lease, stream) = self
            .leased(uri, self.profile.streaming, |session| async move {
                session.open_write(path).await
            })
            .await?;
        Ok(lease.wrap_writer(stream))
    }

    async fn delete(&self, uri: &FileUri) -> FsResult<()> {
        let path = remote_path(uri);
        let path = path.as_str();
        self.with_session(uri, self.profile.metadata, |session| async move {
            let raw = session.stat(path).await?;
            let removed = match raw.kind {
                RawKind::Directory => session.remove_dir(path).await,
                _ => session.remove_file(path).await,
            };
            removed.map_err(|e| match e {
                FsError::Protocol(message) => FsError::DeleteFailed(format!("{}: {}", path, message)),
                other => other,
            })
        })
        .await
    }

    async fn make_dir(&self, uri: &FileUri) -> FsResult<()> {
        let path = remote_path(uri);
        let path = path.as_str();
        self.with_session(uri, self.profile.metadata, |session| async move {
            session.make_dir(path).await
        })
        .await
    }

    async fn rename(&self, uri: &FileUri, new_name: &str) -> FsResult<()> {
        if !is_valid_name(new_name) {
            return Err(FsError::InvalidUri(format!("invalid name '{}'", new_name)));
        }
        let target = uri.normalized().with_name(new_name);
        self.move_to(uri, &target).await
    }

    async fn move_to(&self, uri: &FileUri, target: &FileUri) -> FsResult<()> {
        if !uri.same_authority(target) {
            return Err(FsError::Unsupported(format!("move from {} to {}", uri, target)));
        }
        let from = remote_path(uri);
        let to = remote_path(target);
        let (from, to) = (from.as_str(), to.as_str());
        self.with_session(uri, self.profile.metadata, |session| async move {
            session.rename(from, to).await
        })
        .await
    }

    async fn exists(&self, uri: &FileUri) -> FsResult<bool> {
        let path = remote_path(uri);
        let path = path.as_str();
        let found = self
            .with_session(uri, self.profile.metadata, |session| async move {
                match session.stat(path).await {
                    Ok(_) => Ok(true),
                    Err(FsError::FileNotFound(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(found)
    }
}

#[async_trait]
impl Describable for RemoteBackend {
    async fn describe(&self, uri: &FileUri) -> FsResult<Entry> {
        let path = remote_path(uri);
        let path = path.as_str();
        let mut raw = self
            .with_session(uri, self.profile.metadata, |session| async move { session.stat(path).await })
            .await?;
        raw.name = uri.name();
        Ok(Entry::from_raw(raw, uri.normalized(), true, None))
    }
}
