//! Borrowed sessions
//!
//! A [`SessionLease`] is the only way to use a pooled connection. Dropping it gives the
//! connection back to the pool; the last borrower of a retired or dedicated connection
//! disconnects it.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use super::connector::RemoteSession;
use super::pool::PoolCore;
use crate::capability::{ReadStream, WriteStream};
use crate::credentials::Credential;

/// One connection tracked by a pool
pub(crate) struct PooledSession {
    pub(crate) id: String,
    pub(crate) credential: Credential,
    pub(crate) session: Arc<dyn RemoteSession>,
    pub(crate) dedicated: bool,
    /// Set once the connection is no longer the cached one for its credential
    pub(crate) retired: AtomicBool,
    users: AtomicU32,
}

impl PooledSession {
    pub(crate) fn new(credential: Credential, session: Arc<dyn RemoteSession>, dedicated: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            credential,
            session,
            dedicated,
            retired: AtomicBool::new(dedicated),
            users: AtomicU32::new(0),
        }
    }

    /// Callers hold the pool lock
    pub(crate) fn add_ref(&self) -> u32 {
        let current = self.users.load(Ordering::SeqCst);
        // 防止溢出
        if current >= u32::MAX - 1 {
            warn!("Session {} usage count at maximum, not incrementing", self.id);
            return current;
        }
        let count = self.users.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        debug!("Session {} usage increased to {}", self.id, count);
        count
    }

    /// Callers hold the pool lock
    pub(crate) fn release(&self) -> u32 {
        let current = self.users.load(Ordering::SeqCst);
        // 防止下溢
        if current == 0 {
            warn!("Session {} usage already 0, not decrementing", self.id);
            return 0;
        }
        let count = self.users.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!("Session {} usage decreased to {}", self.id, count);
        count
    }

    pub(crate) fn users(&self) -> u32 {
        self.users.load(Ordering::SeqCst)
    }
}

/// Borrowed connection, returned to its pool on drop
pub struct SessionLease {
    core: Arc<PoolCore>,
    entry: Option<Arc<PooledSession>>,
    session: Arc<dyn RemoteSession>,
}

impl SessionLease {
    pub(crate) fn new(core: Arc<PoolCore>, entry: Arc<PooledSession>) -> Self {
        let session = entry.session.clone();
        Self {
            core,
            entry: Some(entry),
            session,
        }
    }

    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.session
    }

    /// Identity token of the underlying connection
    pub fn session_id(&self) -> &str {
        self.entry.as_ref().map(|e| e.id.as_str()).unwrap_or_default()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.entry.as_ref().map(|e| &e.credential)
    }

    pub fn is_dedicated(&self) -> bool {
        self.entry.as_ref().map(|e| e.dedicated).unwrap_or(false)
    }

    /// Return the connection and wait for any resulting disconnect
    pub async fn release(mut self) {
        if let Some(session) = self.give_back() {
            session.disconnect().await;
        }
    }

    /// Decrement usage; yields the session when this was its last borrower and the
    /// connection must go away
    fn give_back(&mut self) -> Option<Arc<dyn RemoteSession>> {
        let entry = self.entry.take()?;
        let remaining = {
            let _state = self.core.state.lock();
            let remaining = entry.release();
            if remaining == 0 && entry.retired.load(Ordering::SeqCst) {
                Some(remaining)
            } else {
                None
            }
        };
        remaining.map(|_| {
            if entry.dedicated {
                self.core.dedicated_closed();
            }
            debug!("Disconnecting released session {}", entry.id);
            entry.session.clone()
        })
    }

    /// Tie this lease to a read stream so the connection lives as long as the stream
    pub fn wrap_reader(self, inner: ReadStream) -> ReadStream {
        Box::pin(LeasedReader { inner, _lease: self })
    }

    pub fn wrap_writer(self, inner: WriteStream) -> WriteStream {
        Box::pin(LeasedWriter { inner, _lease: self })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.give_back() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { session.disconnect().await });
                }
                Err(_) => warn!("No runtime to disconnect released session, dropping it"),
            }
        }
    }
}

struct LeasedReader {
    inner: ReadStream,
    _lease: SessionLease,
}

impl AsyncRead for LeasedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

struct LeasedWriter {
    inner: WriteStream,
    _lease: SessionLease,
}

impl AsyncWrite for LeasedWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}
