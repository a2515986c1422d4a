//! Credential-keyed session pool
//!
//! One pool per protocol, owned by the composition root.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  SessionPool                                           │
//! │  ├── connector: Arc<dyn Connector>                     │
//! │  ├── credentials: Arc<dyn CredentialStore>             │
//! │  └── core: Arc<PoolCore>                               │
//! │       └── state: Mutex<HashMap<Credential, Pooled>>    │
//! │            └── PooledSession { users, retired, ... }   │
//! └───────────────────────────────────────────────────────┘
//!          │ acquire(uri, mode)
//!          ▼
//!     SessionLease ── drop ──▶ release (disconnect at zero if retired)
//! ```
//!
//! # 获取策略
//!
//! - `Pooled`: one shared connection per credential, reference counted
//! - `Dedicated`: a fresh connection owned by a single borrower
//!
//! All bookkeeping (lookup, insert, usage counts, eviction) happens under
//! `PoolCore::state`. Connecting on a miss is serialized per credential by
//! `connect_gates` so two borrowers never open two cached connections for the same
//! credential, while a slow server never holds up borrowers of another one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::connector::{Connector, Endpoint, RemoteSession};
use super::lease::{PooledSession, SessionLease};
use crate::credentials::{self, Credential, CredentialStore};
use crate::error::{FsError, FsResult};
use crate::uri::{FileUri, Scheme};

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a borrower obtains its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    Pooled,
    Dedicated,
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connect plus authenticate timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Cached live connections
    pub cached_sessions: usize,
    /// Outstanding borrows of cached connections
    pub borrowed: u32,
    /// Open dedicated connections
    pub dedicated_sessions: usize,
}

pub(crate) struct PoolState {
    cached: HashMap<Credential, Arc<PooledSession>>,
}

/// State shared between a pool and its leases
pub(crate) struct PoolCore {
    pub(crate) state: Mutex<PoolState>,
    dedicated_open: AtomicUsize,
}

impl PoolCore {
    pub(crate) fn dedicated_closed(&self) {
        let _ = self
            .dedicated_open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Protocol-wide connection cache
pub struct SessionPool {
    scheme: Scheme,
    default_port: u16,
    fallback_user: String,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    config: PoolConfig,
    core: Arc<PoolCore>,
    connect_gates: DashMap<Credential, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionPool {
    pub fn new(
        scheme: Scheme,
        default_port: u16,
        fallback_user: impl Into<String>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        config: PoolConfig,
    ) -> Self {
        Self {
            scheme,
            default_port,
            fallback_user: fallback_user.into(),
            connector,
            credentials,
            config,
            core: Arc::new(PoolCore {
                state: Mutex::new(PoolState {
                    cached: HashMap::new(),
                }),
                dedicated_open: AtomicUsize::new(0),
            }),
            connect_gates: DashMap::new(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Credential a borrow of `uri` would use
    pub fn credential_for(&self, uri: &FileUri) -> Credential {
        credentials::resolve(self.credentials.as_ref(), uri, &self.fallback_user)
    }

    /// Host and port of `uri`, using the protocol default port
    pub fn endpoint(&self, uri: &FileUri) -> FsResult<Endpoint> {
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FsError::InvalidUri(format!("missing host in {}", uri)))?;
        Ok(Endpoint {
            scheme: self.scheme,
            host: host.to_string(),
            port: uri.port().unwrap_or(self.default_port),
        })
    }

    /// Borrow a connection for `uri`
    pub async fn acquire(&self, uri: &FileUri, mode: AcquireMode) -> FsResult<SessionLease> {
        let credential = self.credential_for(uri);
        let endpoint = self.endpoint(uri)?;
        match mode {
            AcquireMode::Dedicated => self.acquire_dedicated(&endpoint, credential).await,
            AcquireMode::Pooled => self.acquire_pooled(&endpoint, credential).await,
        }
    }

    async fn acquire_dedicated(&self, endpoint: &Endpoint, credential: Credential) -> FsResult<SessionLease> {
        let session = self.connect(endpoint, &credential).await?;
        let entry = Arc::new(PooledSession::new(credential, session, true));
        {
            let _state = self.core.state.lock();
            entry.add_ref();
        }
        self.core.dedicated_open.fetch_add(1, Ordering::SeqCst);
        debug!("Opened dedicated session {} to {}", entry.id, endpoint);
        Ok(SessionLease::new(self.core.clone(), entry))
    }

    async fn acquire_pooled(&self, endpoint: &Endpoint, credential: Credential) -> FsResult<SessionLease> {
        if let Some(entry) = self.live_cached(&credential) {
            return Ok(SessionLease::new(self.core.clone(), entry));
        }

        let gate = self.connect_gates.entry(credential.clone()).or_default().clone();
        let _gate = gate.lock().await;

        let stale = {
            let mut state = self.core.state.lock();
            match state.cached.get(&credential).cloned() {
                Some(entry) if entry.session.is_connected() => {
                    entry.add_ref();
                    return Ok(SessionLease::new(self.core.clone(), entry));
                }
                Some(entry) => {
                    // 连接已断开：移出缓存，最后一个使用者释放时断开
                    state.cached.remove(&credential);
                    entry.retired.store(true, Ordering::SeqCst);
                    (entry.users() == 0).then_some(entry)
                }
                None => None,
            }
        };

        if let Some(stale) = stale {
            info!("Session {} to {} went stale, reconnecting", stale.id, endpoint);
            stale.session.disconnect().await;
        }

        let session = self.connect(endpoint, &credential).await?;
        let entry = Arc::new(PooledSession::new(credential.clone(), session, false));
        {
            let mut state = self.core.state.lock();
            entry.add_ref();
            state.cached.insert(credential, entry.clone());
        }
        info!("Cached session {} to {}", entry.id, endpoint);
        Ok(SessionLease::new(self.core.clone(), entry))
    }

    /// Live cached connection for `credential`, already counted as borrowed
    fn live_cached(&self, credential: &Credential) -> Option<Arc<PooledSession>> {
        let state = self.core.state.lock();
        let entry = state.cached.get(credential)?;
        if !entry.session.is_connected() {
            return None;
        }
        entry.add_ref();
        Some(entry.clone())
    }

    async fn connect(&self, endpoint: &Endpoint, credential: &Credential) -> FsResult<Arc<dyn RemoteSession>> {
        debug!(
            "Connecting to {} as {}{}",
            endpoint,
            credential.username,
            if credential.anonymous { " (anonymous)" } else { "" }
        );
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, self.connector.connect(endpoint, credential)).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => {
                warn!("Connection to {} failed: {}", endpoint, e);
                Err(e)
            }
            Err(_) => Err(FsError::Timeout(format!("{} after {:?}", endpoint, timeout))),
        }
    }

    /// Evict every cached connection to the server of `uri`.
    ///
    /// Idle connections are disconnected now, borrowed ones when their last lease is
    /// dropped. Returns the number of evicted connections.
    pub async fn invalidate(&self, uri: &FileUri) -> usize {
        self.invalidate_key(&uri.credential_key()).await
    }

    pub async fn invalidate_key(&self, key: &str) -> usize {
        let (evicted, idle) = {
            let mut state = self.core.state.lock();
            let keys: Vec<Credential> = state
                .cached
                .keys()
                .filter(|c| c.key == key)
                .cloned()
                .collect();
            let mut idle = Vec::new();
            for credential in &keys {
                if let Some(entry) = state.cached.remove(credential) {
                    entry.retired.store(true, Ordering::SeqCst);
                    if entry.users() == 0 {
                        idle.push(entry);
                    }
                }
            }
            (keys.len(), idle)
        };

        for entry in idle {
            debug!("Disconnecting invalidated session {}", entry.id);
            entry.session.disconnect().await;
        }
        if evicted > 0 {
            info!("Invalidated {} session(s) for {}", evicted, key);
        }
        evicted
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.core.state.lock();
        PoolStats {
            cached_sessions: state.cached.len(),
            borrowed: state.cached.values().map(|e| e.users()).sum(),
            dedicated_sessions: self.core.dedicated_open.load(Ordering::SeqCst),
        }
    }

    /// Evict everything; borrowed connections close when returned
    pub async fn close_all(&self) {
        let idle: Vec<Arc<PooledSession>> = {
            let mut state = self.core.state.lock();
            state
                .cached
                .drain()
                .map(|(_, entry)| {
                    entry.retired.store(true, Ordering::SeqCst);
                    entry
                })
                .filter(|entry| entry.users() == 0)
                .collect()
        };
        info!("Closing {} idle {:?} session(s)", idle.len(), self.scheme);
        for entry in idle {
            entry.session.disconnect().await;
        }
    }
}
