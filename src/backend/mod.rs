//! Backend registry
//!
//! Maps a URI scheme to the backend serving it and hands out listing engines, file
//! editors and metadata lookups bound to that backend. One [`SessionPool`] exists per
//! network scheme for the lifetime of the registry.

pub mod content;
pub mod local;
pub mod remote;
pub mod sftp;
pub mod zip;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::capability::{Describable, Editable, Listable};
use crate::config::FsConfig;
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::editor::{FileEditor, ProtectedPaths};
use crate::entry::Entry;
use crate::error::{FsError, FsResult};
use crate::listing::{ControlHandle, ListingEngine, ListingListener, ListingOptions};
use crate::session::{Connector, PoolStats, SessionPool};
use crate::uri::{FileUri, Scheme};

pub use self::content::{ContentBackend, DocumentProvider};
pub use self::local::LocalBackend;
pub use self::remote::{ProtocolProfile, RemoteBackend};
pub use self::sftp::SftpConnector;
pub use self::zip::ZipBackend;

/// The backend serving one URI
#[derive(Clone)]
pub enum Backend {
    Local(Arc<LocalBackend>),
    Content(Arc<ContentBackend>),
    Zip(Arc<ZipBackend>),
    Remote(Arc<RemoteBackend>),
}

impl Backend {
    pub fn listable(&self) -> Arc<dyn Listable> {
        match self {
            Backend::Local(b) => b.clone(),
            Backend::Content(b) => b.clone(),
            Backend::Zip(b) => b.clone(),
            Backend::Remote(b) => b.clone(),
        }
    }

    pub fn editable(&self) -> Arc<dyn Editable> {
        match self {
            Backend::Local(b) => b.clone(),
            Backend::Content(b) => b.clone(),
            Backend::Zip(b) => b.clone(),
            Backend::Remote(b) => b.clone(),
        }
    }

    pub fn describable(&self) -> Arc<dyn Describable> {
        match self {
            Backend::Local(b) => b.clone(),
            Backend::Content(b) => b.clone(),
            Backend::Zip(b) => b.clone(),
            Backend::Remote(b) => b.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Backend::Remote(_))
    }
}

/// Collects connectors and settings before the pools are created
pub struct BackendsBuilder {
    control: ControlHandle,
    config: FsConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    connectors: HashMap<Scheme, Arc<dyn Connector>>,
    provider: Option<Arc<dyn DocumentProvider>>,
    protected: Option<ProtectedPaths>,
}

impl BackendsBuilder {
    pub fn new(control: ControlHandle) -> Self {
        Self {
            control,
            config: FsConfig::default(),
            credentials: None,
            connectors: HashMap::new(),
            provider: None,
            protected: None,
        }
    }

    pub fn with_config(mut self, config: FsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Serve `scheme` through `connector`. SFTP uses [`SftpConnector`] unless replaced.
    pub fn with_connector(mut self, scheme: Scheme, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(scheme, connector);
        self
    }

    pub fn with_document_provider(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Override the protected directories from the config
    pub fn with_protected_paths(mut self, protected: ProtectedPaths) -> Self {
        self.protected = Some(protected);
        self
    }

    pub fn build(self) -> Backends {
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let mut connectors = self.connectors;
        connectors
            .entry(Scheme::Sftp)
            .or_insert_with(|| Arc::new(SftpConnector::new()));

        let mut remotes = HashMap::new();
        for (scheme, connector) in connectors {
            let Some(mut profile) = ProtocolProfile::for_scheme(scheme) else {
                warn!("Ignoring connector for non-network scheme {:?}", scheme);
                continue;
            };
            if let Some(mode) = self.config.acquisition.get(&scheme) {
                profile = profile.with_strategy(*mode);
            }
            let pool = SessionPool::new(
                scheme,
                profile.default_port,
                profile.fallback_user,
                connector,
                credentials.clone(),
                self.config.pool.clone(),
            );
            remotes.insert(scheme, Arc::new(RemoteBackend::new(profile, Arc::new(pool))));
        }
        info!("Backends ready for {} network schemes", remotes.len());

        let protected = self
            .protected
            .unwrap_or_else(|| ProtectedPaths::from_config(&self.config));

        Backends {
            control: self.control,
            config: self.config,
            local: Arc::new(LocalBackend::new()),
            zip: Arc::new(ZipBackend::new()),
            content: self.provider.map(|p| Arc::new(ContentBackend::new(p))),
            remotes,
            protected: Arc::new(protected),
        }
    }
}

/// Entry point for every file operation
pub struct Backends {
    control: ControlHandle,
    config: FsConfig,
    local: Arc<LocalBackend>,
    zip: Arc<ZipBackend>,
    content: Option<Arc<ContentBackend>>,
    remotes: HashMap<Scheme, Arc<RemoteBackend>>,
    protected: Arc<ProtectedPaths>,
}

impl Backends {
    pub fn builder(control: ControlHandle) -> BackendsBuilder {
        BackendsBuilder::new(control)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Backend serving `uri`
    pub fn resolve(&self, uri: &FileUri) -> FsResult<Backend> {
        match uri.scheme()? {
            Scheme::File => Ok(Backend::Local(self.local.clone())),
            Scheme::Zip => Ok(Backend::Zip(self.zip.clone())),
            Scheme::Content => self
                .content
                .clone()
                .map(Backend::Content)
                .ok_or_else(|| FsError::Unsupported("no document provider configured".into())),
            scheme => self
                .remotes
                .get(&scheme)
                .cloned()
                .map(Backend::Remote)
                .ok_or_else(|| FsError::Unsupported(format!("no connector for {:?}", scheme))),
        }
    }

    /// Options built from the configured filter, sort order and timeout
    pub fn listing_options(&self) -> ListingOptions {
        ListingOptions::new(Arc::new(self.config.filter.clone()))
            .with_sort(self.config.sort_order)
            .with_timeout(self.config.listing_timeout())
    }

    /// Listing engine for `uri` using the configured options
    pub fn listing_engine(&self, uri: &FileUri, listener: Arc<dyn ListingListener>) -> FsResult<ListingEngine> {
        self.listing_engine_with(uri, self.listing_options(), listener)
    }

    pub fn listing_engine_with(
        &self,
        uri: &FileUri,
        options: ListingOptions,
        listener: Arc<dyn ListingListener>,
    ) -> FsResult<ListingEngine> {
        let backend = self.resolve(uri)?;
        Ok(ListingEngine::new(
            backend.listable(),
            uri.clone(),
            options,
            self.control.clone(),
            listener,
        ))
    }

    pub fn file_editor(&self, uri: &FileUri) -> FsResult<FileEditor> {
        let backend = self.resolve(uri)?;
        Ok(FileEditor::new(uri.clone(), backend.editable(), self.protected.clone()))
    }

    pub async fn describe(&self, uri: &FileUri) -> FsResult<Entry> {
        self.resolve(uri)?.describable().describe(uri).await
    }

    pub fn pool(&self, scheme: Scheme) -> Option<&Arc<SessionPool>> {
        self.remotes.get(&scheme).map(|r| r.pool())
    }

    pub fn pool_stats(&self) -> HashMap<Scheme, PoolStats> {
        self.remotes
            .iter()
            .map(|(scheme, remote)| (*scheme, remote.pool().stats()))
            .collect()
    }

    /// Drop cached connections for the server of `uri`, e.g. after a credential change
    pub async fn invalidate(&self, uri: &FileUri) -> FsResult<usize> {
        match self.resolve(uri)? {
            Backend::Remote(remote) => Ok(remote.pool().invalidate(uri).await),
            _ => Ok(0),
        }
    }

    /// Close every pooled connection
    pub async fn shutdown(&self) {
        for remote in self.remotes.values() {
            remote.pool().close_all().await;
        }
        info!("All session pools closed");
    }
}
