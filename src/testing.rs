//! Shared fixtures for unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capability::Listable;
use crate::entry::{ChildCounts, Entry, RawEntry};
use crate::error::{ErrorKind, FsError, FsResult};
use crate::listing::{ControlQueue, KeepPolicy, ListingListener, MergePolicy};
use crate::uri::FileUri;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Update(Vec<String>),
    FileInfo(String, ChildCounts),
    Timeout,
    CredentialRequired,
    Fatal(ErrorKind),
    End,
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn updates(&self) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Update(names) => Some(names),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn has_ended(&self) -> bool {
        self.count(&Event::End) > 0
    }
}

impl ListingListener for RecordingListener {
    fn on_listing_start(&self) {
        self.events.lock().push(Event::Start);
    }

    fn on_listing_update(&self, entries: Vec<Entry>) {
        let names = entries.iter().map(|e| e.name().to_string()).collect();
        self.events.lock().push(Event::Update(names));
    }

    fn on_listing_file_info_update(&self, _uri: &FileUri, entry: &Entry) {
        self.events.lock().push(Event::FileInfo(
            entry.name().to_string(),
            entry.children().unwrap_or_default(),
        ));
    }

    fn on_listing_timeout(&self) {
        self.events.lock().push(Event::Timeout);
    }

    fn on_credential_required(&self, _cause: &FsError) {
        self.events.lock().push(Event::CredentialRequired);
    }

    fn on_listing_fatal_error(&self, _cause: &FsError, kind: ErrorKind) {
        self.events.lock().push(Event::Fatal(kind));
    }

    fn on_listing_end(&self) {
        self.events.lock().push(Event::End);
    }
}

/// Run queued callbacks until the listener has seen `on_listing_end`
pub async fn drive_until_end(queue: &mut ControlQueue, listener: &RecordingListener) {
    while !listener.has_ended() {
        let ran = tokio::time::timeout(Duration::from_secs(5), queue.next())
            .await
            .expect("listing did not end in time");
        assert!(ran, "control queue closed before end");
    }
}

type ErrorFactory = Box<dyn Fn() -> FsError + Send + Sync>;

/// Lister returning a fixed set of entries
pub struct StaticLister {
    policy: MergePolicy,
    entries: Vec<RawEntry>,
    delay: Option<Duration>,
    error: Option<ErrorFactory>,
    panic: bool,
    child_counts: bool,
    count_delay: Option<Duration>,
    panic_on_count: bool,
}

impl StaticLister {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            delay: None,
            error: None,
            panic: false,
            child_counts: false,
            count_delay: None,
            panic_on_count: false,
        }
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.entries.push(RawEntry::directory(name, 0));
        self
    }

    pub fn file(mut self, name: &str, size: u64) -> Self {
        self.entries.push(RawEntry::file(name, size, 0));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_with(mut self, error: impl Fn() -> FsError + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    pub fn panic_on_list(mut self) -> Self {
        self.panic = true;
        self
    }

    /// Follow listings with a child count pass taking `delay` per directory
    pub fn with_child_counts(mut self, delay: Duration) -> Self {
        self.child_counts = true;
        self.count_delay = Some(delay);
        self
    }

    pub fn panic_on_count(mut self) -> Self {
        self.child_counts = true;
        self.panic_on_count = true;
        self
    }
}

#[async_trait]
impl Listable for StaticLister {
    async fn list(&self, dir: &FileUri) -> FsResult<Vec<Entry>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("backend exploded");
        }
        if let Some(error) = &self.error {
            return Err(error());
        }
        Ok(self
            .entries
            .iter()
            .cloned()
            .map(|raw| {
                let uri = dir.join(&raw.name);
                Entry::from_raw(raw, uri, true, None)
            })
            .collect())
    }

    fn merge_policy(&self) -> MergePolicy {
        self.policy
    }

    fn reports_child_counts(&self) -> bool {
        self.child_counts
    }

    async fn count_children(&self, _dir: &Entry, _keep: &dyn KeepPolicy) -> FsResult<ChildCounts> {
        if let Some(delay) = self.count_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_count {
            panic!("child count exploded");
        }
        Ok(ChildCounts { directories: 1, files: 2 })
    }
}

/// Shared state of the fake server behind [`FakeConnector`]
#[derive(Default)]
struct FakeServer {
    tree: Mutex<BTreeMap<String, FakeNode>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    operations: AtomicUsize,
    poison_next_list: AtomicBool,
    last_endpoint: Mutex<Option<crate::session::Endpoint>>,
}

#[derive(Debug, Clone)]
enum FakeNode {
    Dir,
    File(Vec<u8>, i64),
    Link(String),
}

fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> String {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string()
}

impl FakeServer {
    fn raw(&self, path: &str, node: &FakeNode) -> RawEntry {
        match node {
            FakeNode::Dir => RawEntry::directory(name_of(path), 1_000),
            FakeNode::File(data, modified) => RawEntry::file(name_of(path), data.len() as u64, *modified),
            FakeNode::Link(target) => RawEntry {
                kind: crate::entry::RawKind::Symlink {
                    target: Some(target.clone()),
                },
                ..RawEntry::file(name_of(path), 0, 0)
            },
        }
    }
}

/// In-memory connector; accepts a single password for every user
pub struct FakeConnector {
    password: String,
    server: Arc<FakeServer>,
}

impl FakeConnector {
    pub fn new(password: &str) -> Arc<Self> {
        let server = FakeServer::default();
        server.tree.lock().insert("/".to_string(), FakeNode::Dir);
        Arc::new(Self {
            password: password.to_string(),
            server: Arc::new(server),
        })
    }

    pub fn with_dir(self: Arc<Self>, path: &str) -> Arc<Self> {
        self.server.tree.lock().insert(path.to_string(), FakeNode::Dir);
        self
    }

    pub fn with_file(self: Arc<Self>, path: &str, data: &[u8], modified: i64) -> Arc<Self> {
        self.server
            .tree
            .lock()
            .insert(path.to_string(), FakeNode::File(data.to_vec(), modified));
        self
    }

    pub fn with_link(self: Arc<Self>, path: &str, target: &str) -> Arc<Self> {
        self.server
            .tree
            .lock()
            .insert(path.to_string(), FakeNode::Link(target.to_string()));
        self
    }

    pub fn connects(&self) -> usize {
        self.server.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.server.disconnects.load(Ordering::SeqCst)
    }

    /// Number of wire operations performed on any session
    pub fn operations(&self) -> usize {
        self.server.operations.load(Ordering::SeqCst)
    }

    pub fn last_endpoint(&self) -> Option<crate::session::Endpoint> {
        self.server.last_endpoint.lock().clone()
    }

    /// Simulate every transport dropping without a disconnect call
    pub fn drop_all_transports(&self) {
        for session in self.server.sessions.lock().iter() {
            session.transport.store(false, Ordering::SeqCst);
        }
    }

    /// Next `list` call fails as if the connection died mid-request
    pub fn poison_next_list(&self) {
        self.server
            .poison_next_list
            .store(true, Ordering::SeqCst);
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.server.tree.lock().get(path) {
            Some(FakeNode::File(data, _)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.server.tree.lock().contains_key(path)
    }
}

#[async_trait]
impl crate::session::Connector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &crate::session::Endpoint,
        credential: &crate::credentials::Credential,
    ) -> FsResult<Arc<dyn crate::session::RemoteSession>> {
        use crate::session::RemoteSession;

        *self.server.last_endpoint.lock() = Some(endpoint.clone());
        if endpoint.host.ends_with(".invalid") {
            return Err(FsError::UnknownHost(endpoint.host.clone()));
        }
        let session = Arc::new(FakeSession {
            connected: AtomicBool::new(true),
            transport: AtomicBool::new(true),
            server: self.server.clone(),
        });
        if credential.password != self.password {
            session.disconnect().await;
            return Err(FsError::AuthenticationFailed(format!(
                "{} rejected {}",
                endpoint, credential.username
            )));
        }
        self.server
            .connects
            .fetch_add(1, Ordering::SeqCst);
        self.server.sessions.lock().push(session.clone());
        Ok(session)
    }
}

pub struct FakeSession {
    /// Cleared by `disconnect`
    connected: AtomicBool,
    /// Cleared when the fake network drops
    transport: AtomicBool,
    server: Arc<FakeServer>,
}

impl FakeSession {
    fn touch(&self) -> FsResult<()> {
        self.server
            .operations
            .fetch_add(1, Ordering::SeqCst);
        if self.connected.load(Ordering::SeqCst) && self.transport.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FsError::Disconnected)
        }
    }
}

struct FakeWriter {
    path: String,
    server: Arc<FakeServer>,
}

impl tokio::io::AsyncWrite for FakeWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        if let Some(FakeNode::File(data, _)) = self.server.tree.lock().get_mut(&self.path) {
            data.extend_from_slice(buf);
        }
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl crate::session::RemoteSession for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.server
                .disconnects
                .fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn list(&self, path: &str) -> FsResult<Vec<RawEntry>> {
        self.touch()?;
        if self
            .server
            .poison_next_list
            .swap(false, Ordering::SeqCst)
        {
            self.transport.store(false, Ordering::SeqCst);
            return Err(FsError::Disconnected);
        }
        let tree = self.server.tree.lock();
        match tree.get(path) {
            Some(FakeNode::Dir) => {}
            Some(_) => return Err(FsError::Protocol(format!("{} is not a directory", path))),
            None => return Err(FsError::FileNotFound(path.to_string())),
        }
        Ok(tree
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && p.as_str() != path && parent_of(p) == path)
            .map(|(p, node)| self.server.raw(p, node))
            .collect())
    }

    async fn stat(&self, path: &str) -> FsResult<RawEntry> {
        self.touch()?;
        let tree = self.server.tree.lock();
        match tree.get(path) {
            Some(FakeNode::Link(target)) => match tree.get(target) {
                Some(node) => {
                    let mut raw = self.server.raw(target, node);
                    raw.name = name_of(path);
                    Ok(raw)
                }
                None => Err(FsError::FileNotFound(target.clone())),
            },
            Some(node) => Ok(self.server.raw(path, node)),
            None => Err(FsError::FileNotFound(path.to_string())),
        }
    }

    async fn open_read(&self, path: &str, offset: u64) -> FsResult<crate::capability::ReadStream> {
        self.touch()?;
        match self.server.tree.lock().get(path) {
            Some(FakeNode::File(data, _)) => {
                let start = (offset as usize).min(data.len());
                Ok(Box::pin(std::io::Cursor::new(data[start..].to_vec())))
            }
            _ => Err(FsError::FileNotFound(path.to_string())),
        }
    }

    async fn open_write(&self, path: &str) -> FsResult<crate::capability::WriteStream> {
        self.touch()?;
        self.server
            .tree
            .lock()
            .insert(path.to_string(), FakeNode::File(Vec::new(), 0));
        Ok(Box::pin(FakeWriter {
            path: path.to_string(),
            server: self.server.clone(),
        }))
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        self.touch()?;
        match self.server.tree.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(FsError::FileNotFound(path.to_string())),
        }
    }

    async fn remove_dir(&self, path: &str) -> FsResult<()> {
        self.touch()?;
        let mut tree = self.server.tree.lock();
        if tree.keys().any(|p| p.as_str() != path && parent_of(p) == path) {
            return Err(FsError::Protocol(format!("{} is not empty", path)));
        }
        tree.remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::FileNotFound(path.to_string()))
    }

    async fn make_dir(&self, path: &str) -> FsResult<()> {
        self.touch()?;
        self.server.tree.lock().insert(path.to_string(), FakeNode::Dir);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.touch()?;
        let mut tree = self.server.tree.lock();
        let node = tree
            .remove(from)
            .ok_or_else(|| FsError::FileNotFound(from.to_string()))?;
        tree.insert(to.to_string(), node);
        Ok(())
    }
}
