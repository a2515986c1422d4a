//! SFTP connector over russh
//!
//! One SSH connection carries one SFTP subsystem channel. The pool decides how many
//! of these exist; this module only knows how to open, use and close one.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use russh::client;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tokio::io::AsyncSeekExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::adapter::is_dot_entry;
use crate::adapter::sftp::from_attributes;
use crate::capability::{ReadStream, WriteStream};
use crate::credentials::Credential;
use crate::entry::RawEntry;
use crate::error::{FsError, FsResult};
use crate::path_utils::remote_name;
use crate::session::{Connector, Endpoint, RemoteSession};

/// Host keys seen during this process, `host:port` -> key blob
type SeenHostKeys = Arc<DashMap<String, Vec<u8>>>;

/// Opens authenticated SFTP sessions
pub struct SftpConnector {
    config: Arc<client::Config>,
    seen_keys: SeenHostKeys,
}

impl SftpConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            seen_keys: Arc::new(DashMap::new()),
        }
    }
}

impl Default for SftpConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Trust on first use: the first key a host presents is pinned for the lifetime of
/// the connector, a different key afterwards is rejected.
struct SftpHandler {
    host: String,
    seen_keys: SeenHostKeys,
}

impl client::Handler for SftpHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let presented = server_public_key.public_key_bytes();
        match self.seen_keys.get(&self.host) {
            Some(pinned) if *pinned != presented => {
                warn!("Host key for {} changed since first connection, rejecting", self.host);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => {
                info!("Pinning host key for {}", self.host);
                self.seen_keys.insert(self.host.clone(), presented);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&self, endpoint: &Endpoint, credential: &Credential) -> FsResult<Arc<dyn RemoteSession>> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        info!("Connecting to SFTP server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| FsError::UnknownHost(format!("{}: {}", endpoint.host, e)))?
            .next()
            .ok_or_else(|| FsError::UnknownHost(endpoint.host.clone()))?;

        let handler = SftpHandler {
            host: addr.clone(),
            seen_keys: self.seen_keys.clone(),
        };
        let mut handle = client::connect(self.config.clone(), socket_addr, handler)
            .await
            .map_err(|e| FsError::HostNotFound(format!("{}: {}", addr, e)))?;
        debug!("SSH handshake with {} completed", addr);

        let authenticated = if credential.anonymous {
            handle.authenticate_none(&credential.username).await
        } else {
            handle
                .authenticate_password(&credential.username, &credential.password)
                .await
        };
        let authenticated = match authenticated {
            Ok(result) => result.success(),
            Err(e) => {
                warn!("Authentication exchange with {} failed: {}", addr, e);
                false
            }
        };
        if !authenticated {
            // 认证失败：关闭半开连接
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(FsError::AuthenticationFailed(format!(
                "{} rejected {}",
                addr, credential.username
            )));
        }

        let sftp = match open_subsystem(&handle).await {
            Ok(sftp) => sftp,
            Err(e) => {
                let _ = handle
                    .disconnect(russh::Disconnect::ByApplication, "sftp unavailable", "en")
                    .await;
                return Err(e);
            }
        };
        info!("SFTP subsystem opened on {}", addr);

        Ok(Arc::new(SftpSession {
            owner: spawn_handle_owner(handle, addr),
            sftp,
            closed: AtomicBool::new(false),
        }))
    }
}

async fn open_subsystem(handle: &client::Handle<SftpHandler>) -> FsResult<RusshSftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| FsError::ConnectionFailed(format!("channel open failed: {}", e)))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| FsError::ConnectionFailed(format!("sftp subsystem request failed: {}", e)))?;
    RusshSftpSession::new(channel.into_stream())
        .await
        .map_err(|e| FsError::ConnectionFailed(format!("sftp subsystem unavailable: {}", e)))
}

/// How often the owner task checks whether the transport went away
const TRANSPORT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

enum HandleCommand {
    Disconnect { reply_tx: oneshot::Sender<()> },
}

/// Sending side of the task that owns the SSH handle
///
/// The owner task exits when the transport closes, so a closed command channel means
/// the connection is gone.
struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(HandleCommand::Disconnect { reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

fn spawn_handle_owner(handle: client::Handle<SftpHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(4);
    tokio::spawn(async move {
        let handle = handle;
        let mut check = tokio::time::interval(TRANSPORT_CHECK_INTERVAL);
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::Disconnect { reply_tx }) => {
                        if let Err(e) = handle
                            .disconnect(russh::Disconnect::ByApplication, "", "en")
                            .await
                        {
                            debug!("SSH disconnect from {} failed: {}", label, e);
                        }
                        let _ = reply_tx.send(());
                        break;
                    }
                    None => {
                        let _ = handle
                            .disconnect(russh::Disconnect::ByApplication, "", "en")
                            .await;
                        break;
                    }
                },
                _ = check.tick() => {
                    if handle.is_closed() {
                        info!("SSH transport to {} closed", label);
                        break;
                    }
                }
            }
        }
        debug!("Handle owner for {} exited", label);
    });
    HandleController { cmd_tx }
}

/// Classify an SFTP failure on `path` from its message
fn map_sftp_message(message: &str, path: &str) -> FsError {
    let lower = message.to_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        FsError::FileNotFound(path.to_string())
    } else if lower.contains("permission denied") {
        FsError::PermissionDenied(path.to_string())
    } else if lower.contains("closed") || lower.contains("timeout") || lower.contains("eof") {
        FsError::Disconnected
    } else {
        FsError::Protocol(format!("{}: {}", path, message))
    }
}

fn map_sftp_error(err: SftpErrorInner, path: &str) -> FsError {
    map_sftp_message(&err.to_string(), path)
}

/// One SSH connection with its SFTP channel
struct SftpSession {
    owner: HandleController,
    sftp: RusshSftpSession,
    closed: AtomicBool,
}

#[async_trait]
impl RemoteSession for SftpSession {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.owner.is_connected()
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sftp.close().await;
        self.owner.disconnect().await;
    }

    async fn list(&self, path: &str) -> FsResult<Vec<RawEntry>> {
        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(read_dir
            .filter(|entry| !is_dot_entry(&entry.file_name()))
            .map(|entry| from_attributes(entry.file_name(), &entry.metadata()))
            .collect())
    }

    async fn stat(&self, path: &str) -> FsResult<RawEntry> {
        let attrs = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(from_attributes(remote_name(path), &attrs))
    }

    async fn open_read(&self, path: &str, offset: u64) -> FsResult<ReadStream> {
        let mut file = self.sftp.open(path).await.map_err(|e| map_sftp_error(e, path))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(Box::pin(file))
    }

    async fn open_write(&self, path: &str) -> FsResult<WriteStream> {
        let file = self.sftp.create(path).await.map_err(|e| map_sftp_error(e, path))?;
        Ok(Box::pin(file))
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        self.sftp.remove_file(path).await.map_err(|e| map_sftp_error(e, path))
    }

    async fn remove_dir(&self, path: &str) -> FsResult<()> {
        self.sftp.remove_dir(path).await.map_err(|e| map_sftp_error(e, path))
    }

    async fn make_dir(&self, path: &str) -> FsResult<()> {
        self.sftp.create_dir(path).await.map_err(|e| map_sftp_error(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.sftp.rename(from, to).await.map_err(|e| map_sftp_error(e, from))
    }
}
