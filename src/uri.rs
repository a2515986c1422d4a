//! URI handling
//!
//! Every entry is addressed by a canonical URI. Directory URIs are kept without a
//! trailing slash (except the root) so an entry produced by a listing compares equal
//! to the entry produced by describing the same location.

use std::fmt;
use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FsError, FsResult};

/// Characters escaped inside a single path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Storage backend selected by the URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    File,
    Content,
    Zip,
    Ftp,
    Ftps,
    Sftp,
    Smb,
    WebDav,
    WebDavs,
}

impl Scheme {
    pub fn parse(scheme: &str) -> FsResult<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "file" => Ok(Scheme::File),
            "content" => Ok(Scheme::Content),
            "zip" => Ok(Scheme::Zip),
            "ftp" => Ok(Scheme::Ftp),
            "ftps" => Ok(Scheme::Ftps),
            "sftp" | "ssh" => Ok(Scheme::Sftp),
            "smb" | "smb2" | "cifs" => Ok(Scheme::Smb),
            "webdav" | "dav" => Ok(Scheme::WebDav),
            "webdavs" | "davs" => Ok(Scheme::WebDavs),
            other => Err(FsError::InvalidUri(format!("unsupported scheme '{}'", other))),
        }
    }

    /// True for every backend that talks to a server
    pub fn is_remote(&self) -> bool {
        !matches!(self, Scheme::File | Scheme::Content | Scheme::Zip)
    }
}

/// Canonical location of an entry
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileUri(Url);

impl FileUri {
    pub fn parse(input: &str) -> FsResult<Self> {
        let url = Url::parse(input).map_err(|e| FsError::InvalidUri(format!("{}: {}", input, e)))?;
        Ok(Self(url))
    }

    /// Build a `file://` URI from an absolute local path
    pub fn from_path(path: &Path) -> FsResult<Self> {
        Url::from_file_path(path)
            .map(Self)
            .map_err(|_| FsError::InvalidUri(format!("not an absolute path: {}", path.display())))
    }

    pub fn scheme(&self) -> FsResult<Scheme> {
        Scheme::parse(self.0.scheme())
    }

    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.0.port()
    }

    /// Username embedded in the authority, if any
    pub fn username(&self) -> Option<String> {
        let user = self.0.username();
        if user.is_empty() {
            None
        } else {
            Some(decode(user))
        }
    }

    pub fn password(&self) -> Option<String> {
        self.0.password().map(decode)
    }

    /// Percent-decoded path
    pub fn path(&self) -> String {
        let path = decode(self.0.path());
        if path.is_empty() {
            "/".to_string()
        } else {
            path
        }
    }

    /// Last path segment, empty for the root
    pub fn name(&self) -> String {
        self.path()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// The URI stripped of user info and path, used to key pooled connections
    pub fn credential_key(&self) -> String {
        let mut key = format!("{}://{}", self.0.scheme(), self.0.host_str().unwrap_or_default());
        if let Some(port) = self.0.port() {
            key.push(':');
            key.push_str(&port.to_string());
        }
        key
    }

    /// Same scheme, host and port
    pub fn same_authority(&self, other: &FileUri) -> bool {
        self.0.scheme() == other.0.scheme()
            && self.0.host_str() == other.0.host_str()
            && self.0.port_or_known_default() == other.0.port_or_known_default()
    }

    /// Child URI for `name` inside this directory
    pub fn join(&self, name: &str) -> FileUri {
        let mut path = self.0.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(&utf8_percent_encode(name, SEGMENT).to_string());
        let mut url = self.0.clone();
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        FileUri(url)
    }

    /// Sibling URI with the last segment replaced
    pub fn with_name(&self, name: &str) -> FileUri {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => self.join(name),
        }
    }

    pub fn parent(&self) -> Option<FileUri> {
        let path = self.0.path().trim_end_matches('/');
        if path.is_empty() {
            return None;
        }
        let cut = path.rfind('/')?;
        let mut url = self.0.clone();
        url.set_path(if cut == 0 { "/" } else { &path[..cut] });
        Some(FileUri(url))
    }

    /// Canonical form: no trailing slash except on the root
    pub fn normalized(&self) -> FileUri {
        let path = self.0.path();
        if path.len() > 1 && path.ends_with('/') {
            let mut url = self.0.clone();
            url.set_path(path.trim_end_matches('/'));
            FileUri(url)
        } else {
            self.clone()
        }
    }

    /// Local filesystem path for `file://` URIs
    pub fn to_file_path(&self) -> FsResult<PathBuf> {
        self.0
            .to_file_path()
            .map_err(|_| FsError::InvalidUri(format!("not a local path: {}", self.0)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

impl fmt::Display for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl fmt::Debug for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileUri({})", self.0)
    }
}

impl std::str::FromStr for FileUri {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileUri::parse(s)
    }
}
