//! Credential resolution
//!
//! Session pools key their connections by [`Credential`]. Credentials come from a
//! [`CredentialStore`]; when nothing is stored for a URI the pool falls back to an
//! anonymous (or guest) identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::uri::FileUri;

/// Resolved identity for one server
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// URI without its path, e.g. `sftp://host:2222`
    pub key: String,
    #[serde(default)]
    pub anonymous: bool,
}

impl Credential {
    pub fn new(key: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: None,
            key: key.into(),
            anonymous: false,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Anonymous identity for `key` using the protocol's fallback user name
    pub fn anonymous(key: impl Into<String>, username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: String::new(),
            domain: None,
            key: key.into(),
            anonymous: true,
        }
    }
}

// Pool lookup compares the key fields, never identity.
impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.username == other.username
            && self.password == other.password
            && self.domain == other.domain
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.username.hash(state);
        self.password.hash(state);
        self.domain.hash(state);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .field("domain", &self.domain)
            .field("key", &self.key)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Keyed lookup from URI to stored credential
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, uri: &str) -> Option<Credential>;
}

/// In-process credential store
///
/// Lookup order: exact URI, URI without trailing slash, then the longest stored
/// parent whose match ends on a path boundary.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, credential: Credential) {
        self.entries.insert(uri.into(), credential);
    }

    pub fn remove(&self, uri: &str) -> Option<Credential> {
        self.entries.remove(uri).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, uri: &str) -> Option<Credential> {
        if let Some(found) = self.entries.get(uri) {
            return Some(found.clone());
        }
        if let Some(stripped) = uri.strip_suffix('/') {
            if let Some(found) = self.entries.get(stripped) {
                return Some(found.clone());
            }
        }

        let mut best: Option<(usize, Credential)> = None;
        for item in self.entries.iter() {
            let parent = item.key();
            if !uri.starts_with(parent.as_str()) {
                continue;
            }
            let on_boundary = parent.ends_with('/') || uri[parent.len()..].starts_with('/');
            if !on_boundary {
                continue;
            }
            if best.as_ref().map_or(true, |(len, _)| parent.len() > *len) {
                best = Some((parent.len(), item.value().clone()));
            }
        }
        best.map(|(_, credential)| credential)
    }
}

/// Resolve the credential for `uri`, falling back to `fallback_user` anonymously.
///
/// The returned credential is always keyed by the URI's authority so every path on the
/// same server shares one pool slot. User info embedded in the URI wins over the store.
pub fn resolve(store: &dyn CredentialStore, uri: &FileUri, fallback_user: &str) -> Credential {
    let key = uri.credential_key();
    if let Some(username) = uri.username() {
        return Credential::new(key, username, uri.password().unwrap_or_default());
    }
    match store.lookup(uri.as_str()) {
        Some(stored) => Credential { key, ..stored },
        None => Credential::anonymous(key, fallback_user),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryCredentialStore {
        let store = MemoryCredentialStore::new();
        store.insert("smb://nas/share", Credential::new("smb://nas", "alice", "pw1"));
        store.insert("smb://nas/share/private", Credential::new("smb://nas", "bob", "pw2"));
        store.insert("ftp://host/", Credential::new("ftp://host", "carol", "pw3"));
        store
    }

    #[test]
    fn test_exact_and_trailing_slash() {
        let store = store();
        assert_eq!(store.lookup("smb://nas/share").unwrap().username, "alice");
        assert_eq!(store.lookup("smb://nas/share/").unwrap().username, "alice");
    }

    #[test]
    fn test_longest_parent_prefix() {
        let store = store();
        assert_eq!(store.lookup("smb://nas/share/private/x/y").unwrap().username, "bob");
        assert_eq!(store.lookup("smb://nas/share/public").unwrap().username, "alice");
        assert_eq!(store.lookup("ftp://host/pub/file").unwrap().username, "carol");
    }

    #[test]
    fn test_prefix_must_end_on_boundary() {
        let store = store();
        assert!(store.lookup("smb://nas/shared").is_none());
    }

    #[test]
    fn test_resolve_falls_back_to_anonymous() {
        let store = store();
        let uri = FileUri::parse("sftp://elsewhere/home").unwrap();
        let cred = resolve(&store, &uri, "anonymous");
        assert!(cred.anonymous);
        assert_eq!(cred.username, "anonymous");
        assert_eq!(cred.key, "sftp://elsewhere");
    }

    #[test]
    fn test_resolve_rekeys_stored_credential() {
        let store = store();
        let uri = FileUri::parse("smb://nas/share/docs").unwrap();
        let cred = resolve(&store, &uri, "guest");
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.key, "smb://nas");
        assert!(!cred.anonymous);
    }

    #[test]
    fn test_userinfo_wins() {
        let store = store();
        let uri = FileUri::parse("ftp://dave:pw@host/pub").unwrap();
        let cred = resolve(&store, &uri, "anonymous");
        assert_eq!(cred.username, "dave");
        assert_eq!(cred.password, "pw");
    }

    #[test]
    fn test_equality_ignores_anonymous_flag() {
        let a = Credential::anonymous("ftp://h", "anonymous");
        let mut b = a.clone();
        b.anonymous = false;
        assert_eq!(a, b);
        assert!(!format!("{:?}", Credential::new("k", "u", "secret")).contains("secret"));
    }
}
