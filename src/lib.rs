//! OxideFs - unified file access over local, archive and network storage
//!
//! Every location is addressed by a [`FileUri`]. The [`Backends`] registry maps its
//! scheme to a backend, and hands out [`ListingEngine`]s for directory discovery and
//! [`FileEditor`]s for stream-based editing. Network backends borrow their connections
//! from per-protocol [`SessionPool`]s.

pub mod adapter;
pub mod backend;
pub mod capability;
pub mod config;
pub mod credentials;
pub mod editor;
pub mod entry;
pub mod error;
pub mod listing;
pub mod path_utils;
pub mod session;
pub mod uri;

#[cfg(test)]
mod testing;

pub use backend::{Backend, Backends, BackendsBuilder, DocumentProvider, ProtocolProfile};
pub use capability::{Describable, Editable, Listable, ReadStream, WriteStream};
pub use config::{ConfigStorage, FsConfig};
pub use credentials::{Credential, CredentialStore, MemoryCredentialStore};
pub use editor::{FileEditor, ProtectedPaths};
pub use entry::{ChildCounts, Entry, EntryKind, RawEntry};
pub use error::{ErrorKind, FsError, FsResult};
pub use listing::{
    control_queue, ControlHandle, ControlQueue, ListFilter, ListingEngine, ListingListener, ListingOptions,
    ListingState, MergePolicy, SortOrder,
};
pub use session::{AcquireMode, Connector, Endpoint, RemoteSession, SessionPool};
pub use uri::{FileUri, Scheme};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for binaries embedding this crate.
///
/// `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
