//! Listener contract for listing engines

use crate::entry::Entry;
use crate::error::{ErrorKind, FsError};
use crate::uri::FileUri;

/// Receives the outcome of one listing
///
/// Callbacks are always invoked from the control queue. For one engine the order is
/// `on_listing_start`, then at most one of `on_listing_update`,
/// `on_credential_required` or `on_listing_fatal_error`, then `on_listing_end`
/// exactly once.
pub trait ListingListener: Send + Sync {
    fn on_listing_start(&self) {}

    fn on_listing_update(&self, entries: Vec<Entry>);

    /// Supplemental metadata for one directory of an already delivered listing
    fn on_listing_file_info_update(&self, _uri: &FileUri, _entry: &Entry) {}

    /// The timer fired before discovery finished. `on_listing_end` follows.
    fn on_listing_timeout(&self) {}

    fn on_credential_required(&self, cause: &FsError);

    fn on_listing_fatal_error(&self, cause: &FsError, kind: ErrorKind);

    fn on_listing_end(&self);
}
