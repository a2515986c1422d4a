//! Backend entry adapters
//!
//! One adapter per protocol, each turning native directory records into
//! [`crate::entry::RawEntry`] values. Wire clients call these before handing records to
//! the listing engines.

pub mod ftp;
pub mod local;
pub mod sftp;
pub mod smb;
pub mod webdav;
pub mod zip;

/// `.` and `..` never appear in listings
pub(crate) fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}
