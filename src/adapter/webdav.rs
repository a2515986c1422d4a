//! WebDAV `PROPFIND` resources

use chrono::DateTime;
use percent_encoding::percent_decode_str;

use crate::entry::RawEntry;

/// One `<d:response>` of a depth-1 `PROPFIND`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResource {
    pub href: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    /// `getlastmodified`, RFC 1123
    pub last_modified: Option<String>,
}

fn decoded_path(href: &str) -> String {
    // hrefs may be absolute URLs or absolute paths
    let path = match href.find("://") {
        Some(scheme_end) => {
            let rest = &href[scheme_end + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        None => href,
    };
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

pub fn from_resource(resource: &DavResource) -> Option<RawEntry> {
    let path = decoded_path(&resource.href);
    let name = path.trim_end_matches('/').rsplit('/').next()?.to_string();
    if name.is_empty() {
        return None;
    }
    let modified = resource
        .last_modified
        .as_deref()
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|stamp| stamp.timestamp_millis())
        .unwrap_or(0);
    Some(if resource.is_collection {
        RawEntry::directory(name, modified)
    } else {
        RawEntry::file(name, resource.content_length.unwrap_or(0), modified)
    })
}

/// Children of `dir_path`; the response describing the directory itself is dropped
pub fn from_multistatus(dir_path: &str, resources: &[DavResource]) -> Vec<RawEntry> {
    let own = dir_path.trim_end_matches('/');
    resources
        .iter()
        .filter(|r| decoded_path(&r.href).trim_end_matches('/') != own)
        .filter_map(from_resource)
        .collect()
}
