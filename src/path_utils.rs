//! Remote path utilities
//!
//! Remote protocols (SFTP, FTP, SMB shares, WebDAV, paths inside ZIP archives) always
//! use `/` as separator, whatever the local or remote OS.

/// Check if a remote path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    let component = component.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Strip trailing separators, keeping the root as `/`.
pub fn strip_trailing_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Parent of a remote path; the root has none.
pub fn parent_remote_path(path: &str) -> Option<&str> {
    let path = strip_trailing_slash(path);
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last segment of a remote path, empty for the root.
pub fn remote_name(path: &str) -> &str {
    strip_trailing_slash(path).rsplit('/').next().unwrap_or_default()
}

/// Whether `name` is a plain path segment usable for rename.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}
