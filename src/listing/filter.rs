//! Keep predicates applied to every listed name

use serde::{Deserialize, Serialize};

/// Decides which names appear in a listing
pub trait KeepPolicy: Send + Sync {
    fn keep_file(&self, name: &str) -> bool;
    fn keep_directory(&self, name: &str) -> bool;
}

/// SMB administrative shares never shown to users
const HIDDEN_SHARES: [&str; 2] = ["IPC$", "print$"];

/// Configurable keep policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    /// Show entries whose name starts with `.`
    #[serde(default)]
    pub show_hidden: bool,
    /// Lowercase extensions (without dot) to keep; empty keeps everything
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Mime prefixes such as `video/` or exact types to keep; empty keeps everything
    #[serde(default)]
    pub mime_types: Vec<String>,
    /// Glob pattern files must match
    #[serde(default)]
    pub pattern: Option<String>,
}

impl ListFilter {
    pub fn show_all() -> Self {
        Self {
            show_hidden: true,
            ..Self::default()
        }
    }

    fn extension_allowed(&self, name: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match name.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext))
            }
            None => false,
        }
    }

    fn mime_allowed(&self, name: &str) -> bool {
        if self.mime_types.is_empty() {
            return true;
        }
        let guessed = match mime_guess::from_path(name).first() {
            Some(mime) => mime.essence_str().to_string(),
            None => return false,
        };
        self.mime_types.iter().any(|wanted| {
            if wanted.ends_with('/') || wanted.ends_with("/*") {
                guessed.starts_with(wanted.trim_end_matches('*'))
            } else {
                guessed == *wanted
            }
        })
    }

    fn pattern_allowed(&self, name: &str) -> bool {
        match &self.pattern {
            // An invalid pattern filters nothing
            Some(pattern) => glob::Pattern::new(pattern)
                .map(|p| p.matches(name))
                .unwrap_or(true),
            None => true,
        }
    }
}

impl KeepPolicy for ListFilter {
    fn keep_file(&self, name: &str) -> bool {
        if !self.show_hidden && name.starts_with('.') {
            return false;
        }
        self.extension_allowed(name) && self.mime_allowed(name) && self.pattern_allowed(name)
    }

    fn keep_directory(&self, name: &str) -> bool {
        let bare = name.trim_end_matches('/');
        if !self.show_hidden && bare.starts_with('.') {
            return false;
        }
        !HIDDEN_SHARES.contains(&bare)
    }
}
