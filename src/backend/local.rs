//! Local filesystem backend
//!
//! Blocking `std::fs` directory walks run on the blocking pool; streams use
//! `tokio::fs`. Listings are followed by a child count pass so callers can show
//! "3 folders, 12 files" next to every subdirectory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncSeekExt;
use tracing::debug;

use crate::adapter::local::from_metadata;
use crate::capability::{Describable, Editable, Listable, ReadStream, WriteStream};
use crate::entry::{ChildCounts, Entry, EntryKind, RawEntry};
use crate::error::{FsError, FsResult};
use crate::listing::{KeepPolicy, MergePolicy};
use crate::path_utils::is_valid_name;
use crate::uri::{FileUri, Scheme};

/// `file://` URIs
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Map an io error on `path` onto the listing error kinds
fn io_error(path: &Path, e: std::io::Error) -> FsError {
    match e.kind() {
        std::io::ErrorKind::NotFound => FsError::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.display().to_string()),
        _ => FsError::Io(e),
    }
}

fn local_path(uri: &FileUri) -> FsResult<PathBuf> {
    match uri.scheme()? {
        Scheme::File => uri.to_file_path(),
        other => Err(FsError::InvalidUri(format!("{:?} URI given to local backend: {}", other, uri))),
    }
}

async fn blocking<T, F>(f: F) -> FsResult<T>
where
    F: FnOnce() -> FsResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FsError::Protocol(format!("blocking task failed: {}", e)))?
}

/// Read `path` as a raw record, following a symlink one hop to classify it
fn stat_one_hop(path: &Path, name: String) -> std::io::Result<(RawEntry, Option<EntryKind>)> {
    let metadata = std::fs::symlink_metadata(path)?;
    let mut raw = from_metadata(name, &metadata);
    let mut target = None;
    if raw.is_symlink() {
        // dangling links stay unresolved and are reported as files
        if let Ok(resolved) = std::fs::metadata(path) {
            if resolved.is_dir() {
                target = Some(EntryKind::Directory);
            } else {
                target = Some(EntryKind::File);
                raw.size = resolved.len();
            }
        }
    }
    Ok((raw, target))
}

fn list_blocking(dir: &Path) -> FsResult<Vec<(RawEntry, Option<EntryKind>)>> {
    let metadata = std::fs::metadata(dir).map_err(|e| io_error(dir, e))?;
    if !metadata.is_dir() {
        return Err(FsError::FileNotFound(format!("{} is not a directory", dir.display())));
    }
    let mut records = Vec::new();
    for item in std::fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let item = item.map_err(|e| io_error(dir, e))?;
        let name = item.file_name().to_string_lossy().into_owned();
        match stat_one_hop(&item.path(), name) {
            Ok(record) => records.push(record),
            // raced with a delete
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(io_error(&item.path(), e)),
        }
    }
    Ok(records)
}

#[async_trait]
impl Listable for LocalBackend {
    async fn list(&self, dir: &FileUri) -> FsResult<Vec<Entry>> {
        let path = local_path(dir)?;
        debug!("Listing local directory {}", path.display());
        let records = blocking(move || list_blocking(&path)).await?;
        let dir = dir.normalized();
        Ok(records
            .into_iter()
            .map(|(raw, target)| {
                let uri = dir.join(&raw.name);
                Entry::from_raw(raw, uri, false, target)
            })
            .collect())
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::SeparateThenConcat
    }

    fn reports_child_counts(&self) -> bool {
        true
    }

    async fn count_children(&self, dir: &Entry, keep: &dyn KeepPolicy) -> FsResult<ChildCounts> {
        let path = local_path(dir.uri())?;
        let children = blocking(move || {
            let mut children = Vec::new();
            for item in std::fs::read_dir(&path).map_err(|e| io_error(&path, e))? {
                let item = item.map_err(|e| io_error(&path, e))?;
                let is_dir = std::fs::metadata(item.path()).map(|m| m.is_dir()).unwrap_or(false);
                children.push((item.file_name().to_string_lossy().into_owned(), is_dir));
            }
            Ok(children)
        })
        .await?;

        let mut counts = ChildCounts::default();
        for (name, is_dir) in children {
            if is_dir {
                if keep.keep_directory(&name) {
                    counts.directories += 1;
                }
            } else if keep.keep_file(&name) {
                counts.files += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl Editable for LocalBackend {
    async fn open_read(&self, uri: &FileUri, offset: u64) -> FsResult<ReadStream> {
        let path = local_path(uri)?;
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| io_error(&path, e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(Box::pin(file))
    }

    async fn open_write(&self, uri: &FileUri) -> FsResult<WriteStream> {
        let path = local_path(uri)?;
        let file = tokio::fs::File::create(&path).await.map_err(|e| io_error(&path, e))?;
        Ok(Box::pin(file))
    }

    async fn delete(&self, uri: &FileUri) -> FsResult<()> {
        let path = local_path(uri)?;
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        removed.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::FileNotFound(path.display().to_string()),
            _ => FsError::DeleteFailed(format!("{}: {}", path.display(), e)),
        })
    }

    async fn make_dir(&self, uri: &FileUri) -> FsResult<()> {
        let path = local_path(uri)?;
        tokio::fs::create_dir(&path).await.map_err(|e| io_error(&path, e))
    }

    async fn rename(&self, uri: &FileUri, new_name: &str) -> FsResult<()> {
        if !is_valid_name(new_name) {
            return Err(FsError::InvalidUri(format!("invalid name '{}'", new_name)));
        }
        let target = uri.normalized().with_name(new_name);
        self.move_to(uri, &target).await
    }

    async fn move_to(&self, uri: &FileUri, target: &FileUri) -> FsResult<()> {
        if !uri.same_authority(target) {
            return Err(FsError::Unsupported(format!("move from {} to {}", uri, target)));
        }
        let from = local_path(uri)?;
        let to = local_path(target)?;
        tokio::fs::rename(&from, &to).await.map_err(|e| io_error(&from, e))
    }

    async fn exists(&self, uri: &FileUri) -> FsResult<bool> {
        let path = local_path(uri)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[async_trait]
impl Describable for LocalBackend {
    async fn describe(&self, uri: &FileUri) -> FsResult<Entry> {
        let path = local_path(uri)?;
        let name = uri.name();
        let (raw, target) = blocking(move || stat_one_hop(&path, name).map_err(|e| io_error(&path, e))).await?;
        Ok(Entry::from_raw(raw, uri.normalized(), false, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{FileEditor, ProtectedPaths};
    use crate::listing::{control_queue, ListFilter, ListingEngine, ListingOptions};
    use std::sync::Arc;
    use crate::testing::{drive_until_end, Event, RecordingListener};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn fixture() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::create_dir(root.join("b_dir")).unwrap();
        std::fs::create_dir(root.join("z_dir")).unwrap();
        std::fs::create_dir(root.join(".cache")).unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();
        std::fs::write(root.join("m.txt"), b"mid").unwrap();
        std::fs::write(root.join(".hidden"), b"").unwrap();
        std::fs::write(root.join("b_dir").join("one.txt"), b"1").unwrap();
        std::fs::write(root.join("b_dir").join(".two"), b"2").unwrap();
        std::fs::create_dir(root.join("b_dir").join("inner")).unwrap();
        temp
    }

    fn uri(path: &Path) -> FileUri {
        FileUri::from_path(path).unwrap()
    }

    #[tokio::test]
    async fn test_list_and_describe_round_trip() {
        let temp = fixture();
        let backend = LocalBackend::new();
        let entries = backend.list(&uri(temp.path())).await.unwrap();
        assert_eq!(entries.len(), 6);
        assert!(entries.iter().all(|e| !e.is_remote()));

        for listed in &entries {
            let described = backend.describe(listed.uri()).await.unwrap();
            assert_eq!(&described, listed);
            assert_eq!(described.kind(), listed.kind());
            assert_eq!(described.size(), listed.size());
            assert_eq!(described.name(), listed.name());
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_file_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let result = LocalBackend::new().list(&uri(&temp.path().join("nope"))).await;
        assert!(matches!(result, Err(FsError::FileNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_resolved_one_hop() {
        let temp = fixture();
        std::os::unix::fs::symlink(temp.path().join("b_dir"), temp.path().join("link_dir")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("a.txt"), temp.path().join("link_file")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), temp.path().join("dangling")).unwrap();

        let entries = LocalBackend::new().list(&uri(temp.path())).await.unwrap();
        let find = |name: &str| entries.iter().find(|e| e.name() == name).unwrap();
        assert!(find("link_dir").is_directory());
        assert!(find("link_file").is_file());
        assert_eq!(find("link_file").size(), 5);
        assert!(find("dangling").is_file());
    }

    #[tokio::test]
    async fn test_listing_engine_with_child_counts() {
        let temp = fixture();
        let (handle, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(
            std::sync::Arc::new(LocalBackend::new()),
            uri(temp.path()),
            ListingOptions::new(std::sync::Arc::new(ListFilter::default())),
            handle,
            listener.clone(),
        );
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.updates(),
            vec![vec![
                "b_dir".to_string(),
                "z_dir".to_string(),
                "a.txt".to_string(),
                "m.txt".to_string()
            ]]
        );
        let events = listener.events();
        assert!(events.contains(&Event::FileInfo(
            "b_dir".to_string(),
            ChildCounts { files: 1, directories: 1 }
        )));
        assert!(events.contains(&Event::FileInfo("z_dir".to_string(), ChildCounts::default())));
        assert_eq!(events.last(), Some(&Event::End));
    }

    #[tokio::test]
    async fn test_stream_round_trip_with_offset() {
        let temp = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let target = uri(&temp.path().join("out.bin"));

        let mut writer = backend.open_write(&target).await.unwrap();
        writer.write_all(b"0123456789").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut reader = backend.open_read(&target, 4).await.unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"456789");
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let temp = fixture();
        let backend = LocalBackend::new();
        let dir = uri(&temp.path().join("b_dir"));
        backend.delete(&dir).await.unwrap();
        assert!(!backend.exists(&dir).await.unwrap());
        assert!(matches!(backend.delete(&dir).await, Err(FsError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_parent_of_protected_directory_is_kept() {
        let temp = fixture();
        let parent = temp.path().join("b_dir");
        let pictures = parent.join("Pictures");
        std::fs::create_dir(&pictures).unwrap();
        std::fs::write(pictures.join("a.jpg"), b"jpg").unwrap();

        let backend: Arc<LocalBackend> = Arc::new(LocalBackend::new());
        let protected = Arc::new(ProtectedPaths::new([&pictures]));
        let editor = FileEditor::new(uri(&parent), backend.clone(), protected.clone());

        assert!(matches!(editor.delete().await, Err(FsError::Protected(_))));
        assert!(matches!(editor.rename("moved").await, Err(FsError::Protected(_))));
        assert!(matches!(
            editor.move_to(&uri(&temp.path().join("z_dir").join("b_dir"))).await,
            Err(FsError::Protected(_))
        ));
        let root = FileEditor::new(uri(temp.path()), backend.clone(), protected.clone());
        assert!(matches!(root.delete().await, Err(FsError::Protected(_))));
        assert!(pictures.join("a.jpg").is_file());

        // siblings and children of the protected directory stay editable
        FileEditor::new(uri(&parent.join("one.txt")), backend.clone(), protected.clone())
            .delete()
            .await
            .unwrap();
        FileEditor::new(uri(&pictures.join("a.jpg")), backend, protected)
            .delete()
            .await
            .unwrap();
        assert!(!pictures.join("a.jpg").exists());
        assert!(pictures.is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_rename_move() {
        let temp = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let root = uri(temp.path());

        backend.make_dir(&root.join("new dir")).await.unwrap();
        assert!(temp.path().join("new dir").is_dir());

        backend.rename(&root.join("new dir"), "renamed").await.unwrap();
        assert!(temp.path().join("renamed").is_dir());

        backend.make_dir(&root.join("parent")).await.unwrap();
        backend
            .move_to(&root.join("renamed"), &root.join("parent").join("moved"))
            .await
            .unwrap();
        assert!(temp.path().join("parent").join("moved").is_dir());

        let zip_target = FileUri::parse("zip:///tmp/a.zip/x").unwrap();
        assert!(matches!(
            backend.move_to(&root.join("parent"), &zip_target).await,
            Err(FsError::Unsupported(_))
        ));
    }
}
