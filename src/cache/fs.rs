//! Filesystem Module
//!
//! The narrow set of filesystem calls the cache makes, behind a trait so the
//! cache can run against the real disk or an in-memory tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::clock::Clock;

// == File Metadata ==
/// Size and last-modified time of a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    /// Size in bytes
    pub len: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

impl FileMeta {
    fn from_std(meta: &std::fs::Metadata) -> io::Result<Self> {
        Ok(Self {
            len: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
        })
    }
}

/// A regular file found by [`CacheFs::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub meta: FileMeta,
}

// == CacheFs Trait ==
/// Filesystem operations used by the cache.
#[async_trait]
pub trait CacheFs: Send + Sync + Debug {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Writes `contents`, replacing the file and bumping its modified time.
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Metadata of a regular file; `NotFound` for anything else.
    async fn metadata(&self, path: &Path) -> io::Result<FileMeta>;

    /// Regular files directly inside `path` (no recursion, no directories).
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<FileEntry>>;
}

// == Tokio Filesystem ==
/// The real filesystem through `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFs;

#[async_trait]
impl CacheFs for TokioFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    async fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a regular file", path.display()),
            ));
        }
        FileMeta::from_std(&meta)
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;

        while let Some(entry) = dir.next_entry().await? {
            // Files can disappear between listing and stat
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !meta.is_file() {
                continue;
            }
            entries.push(FileEntry {
                path: entry.path(),
                meta: FileMeta::from_std(&meta)?,
            });
        }

        Ok(entries)
    }
}

// == In-Memory Filesystem ==
#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryTree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, MemFile>,
}

/// An in-memory filesystem whose modification times come from a [`Clock`].
///
/// Writes into a directory that was never created fail with `NotFound`, the
/// same way the real filesystem does.
#[derive(Debug)]
pub struct MemoryFs {
    tree: Mutex<MemoryTree>,
    clock: Arc<dyn Clock>,
    fail_writes: AtomicBool,
    fail_writes_to: Mutex<BTreeSet<PathBuf>>,
    fail_removes: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFs {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tree: Mutex::new(MemoryTree::default()),
            clock,
            fail_writes: AtomicBool::new(false),
            fail_writes_to: Mutex::new(BTreeSet::new()),
            fail_removes: Mutex::new(BTreeSet::new()),
        }
    }

    /// Makes every subsequent write fail, as a full or read-only disk would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes writes to `path` alone fail.
    pub fn fail_writes_for(&self, path: impl Into<PathBuf>) {
        lock_set(&self.fail_writes_to).insert(path.into());
    }

    /// Makes removing `path` fail, as a file locked by another process would.
    pub fn fail_removes_for(&self, path: impl Into<PathBuf>) {
        lock_set(&self.fail_removes).insert(path.into());
    }

    /// Overrides the modified time of an existing file.
    pub fn set_modified(&self, path: &Path, modified: DateTime<Utc>) -> io::Result<()> {
        let mut tree = self.lock();
        let file = tree.files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.modified = modified;
        Ok(())
    }

    /// Number of files currently stored anywhere in the tree.
    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryTree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_set(set: &Mutex<BTreeSet<PathBuf>>) -> MutexGuard<'_, BTreeSet<PathBuf>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

#[async_trait]
impl CacheFs for MemoryFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            tree.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .map(|file| file.data.clone())
            .ok_or_else(|| not_found(path))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let fail = self.fail_writes.load(Ordering::SeqCst)
            || lock_set(&self.fail_writes_to).contains(path);
        if fail {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("writes disabled for {}", path.display()),
            ));
        }

        let mut tree = self.lock();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !tree.dirs.contains(parent) {
                return Err(not_found(parent));
            }
        }
        tree.files.insert(
            path.to_path_buf(),
            MemFile {
                data: contents.to_vec(),
                modified: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        if lock_set(&self.fail_removes).contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot remove {}", path.display()),
            ));
        }

        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.lock();
        if !tree.dirs.contains(path) {
            return Err(not_found(path));
        }
        tree.dirs.retain(|dir| !dir.starts_with(path));
        tree.files.retain(|file, _| !file.starts_with(path));
        Ok(())
    }

    async fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        self.lock()
            .files
            .get(path)
            .map(|file| FileMeta {
                len: file.data.len() as u64,
                modified: file.modified,
            })
            .ok_or_else(|| not_found(path))
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<FileEntry>> {
        let tree = self.lock();
        if !tree.dirs.contains(path) {
            return Err(not_found(path));
        }
        Ok(tree
            .files
            .iter()
            .filter(|(file, _)| file.parent() == Some(path))
            .map(|(file, data)| FileEntry {
                path: file.clone(),
                meta: FileMeta {
                    len: data.data.len() as u64,
                    modified: data.modified,
                },
            })
            .collect())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use chrono::Duration;

    fn memory_fs() -> (Arc<ManualClock>, MemoryFs) {
        let clock = Arc::new(ManualClock::default());
        let fs = MemoryFs::new(clock.clone());
        (clock, fs)
    }

    #[tokio::test]
    async fn test_memory_write_requires_parent_dir() {
        let (_, fs) = memory_fs();
        let path = Path::new("/cache/workitems/a.json");

        let err = fs.write(path, b"{}").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.create_dir_all(Path::new("/cache/workitems")).await.unwrap();
        fs.write(path, b"{}").await.unwrap();
        assert_eq!(fs.read(path).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_memory_modified_follows_clock() {
        let (clock, fs) = memory_fs();
        let path = Path::new("/cache/a.json");
        fs.create_dir_all(Path::new("/cache")).await.unwrap();

        fs.write(path, b"1").await.unwrap();
        let first = fs.metadata(path).await.unwrap().modified;

        clock.advance(Duration::seconds(30));
        fs.write(path, b"22").await.unwrap();
        let meta = fs.metadata(path).await.unwrap();

        assert_eq!(meta.modified - first, Duration::seconds(30));
        assert_eq!(meta.len, 2);
    }

    #[tokio::test]
    async fn test_memory_read_dir_lists_direct_children_only() {
        let (_, fs) = memory_fs();
        fs.create_dir_all(Path::new("/cache/workitems")).await.unwrap();
        fs.write(Path::new("/cache/top.json"), b"x").await.unwrap();
        fs.write(Path::new("/cache/workitems/a.json"), b"x").await.unwrap();

        let entries = fs.read_dir(Path::new("/cache")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/cache/top.json"));
    }

    #[tokio::test]
    async fn test_memory_remove_dir_all() {
        let (_, fs) = memory_fs();
        fs.create_dir_all(Path::new("/cache/workitems")).await.unwrap();
        fs.write(Path::new("/cache/workitems/a.json"), b"x").await.unwrap();

        fs.remove_dir_all(Path::new("/cache")).await.unwrap();
        assert_eq!(fs.file_count(), 0);
        assert!(fs.read_dir(Path::new("/cache")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_fail_writes() {
        let (_, fs) = memory_fs();
        fs.create_dir_all(Path::new("/cache")).await.unwrap();
        fs.set_fail_writes(true);

        let err = fs.write(Path::new("/cache/a.json"), b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_tokio_fs_read_dir_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFs;
        fs.create_dir_all(&dir.path().join("nested")).await.unwrap();
        fs.write(&dir.path().join("a.json"), b"abc").await.unwrap();

        let entries = fs.read_dir(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].meta.len, 3);

        let err = fs.metadata(&dir.path().join("nested")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
