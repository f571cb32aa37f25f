//! `tokio::fs`-backed `FileStore`. Resource forks and Finder comments have
//! no native home on a non-Mac filesystem, so each lives in a hidden sibling
//! directory (`.rsrc`, `.comments`) next to the file it describes, keyed by
//! file name — dotfiles are already excluded from listings, so these never
//! show up as phantom entries.

use async_trait::async_trait;
use hotline::store::{EntryKind, FileStore, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

#[derive(Default)]
pub struct OSFileStore;

impl OSFileStore {
    pub fn new() -> OSFileStore {
        OSFileStore
    }
}

fn sidecar_path(path: &Path, subdir: &str) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap_or_default();
    parent.join(subdir).join(name)
}

#[async_trait]
impl FileStore for OSFileStore {
    async fn stat(&self, path: &Path) -> io::Result<Metadata> {
        let meta = fs::metadata(path).await?;
        Ok(Metadata {
            kind: if meta.is_dir() { EntryKind::Dir } else { EntryKind::File },
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            created: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    async fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to).await?;
        let _ = fs::rename(sidecar_path(from, ".rsrc"), sidecar_path(to, ".rsrc")).await;
        let _ = fs::rename(sidecar_path(from, ".comments"), sidecar_path(to, ".comments")).await;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::metadata(path).await?;
        if meta.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        let _ = fs::remove_file(sidecar_path(path, ".rsrc")).await;
        let _ = fs::remove_file(sidecar_path(path, ".comments")).await;
        Ok(())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        fs::symlink(target, link).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut entries = fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data).await
    }

    async fn append_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(data).await
    }

    async fn read_range(&self, path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn read_resource_fork(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(sidecar_path(path, ".rsrc")).await
    }

    async fn write_resource_fork(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let sidecar = sidecar_path(path, ".rsrc");
        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(sidecar, data).await
    }

    async fn read_comment(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(sidecar_path(path, ".comments")).await
    }

    async fn write_comment(&self, path: &Path, comment: &str) -> io::Result<()> {
        let sidecar = sidecar_path(path, ".comments");
        if comment.is_empty() {
            let _ = fs::remove_file(&sidecar).await;
            return Ok(());
        }
        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(sidecar, comment.as_bytes()).await
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("hotline-osfiles-{}-{}", label, nanos))
    }

    #[tokio::test]
    async fn write_then_read_range_roundtrips() {
        let root = scratch_dir("range");
        fs::create_dir_all(&root).await.unwrap();
        let store = OSFileStore::new();
        let path = root.join("greeting.txt");
        store.write_file(&path, b"hello world").await.unwrap();

        let chunk = store.read_range(&path, 6, 5).await.unwrap();
        assert_eq!(chunk, b"world");

        fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn resource_fork_sidecar_lives_alongside_the_file() {
        let root = scratch_dir("rsrc");
        fs::create_dir_all(&root).await.unwrap();
        let store = OSFileStore::new();
        let path = root.join("icon.bin");
        store.write_file(&path, b"data fork").await.unwrap();
        store.write_resource_fork(&path, b"resource bytes").await.unwrap();

        let fork = store.read_resource_fork(&path).await.unwrap();
        assert_eq!(fork, b"resource bytes");

        fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn append_file_grows_an_existing_file() {
        let root = scratch_dir("append");
        fs::create_dir_all(&root).await.unwrap();
        let store = OSFileStore::new();
        let path = root.join("incoming.incomplete");
        store.append_file(&path, b"part one ").await.unwrap();
        store.append_file(&path, b"part two").await.unwrap();

        let whole = store.read_file(&path).await.unwrap();
        assert_eq!(whole, b"part one part two");

        fs::remove_dir_all(&root).await.unwrap();
    }
}
