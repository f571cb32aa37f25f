//! Persisted-state interfaces the core consumes but does not implement.
//!
//! Concrete backings (YAML account files, a durable news tree, an
//! `OSFileStore`) are an external collaborator's job. These traits are
//! the seam a binary crate fills in.

use crate::access::Access;
use crate::models::{Account, FileResumeData, NewsArtData, NewsNode, NewsNodeType};
use async_trait::async_trait;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::time::SystemTime;

/// CRUD for user accounts, keyed by login string.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, login: &str) -> Option<Account>;
    async fn create(&self, account: Account) -> crate::Result<()>;
    async fn update(&self, login: &str, account: Account) -> crate::Result<()>;
    /// Renames the account's login, keeping its other fields.
    async fn rename(&self, old_login: &str, new_login: &str) -> crate::Result<()>;
    async fn delete(&self, login: &str) -> crate::Result<()>;
    async fn list(&self) -> Vec<Account>;
}

/// IP ban list: an address maps to an optional expiry. `None` means a
/// permanent ban; an expiry in the past means the ban has lapsed.
#[async_trait]
pub trait BanList: Send + Sync {
    async fn is_banned(&self, ip: IpAddr) -> (bool, Option<SystemTime>);
    async fn add(&self, ip: IpAddr, expiry: Option<SystemTime>);
    async fn remove(&self, ip: IpAddr);
}

/// Temporary-ban duration used by `TranDisconnectUser` and the banned-peer
/// path of the connection handler.
pub const TEMP_BAN_DURATION: std::time::Duration = std::time::Duration::from_secs(30 * 60);

/// A path into the threaded-news tree: category/bundle names from the root.
pub type NewsPath = Vec<String>;

/// Durable snapshot of the threaded-news tree plus the flat message board.
#[async_trait]
pub trait ThreadedNewsStore: Send + Sync {
    async fn get_categories(&self, path: &NewsPath) -> crate::Result<Vec<NewsNode>>;
    async fn create_grouping(&self, path: &NewsPath, name: &str, kind: NewsNodeType) -> crate::Result<()>;
    async fn delete_news_item(&self, path: &NewsPath) -> crate::Result<()>;
    async fn news_item(&self, path: &NewsPath) -> crate::Result<Option<NewsNode>>;
    async fn list_articles(&self, path: &NewsPath) -> crate::Result<Vec<(u32, NewsArtData)>>;
    async fn get_article(&self, path: &NewsPath, id: u32) -> crate::Result<Option<NewsArtData>>;
    async fn post_article(&self, path: &NewsPath, parent_id: u32, art: NewsArtData) -> crate::Result<u32>;
    async fn delete_article(&self, path: &NewsPath, id: u32, recursive: bool) -> crate::Result<()>;
}

/// A seekable read-write byte stream backing the flat message board. Writes
/// prepend; reads return the whole current log.
#[async_trait]
pub trait FlatNewsStore: Send + Sync {
    async fn read_all(&self) -> crate::Result<Vec<u8>>;
    async fn prepend(&self, post: &[u8]) -> crate::Result<()>;
}

/// Kind returned by `FileStore::stat`, distinguishing regular files from
/// directories (and, since the store must follow symlinks, the target
/// kind rather than the link itself).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Clone, Debug)]
pub struct Metadata {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub created: SystemTime,
}

/// Abstract filesystem the file wrapper and transfer handlers operate
/// through. A binary crate backs this with `tokio::fs` (`OSFileStore`); the
/// library only depends on this trait, so transfer logic is testable with
/// an in-memory fake.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn stat(&self, path: &Path) -> io::Result<Metadata>;
    async fn mkdir(&self, path: &Path) -> io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    async fn remove(&self, path: &Path) -> io::Result<()>;
    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;
    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;
    /// Appends `data` to `path`, creating it if absent. Used for streamed
    /// upload receipt, where the whole file is never buffered in memory.
    async fn append_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;
    /// Reads `len` bytes starting at `offset`, for resumed/ranged download.
    async fn read_range(&self, path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>>;
    /// Resource-fork sidecar reader, `None` if the store doesn't carry one
    /// (e.g. `PreserveResourceForks` is off, or the platform has none).
    async fn read_resource_fork(&self, path: &Path) -> io::Result<Vec<u8>>;
    async fn write_resource_fork(&self, path: &Path, data: &[u8]) -> io::Result<()>;
    async fn read_comment(&self, path: &Path) -> io::Result<String>;
    async fn write_comment(&self, path: &Path, comment: &str) -> io::Result<()>;
    async fn exists(&self, path: &Path) -> bool;
}

pub use crate::models::ForkKind;

/// Parses the wire `FileResumeData` ("RFLT") record.
pub fn parse_resume_data(bytes: &[u8]) -> crate::Result<FileResumeData> {
    if bytes.len() < 40 || &bytes[0..4] != b"RFLT" {
        return Err(crate::Error::Protocol("malformed RFLT resume record".into()));
    }
    let fork_count = u16::from_be_bytes([bytes[38], bytes[39]]) as usize;
    let mut forks = Vec::with_capacity(fork_count);
    let mut off = 40;
    for _ in 0..fork_count {
        if bytes.len() < off + 16 {
            return Err(crate::Error::Protocol("truncated RFLT fork entry".into()));
        }
        let tag = &bytes[off..off + 4];
        let fork = if tag == b"DATA" {
            crate::models::ForkKind::Data
        } else if tag == b"MACR" {
            crate::models::ForkKind::Macr
        } else {
            return Err(crate::Error::Protocol("unknown RFLT fork tag".into()));
        };
        let data_size = u32::from_be_bytes([bytes[off + 4], bytes[off + 5], bytes[off + 6], bytes[off + 7]]);
        forks.push(crate::models::ForkResumeInfo { fork, data_size });
        off += 16;
    }
    Ok(FileResumeData { forks })
}

/// Encodes an `RFLT` resume-data record.
pub fn encode_resume_data(r: &FileResumeData) -> Vec<u8> {
    let mut out = Vec::with_capacity(40 + r.forks.len() * 16);
    out.extend_from_slice(b"RFLT");
    out.extend_from_slice(&1u16.to_be_bytes()); // version
    out.extend_from_slice(&[0u8; 34]); // reserved
    out.extend_from_slice(&(r.forks.len() as u16).to_be_bytes());
    for f in &r.forks {
        out.extend_from_slice(f.fork.tag());
        out.extend_from_slice(&f.data_size.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForkKind, ForkResumeInfo};

    #[test]
    fn resume_data_roundtrips() {
        let r = FileResumeData {
            forks: vec![
                ForkResumeInfo { fork: ForkKind::Data, data_size: 100 },
                ForkResumeInfo { fork: ForkKind::Macr, data_size: 0 },
            ],
        };
        let bytes = encode_resume_data(&r);
        let back = parse_resume_data(&bytes).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.data_offset(), 100);
    }
}
