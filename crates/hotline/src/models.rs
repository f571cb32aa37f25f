//! In-memory data model: accounts, client connections, private chats and
//! the threaded/flat news tree.

use crate::access::Access;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A user account as held by an `AccountStore`. `login` is plain in memory;
/// it is only obfuscated on the wire (see `protocol::obfuscate`).
#[derive(Clone, Debug)]
pub struct Account {
    pub login: String,
    pub name: String,
    /// bcrypt hash of the account's password.
    pub password_hash: String,
    pub access: Access,
}

impl Account {
    pub fn new(login: impl Into<String>, name: impl Into<String>, password: &str, access: Access) -> Account {
        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).expect("bcrypt hash");
        Account { login: login.into(), name: name.into(), password_hash, access }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

bitflags::bitflags! {
    /// Per-client flags, bit-addressed the same way on the wire as the
    /// access bitmap (two bytes, MSB-first semantics preserved by using
    /// explicit values rather than sequential shifts).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UserFlags: u16 {
        const AWAY          = 0b1000_0000_0000_0000;
        const ADMIN          = 0b0100_0000_0000_0000;
        const REFUSE_PM      = 0b0010_0000_0000_0000;
        const REFUSE_PCHAT   = 0b0001_0000_0000_0000;
    }
}

/// Process-wide, monotonically increasing client ID allocator.
#[derive(Default)]
pub struct ClientIdAllocator(AtomicU16);

impl ClientIdAllocator {
    pub fn new() -> ClientIdAllocator {
        ClientIdAllocator(AtomicU16::new(0))
    }

    /// Allocates the next non-zero ID. Wraps past u16::MAX back to 1 rather
    /// than panicking; a long-lived server will eventually recycle IDs once
    /// the original holders have long disconnected.
    pub fn next(&self) -> u16 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
}

/// A single connected client's mutable session state, guarded field-by-field
/// so handlers can update one aspect (flags, idle time) without taking a
/// lock that would block a concurrent read of another.
pub struct ClientConn {
    pub id: u16,
    pub icon: i16,
    pub flags: Mutex<UserFlags>,
    pub user_name: Mutex<Vec<u8>>,
    pub version: Option<u16>,
    pub account: Mutex<Arc<Account>>,
    pub idle_time: Mutex<u64>,
    pub auto_reply: Mutex<Vec<u8>>,
    pub remote_addr: IpAddr,
    /// Sends frames destined for this client; the connection's writer task
    /// drains the other end. Send errors (peer gone) are dropped, never
    /// propagated - matches the fan-out's "missing target -> drop silently"
    /// contract.
    pub outbox: mpsc::UnboundedSender<crate::protocol::Transaction>,
    pub transfer_bucket: Mutex<Vec<[u8; 4]>>,
}

impl ClientConn {
    pub async fn has_flag(&self, flag: UserFlags) -> bool {
        self.flags.lock().await.contains(flag)
    }

    pub async fn set_flag(&self, flag: UserFlags, on: bool) {
        let mut f = self.flags.lock().await;
        f.set(flag, on);
    }

    pub async fn name(&self) -> Vec<u8> {
        self.user_name.lock().await.clone()
    }

    pub fn send(&self, tx: crate::protocol::Transaction) {
        let _ = self.outbox.send(tx);
    }
}

/// An ephemeral multi-user room, addressed by a random 4-byte ID,
/// independent of the public chat.
pub struct PrivateChat {
    pub id: [u8; 4],
    pub subject: Mutex<String>,
    pub members: Mutex<HashMap<u16, Arc<ClientConn>>>,
}

impl PrivateChat {
    pub fn new(id: [u8; 4], creator: Arc<ClientConn>) -> PrivateChat {
        let mut members = HashMap::new();
        members.insert(creator.id, creator);
        PrivateChat { id, subject: Mutex::new(String::new()), members: Mutex::new(members) }
    }
}

/// Node kind for a threaded-news tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NewsNodeType {
    Bundle = 0x0002,
    Category = 0x0003,
}

/// One article in a `NewsCategory`'s doubly-linked list.
#[derive(Clone, Debug)]
pub struct NewsArtData {
    pub title: String,
    pub poster: String,
    /// 8-byte Hotline timestamp (seconds-since-epoch encoding is the
    /// store's concern; the core only round-trips these bytes).
    pub date: [u8; 8],
    pub prev_art: u32,
    pub next_art: u32,
    pub parent_art: u32,
    pub first_child_art: u32,
    pub data_flavor: String,
    pub data: Vec<u8>,
}

/// A named node in the threaded-news tree: either a `Category` (holding
/// articles) or a `Bundle` (holding further sub-categories/bundles).
#[derive(Clone, Debug)]
pub struct NewsNode {
    pub name: String,
    pub kind: NewsNodeType,
    pub sub_cats: Vec<NewsNode>,
    /// Keyed by 1-based article ID; absent IDs are deleted articles.
    pub articles: HashMap<u32, NewsArtData>,
}

impl NewsNode {
    pub fn new_category(name: impl Into<String>) -> NewsNode {
        NewsNode { name: name.into(), kind: NewsNodeType::Category, sub_cats: Vec::new(), articles: HashMap::new() }
    }

    pub fn new_bundle(name: impl Into<String>) -> NewsNode {
        NewsNode { name: name.into(), kind: NewsNodeType::Bundle, sub_cats: Vec::new(), articles: HashMap::new() }
    }
}

/// Kind of file-transfer session, matching the handler that registered it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferType {
    FileDownload,
    FileUpload,
    FolderDownload,
    FolderUpload,
    BannerDownload,
}

impl TransferType {
    pub fn is_download(self) -> bool {
        matches!(self, TransferType::FileDownload | TransferType::FolderDownload | TransferType::BannerDownload)
    }
}

/// A registered, in-flight file transfer, looked up by its random
/// reference number when the client opens the file-transfer port.
pub struct FileTransfer {
    pub ref_num: [u8; 4],
    pub kind: TransferType,
    pub file_name: String,
    pub file_path: String,
    pub transfer_size: u32,
    pub folder_item_count: u16,
    pub resume_data: Option<FileResumeData>,
    /// `FieldFileTransferOptions`, when the client asked for a quick
    /// preview (raw data fork only, value `2`).
    pub options: Option<u16>,
    pub bytes_sent: std::sync::atomic::AtomicU64,
    pub client_id: u16,
}

/// One fork's resume offset inside an `RFLT` resume-data record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkResumeInfo {
    pub fork: ForkKind,
    pub data_size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkKind {
    Data,
    Macr,
}

impl ForkKind {
    pub fn tag(self) -> &'static [u8; 4] {
        match self {
            ForkKind::Data => b"DATA",
            ForkKind::Macr => b"MACR",
        }
    }
}

/// `RFLT` resume-data record: tells the sender which forks the receiver
/// already has, and how much of each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileResumeData {
    pub forks: Vec<ForkResumeInfo>,
}

impl FileResumeData {
    pub fn data_offset(&self) -> u32 {
        self.forks.iter().find(|f| f.fork == ForkKind::Data).map(|f| f.data_size).unwrap_or(0)
    }
}
