//! Flattened File Object ("FILP") construction/parsing, Mac type/creator
//! inference, and the folder-walking helpers (`CalcTotalSize`,
//! `CalcItemCount`, name listing) that back `GetFileNameList` and the
//! folder transfer handlers.

use crate::models::ForkKind;
use crate::store::{EntryKind, FileStore};
use regex::Regex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

/// Files larger than this are excluded from listings: the wire's file-size
/// field is 4 bytes.
pub const MAX_LISTABLE_SIZE: u64 = u32::MAX as u64;

/// Suffix used while a file is only partially uploaded.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Seconds between the classic Mac epoch (1904-01-01) and the Unix epoch,
/// used to encode `FileCreateDate`/`FileModifyDate` and `NewsArtDate`.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Encodes a `SystemTime` as an 8-byte Hotline timestamp: 4 reserved zero
/// bytes followed by a big-endian u32 of seconds since the Mac epoch.
pub fn encode_mac_date(t: SystemTime) -> [u8; 8] {
    let unix_secs = t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let mac_secs = (unix_secs + MAC_EPOCH_OFFSET).max(0) as u32;
    let mut out = [0u8; 8];
    out[4..8].copy_from_slice(&mac_secs.to_be_bytes());
    out
}

pub fn decode_mac_date(bytes: [u8; 8]) -> SystemTime {
    let mac_secs = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as i64;
    let unix_secs = mac_secs - MAC_EPOCH_OFFSET;
    UNIX_EPOCH + std::time::Duration::from_secs(unix_secs.max(0) as u64)
}

/// Mac type/creator codes inferred from a file's extension; default is
/// `("TEXT", "TTXT")`. Directories are reported as type `"fldr"`.
fn type_creator_for_extension(ext: &str) -> (&'static str, &'static str) {
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "text" => ("TEXT", "TTXT"),
        "jpg" | "jpeg" => ("JPEG", "GKON"),
        "gif" => ("GIFf", "ogle"),
        "png" => ("PNGf", "ogle"),
        "sit" => ("SIT!", "SIT!"),
        "zip" => ("ZIP ", "ZIP "),
        "hqx" => ("TEXT", "SITx"),
        "pdf" => ("PDF ", "CARO"),
        "mp3" => ("MPG3", "SCPL"),
        "aiff" | "aif" => ("AIFF", "TVOD"),
        "mov" => ("MooV", "TVOD"),
        _ => ("TEXT", "TTXT"),
    }
}

pub fn type_creator_for_path(path: &Path, is_dir: bool) -> (&'static str, &'static str) {
    if is_dir {
        return ("fldr", "TTXT");
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    type_creator_for_extension(ext)
}

/// One fork header inside a flattened file object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkHeader {
    pub fork_type: [u8; 4],
    pub data_size: u32,
}

impl ForkHeader {
    const LEN: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.fork_type);
        out.extend_from_slice(&0u32.to_be_bytes()); // compression type
        out.extend_from_slice(&0u32.to_be_bytes()); // reserved
        out.extend_from_slice(&self.data_size.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> crate::Result<(ForkHeader, &[u8])> {
        if bytes.len() < Self::LEN {
            return Err(crate::Error::Protocol("truncated fork header".into()));
        }
        let fork_type = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let data_size = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok((ForkHeader { fork_type, data_size }, &bytes[Self::LEN..]))
    }
}

/// The INFO fork's payload: type/creator, dates, filename and comment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoFork {
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub create_date: [u8; 8],
    pub modify_date: [u8; 8],
    pub name: Vec<u8>,
    pub comment: Vec<u8>,
}

impl InfoFork {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.file_type);
        out.extend_from_slice(&self.creator);
        out.extend_from_slice(&0u32.to_be_bytes()); // flags
        out.extend_from_slice(&0u32.to_be_bytes()); // platform flags
        out.extend_from_slice(&[0u8; 32]); // reserved
        out.extend_from_slice(&self.create_date);
        out.extend_from_slice(&self.modify_date);
        out.extend_from_slice(&0u16.to_be_bytes()); // name script
        out.extend_from_slice(&(self.name.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&(self.comment.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    fn decode(bytes: &[u8]) -> crate::Result<InfoFork> {
        let err = || crate::Error::Protocol("truncated INFO fork".into());
        if bytes.len() < 56 {
            return Err(err());
        }
        let file_type = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let creator = [bytes[4], bytes[5], bytes[6], bytes[7]];
        let create_date: [u8; 8] = bytes[48..56].try_into().unwrap();
        let modify_date: [u8; 8] = bytes[56..64].try_into().map_err(|_| err())?;
        let mut off = 66; // skip name script u16
        if bytes.len() < off + 2 {
            return Err(err());
        }
        let name_size = u16::from_be_bytes([bytes[off], bytes[off + 1]]) as usize;
        off += 2;
        if bytes.len() < off + name_size + 2 {
            return Err(err());
        }
        let name = bytes[off..off + name_size].to_vec();
        off += name_size;
        let comment_size = u16::from_be_bytes([bytes[off], bytes[off + 1]]) as usize;
        off += 2;
        if bytes.len() < off + comment_size {
            return Err(err());
        }
        let comment = bytes[off..off + comment_size].to_vec();
        Ok(InfoFork { file_type, creator, create_date, modify_date, name, comment })
    }
}

/// On-wire representation of a single file during transfer: header + INFO
/// fork + DATA fork header (+ bytes carried separately by the caller) +
/// optional MACR fork header (+ bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlattenedFileObject {
    pub info: InfoFork,
    pub data_size: u32,
    pub macr_size: Option<u32>,
}

const FLP_MAGIC: &[u8; 4] = b"FILP";
const FLP_HEADER_LEN: usize = 4 + 2 + 16 + 2; // magic, version, reserved, fork count

impl FlattenedFileObject {
    /// Encodes the envelope: header, INFO fork (header + payload), DATA
    /// fork header. Actual DATA bytes are **not** included — they stream
    /// separately so large files never sit in memory twice. If `macr_size`
    /// is `Some`, a MACR fork header follows (again, bytes stream
    /// separately); `None` when resuming, since the resource fork is only
    /// sent on a fresh transfer.
    pub fn encode_envelope(&self) -> Vec<u8> {
        let fork_count: u16 = if self.macr_size.is_some() { 3 } else { 2 };
        let mut out = Vec::new();
        out.extend_from_slice(FLP_MAGIC);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&fork_count.to_be_bytes());

        let info_bytes = self.info.encode();
        ForkHeader { fork_type: *b"INFO", data_size: info_bytes.len() as u32 }.encode(&mut out);
        out.extend_from_slice(&info_bytes);

        ForkHeader { fork_type: *b"DATA", data_size: self.data_size }.encode(&mut out);

        if let Some(macr_size) = self.macr_size {
            ForkHeader { fork_type: *b"MACR", data_size: macr_size }.encode(&mut out);
        }
        out
    }

    /// Decodes the envelope produced by `encode_envelope`, validating fork
    /// order and magic but not consuming the DATA/MACR payload bytes
    /// (caller reads those separately, per the streaming contract above).
    pub fn decode_envelope(bytes: &[u8]) -> crate::Result<FlattenedFileObject> {
        if bytes.len() < FLP_HEADER_LEN || &bytes[0..4] != FLP_MAGIC {
            return Err(crate::Error::Protocol("bad FILP magic".into()));
        }
        let fork_count = u16::from_be_bytes([bytes[22], bytes[23]]);
        let mut rest = &bytes[FLP_HEADER_LEN..];

        let (info_header, after) = ForkHeader::decode(rest)?;
        if &info_header.fork_type != b"INFO" {
            return Err(crate::Error::Protocol("expected INFO fork first".into()));
        }
        let info_len = info_header.data_size as usize;
        if after.len() < info_len {
            return Err(crate::Error::Protocol("truncated INFO fork payload".into()));
        }
        let info = InfoFork::decode(&after[..info_len])?;
        rest = &after[info_len..];

        let (data_header, after) = ForkHeader::decode(rest)?;
        if &data_header.fork_type != b"DATA" {
            return Err(crate::Error::Protocol("expected DATA fork".into()));
        }
        rest = after;

        let macr_size = if fork_count >= 3 {
            let (macr_header, _) = ForkHeader::decode(rest)?;
            if &macr_header.fork_type != b"MACR" {
                return Err(crate::Error::Protocol("expected MACR fork".into()));
            }
            Some(macr_header.data_size)
        } else {
            None
        };

        Ok(FlattenedFileObject { info, data_size: data_header.data_size, macr_size })
    }
}

/// Binds a filesystem path to its transfer-time representation: a
/// synthesized `FlattenedFileObject`, a data-fork reader with skip-to-offset
/// support, and optional resource/info sidecars.
pub struct FileWrapper<'a> {
    pub store: &'a dyn FileStore,
    pub path: PathBuf,
    pub preserve_forks: bool,
}

impl<'a> FileWrapper<'a> {
    pub fn new(store: &'a dyn FileStore, path: PathBuf, preserve_forks: bool) -> FileWrapper<'a> {
        FileWrapper { store, path, preserve_forks }
    }

    /// Builds the flattened-file-object envelope for this file: its real
    /// data size, plus a resource-fork size when forks are preserved and a
    /// non-empty resource fork exists.
    pub async fn flatten(&self) -> crate::Result<FlattenedFileObject> {
        let meta = self.store.stat(&self.path).await?;
        let is_dir = meta.kind == EntryKind::Dir;
        let (file_type, creator) = type_creator_for_path(&self.path, is_dir);
        let name = self.reported_name();
        let comment = self.store.read_comment(&self.path).await.unwrap_or_default();

        let macr_size = if self.preserve_forks {
            match self.store.read_resource_fork(&self.path).await {
                Ok(bytes) if !bytes.is_empty() => Some(bytes.len() as u32),
                _ => None,
            }
        } else {
            None
        };

        Ok(FlattenedFileObject {
            info: InfoFork {
                file_type: to4(file_type),
                creator: to4(creator),
                create_date: encode_mac_date(meta.created),
                modify_date: encode_mac_date(meta.modified),
                name: name.into_bytes(),
                comment: comment.into_bytes(),
            },
            data_size: meta.size.min(MAX_LISTABLE_SIZE) as u32,
            macr_size,
        })
    }

    /// The name reported to clients: `.incomplete` stripped.
    pub fn reported_name(&self) -> String {
        let name = self.path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
        name.strip_suffix(INCOMPLETE_SUFFIX).map(|s| s.to_string()).unwrap_or(name)
    }

    pub async fn read_resource_fork(&self) -> Vec<u8> {
        if !self.preserve_forks {
            return Vec::new();
        }
        self.store.read_resource_fork(&self.path).await.unwrap_or_default()
    }

    pub async fn data_range(&self, offset: u64, len: u64) -> crate::Result<Vec<u8>> {
        Ok(self.store.read_range(&self.path, offset, len).await?)
    }
}

fn to4(s: &str) -> [u8; 4] {
    let mut out = [b' '; 4];
    for (i, b) in s.as_bytes().iter().take(4).enumerate() {
        out[i] = *b;
    }
    out
}

/// A name as listed by `GetFileNameList`: reported name, whether it's a
/// directory, its type/creator, size, and (for directories) the item count
/// of its immediate contents.
pub struct NamedEntry {
    pub name: String,
    pub is_dir: bool,
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub size: u32,
}

/// `true` if `name` should be hidden from listings: dotfiles, or a match
/// against any of `ignore_files`.
fn is_hidden(name: &str, ignore_files: &[Regex]) -> bool {
    name.starts_with('.') && !name.ends_with(INCOMPLETE_SUFFIX) || ignore_files.iter().any(|r| r.is_match(name))
}

/// `true` if `path` is a dropbox by name: contains "drop box"
/// case-insensitively.
pub fn is_dropbox(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str().to_string_lossy().to_lowercase().contains("drop box"))
}

/// `true` if `path` is a descendant of a top-level "Uploads" directory
/// (case-insensitive), per the upload-anywhere check.
pub fn is_under_uploads(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str().to_string_lossy().eq_ignore_ascii_case("uploads"))
}

/// Lists the names directly inside `dir`, recursing one level into
/// subdirectories purely to compute their item counts. `.incomplete` is stripped from
/// reported names; dotfiles and `ignore_files` matches are skipped.
pub async fn list_names(
    store: &dyn FileStore,
    dir: &Path,
    ignore_files: &[Regex],
) -> crate::Result<Vec<NamedEntry>> {
    let mut out = Vec::new();
    for raw_name in store.read_dir(dir).await? {
        if is_hidden(&raw_name, ignore_files) {
            continue;
        }
        let child = dir.join(&raw_name);
        let meta = match store.stat(&child).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        if meta.kind == EntryKind::File && meta.size > MAX_LISTABLE_SIZE {
            continue;
        }
        let is_dir = meta.kind == EntryKind::Dir;
        let (file_type, creator) = type_creator_for_path(&child, is_dir);
        let reported = raw_name.strip_suffix(INCOMPLETE_SUFFIX).unwrap_or(&raw_name).to_string();
        let size = if is_dir {
            calc_item_count(store, &child, ignore_files).await? as u32
        } else {
            meta.size.min(MAX_LISTABLE_SIZE) as u32
        };
        out.push(NamedEntry { name: reported, is_dir, file_type: to4(file_type), creator: to4(creator), size });
    }
    Ok(out)
}

/// Sums regular-file sizes recursively under `path`.
pub fn calc_total_size<'a>(
    store: &'a dyn FileStore,
    path: &'a Path,
) -> Pin<Box<dyn Future<Output = crate::Result<u64>> + Send + 'a>> {
    Box::pin(async move {
        let mut total = 0u64;
        for name in store.read_dir(path).await? {
            if name.starts_with('.') {
                continue;
            }
            let child = path.join(&name);
            let meta = store.stat(&child).await?;
            total += match meta.kind {
                EntryKind::File => meta.size,
                EntryKind::Dir => calc_total_size(store, &child).await?,
            };
        }
        Ok(total)
    })
}

/// Counts non-hidden entries recursively under `path`; the directory
/// itself is not counted (the client only cares about its contents), so
/// this is the recursive entry count, i.e. `count - 1` relative to a walk
/// that includes the root.
pub fn calc_item_count<'a>(
    store: &'a dyn FileStore,
    path: &'a Path,
    ignore_files: &'a [Regex],
) -> Pin<Box<dyn Future<Output = crate::Result<u16>> + Send + 'a>> {
    Box::pin(async move {
        let mut count: u32 = 0;
        for name in store.read_dir(path).await? {
            if is_hidden(&name, ignore_files) {
                continue;
            }
            count += 1;
            let child = path.join(&name);
            if let Ok(meta) = store.stat(&child).await {
                if meta.kind == EntryKind::Dir {
                    count += calc_item_count(store, &child, ignore_files).await? as u32;
                }
            }
        }
        Ok(count as u16)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flp_envelope_roundtrips_with_macr() {
        let flp = FlattenedFileObject {
            info: InfoFork {
                file_type: *b"TEXT",
                creator: *b"TTXT",
                create_date: [0; 8],
                modify_date: [0; 8],
                name: b"testfile".to_vec(),
                comment: Vec::new(),
            },
            data_size: 0x18,
            macr_size: Some(0),
        };
        let bytes = flp.encode_envelope();
        let back = FlattenedFileObject::decode_envelope(&bytes).unwrap();
        assert_eq!(back, flp);
        // Envelope-only bytes (no DATA/MACR payload) land in the same
        // ballpark as the historical ~165-byte single-file fixture.
        assert!(bytes.len() < 165);
    }

    #[test]
    fn flp_envelope_roundtrips_without_macr() {
        let flp = FlattenedFileObject {
            info: InfoFork {
                file_type: *b"TEXT",
                creator: *b"TTXT",
                create_date: [0; 8],
                modify_date: [0; 8],
                name: b"resumed".to_vec(),
                comment: b"a comment".to_vec(),
            },
            data_size: 100,
            macr_size: None,
        };
        let bytes = flp.encode_envelope();
        let back = FlattenedFileObject::decode_envelope(&bytes).unwrap();
        assert_eq!(back, flp);
    }

    #[test]
    fn mac_date_roundtrips() {
        let now = SystemTime::now();
        let encoded = encode_mac_date(now);
        let decoded = decode_mac_date(encoded);
        let diff = decoded.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
            - now.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        assert_eq!(diff, 0);
    }

    #[test]
    fn type_creator_defaults_to_text() {
        assert_eq!(type_creator_for_extension("xyz"), ("TEXT", "TTXT"));
        assert_eq!(type_creator_for_extension("jpg"), ("JPEG", "GKON"));
    }

    #[test]
    fn dropbox_detection_is_case_insensitive() {
        assert!(is_dropbox(Path::new("files/Drop Box/incoming")));
        assert!(!is_dropbox(Path::new("files/uploads")));
    }

    #[test]
    fn uploads_detection_is_case_insensitive() {
        assert!(is_under_uploads(Path::new("files/UPLOADS/foo")));
        assert!(!is_under_uploads(Path::new("files/other")));
    }
}
