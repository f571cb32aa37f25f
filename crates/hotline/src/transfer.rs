//! Per-reference-number file-transfer bookkeeping: the global registry a
//! transfer handler populates and the file-transfer-port session looks up
//! by its random reference number, plus each client's bucket of transfers
//! it currently owns.

use crate::models::{FileResumeData, FileTransfer, TransferType};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Monotonic counters/gauges exposed by the `stats` module's `Snapshot`.
#[derive(Default)]
pub struct TransferStats {
    pub downloads_started: AtomicU64,
    pub uploads_started: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

/// Indexes in-flight `FileTransfer`s by reference number, and separately by
/// owning client, so both lookups in invariant (d) stay consistent.
#[derive(Default)]
pub struct TransferManager {
    by_ref: RwLock<HashMap<[u8; 4], Arc<FileTransfer>>>,
    by_client: RwLock<HashMap<u16, Vec<[u8; 4]>>>,
    pub stats: TransferStats,
}

impl TransferManager {
    pub fn new() -> TransferManager {
        TransferManager::default()
    }

    /// Registers a transfer under a fresh random reference number and
    /// returns it.
    pub async fn register(
        &self,
        client_id: u16,
        kind: TransferType,
        file_name: String,
        file_path: String,
        transfer_size: u32,
        folder_item_count: u16,
        resume_data: Option<FileResumeData>,
        options: Option<u16>,
    ) -> [u8; 4] {
        let mut ref_num = [0u8; 4];
        let mut by_ref = self.by_ref.write().await;
        loop {
            rand::thread_rng().fill_bytes(&mut ref_num);
            if !by_ref.contains_key(&ref_num) {
                break;
            }
        }
        let transfer = Arc::new(FileTransfer {
            ref_num,
            kind,
            file_name,
            file_path,
            transfer_size,
            folder_item_count,
            resume_data,
            options,
            bytes_sent: AtomicU64::new(0),
            client_id,
        });
        by_ref.insert(ref_num, transfer);
        drop(by_ref);

        self.by_client.write().await.entry(client_id).or_default().push(ref_num);
        match kind {
            TransferType::FileDownload | TransferType::FolderDownload | TransferType::BannerDownload => {
                self.stats.downloads_started.fetch_add(1, Ordering::Relaxed);
            }
            TransferType::FileUpload | TransferType::FolderUpload => {
                self.stats.uploads_started.fetch_add(1, Ordering::Relaxed);
            }
        }
        ref_num
    }

    pub async fn get(&self, ref_num: [u8; 4]) -> Option<Arc<FileTransfer>> {
        self.by_ref.read().await.get(&ref_num).cloned()
    }

    /// Removes the transfer from both the global registry and its owning
    /// client's bucket.
    pub async fn complete(&self, ref_num: [u8; 4]) {
        let transfer = self.by_ref.write().await.remove(&ref_num);
        if let Some(t) = transfer {
            if let Some(bucket) = self.by_client.write().await.get_mut(&t.client_id) {
                bucket.retain(|r| *r != ref_num);
            }
        }
    }

    pub async fn client_bucket(&self, client_id: u16) -> Vec<[u8; 4]> {
        self.by_client.read().await.get(&client_id).cloned().unwrap_or_default()
    }

    /// Count of currently registered download-kind transfers (file, folder
    /// or banner), server-wide. Used for the `MaxDownloads` admission check
    /// at the moment a client opens the file-transfer port.
    pub async fn active_download_count(&self) -> usize {
        self.by_ref.read().await.values().filter(|t| t.kind.is_download()).count()
    }

    /// Same count, scoped to one client, for `MaxDownloadsPerClient`.
    pub async fn client_download_count(&self, client_id: u16) -> usize {
        let by_ref = self.by_ref.read().await;
        self.by_client
            .read()
            .await
            .get(&client_id)
            .map(|refs| refs.iter().filter(|r| by_ref.get(*r).map(|t| t.kind.is_download()).unwrap_or(false)).count())
            .unwrap_or(0)
    }

    /// Drops every transfer belonging to a disconnecting client.
    pub async fn clear_client(&self, client_id: u16) {
        let refs = self.by_client.write().await.remove(&client_id).unwrap_or_default();
        let mut by_ref = self.by_ref.write().await;
        for r in refs {
            by_ref.remove(&r);
        }
    }

    pub fn record_sent(&self, transfer: &FileTransfer, bytes: u64) {
        transfer.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: u64) {
        self.stats.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// The 16-byte preamble a client sends when opening the file-transfer port:
/// `{"HTXF", RefNum:[4], DataSize:u32, RsvdSize:u32}`.
pub const HTXF_MAGIC: &[u8; 4] = b"HTXF";
pub const HTXF_PREAMBLE_LEN: usize = 16;

pub struct HtxfPreamble {
    pub ref_num: [u8; 4],
    pub data_size: u32,
    pub rsvd_size: u32,
}

pub fn decode_htxf_preamble(bytes: &[u8]) -> crate::Result<HtxfPreamble> {
    if bytes.len() < HTXF_PREAMBLE_LEN || &bytes[0..4] != HTXF_MAGIC {
        return Err(crate::Error::Protocol("bad HTXF preamble".into()));
    }
    Ok(HtxfPreamble {
        ref_num: [bytes[4], bytes[5], bytes[6], bytes[7]],
        data_size: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        rsvd_size: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
    })
}

/// Delay observed before closing a file-transfer socket: some historical
/// clients require the peer to send the closing FIN first.
pub const TRANSFER_CLOSE_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_complete_removes_from_both_indices() {
        let mgr = TransferManager::new();
        let ref_num = mgr
            .register(1, TransferType::FileDownload, "f".into(), "/f".into(), 10, 0, None, None)
            .await;
        assert!(mgr.get(ref_num).await.is_some());
        assert_eq!(mgr.client_bucket(1).await, vec![ref_num]);

        mgr.complete(ref_num).await;
        assert!(mgr.get(ref_num).await.is_none());
        assert!(mgr.client_bucket(1).await.is_empty());
    }

    #[tokio::test]
    async fn clear_client_drops_every_owned_transfer() {
        let mgr = TransferManager::new();
        let a = mgr.register(5, TransferType::FileUpload, "a".into(), "/a".into(), 1, 0, None, None).await;
        let b = mgr.register(5, TransferType::FileUpload, "b".into(), "/b".into(), 1, 0, None, None).await;
        mgr.clear_client(5).await;
        assert!(mgr.get(a).await.is_none());
        assert!(mgr.get(b).await.is_none());
    }

    #[test]
    fn htxf_preamble_decodes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(HTXF_MAGIC);
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        let p = decode_htxf_preamble(&bytes).unwrap();
        assert_eq!(p.ref_num, [1, 2, 3, 4]);
    }
}
