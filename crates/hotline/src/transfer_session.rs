//! Drives one accepted file-transfer-port (`port+1`) connection: reads the
//! `HTXF` preamble, looks the reference number up in the [`crate::transfer`]
//! registry, and streams raw bytes according to the transfer's kind. Unlike
//! the transaction port, nothing here is framed as a `Transaction` - this is
//! a plain byte pipe, read and written directly against the socket.

use crate::filewrapper::{self, FileWrapper};
use crate::models::{FileResumeData, FileTransfer, ForkKind, ForkResumeInfo, TransferType};
use crate::state::AppState;
use crate::store::{encode_resume_data, parse_resume_data};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Client sends this after a `FileHeader` to request the file's bytes.
const ACTION_SEND: u16 = 0x0001;
/// ...or this, followed by a resume-data record, to resume a partial file.
const ACTION_RESUME: u16 = 0x0002;
/// ...or this to skip the entry entirely.
const ACTION_SKIP: u16 = 0x0003;

const FILE_HEADER_SIZE: u16 = 0x000A;
const FILE_HEADER_TYPE_FILE: u16 = 0;
const FILE_HEADER_TYPE_DIR: u16 = 1;

/// Drives one file-transfer-port connection end to end: preamble, dispatch
/// by transfer kind, registry cleanup, then the fixed close delay.
pub async fn handle_transfer_session<S>(mut stream: S, state: Arc<AppState>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut preamble_bytes = [0u8; crate::transfer::HTXF_PREAMBLE_LEN];
    stream.read_exact(&mut preamble_bytes).await?;
    let preamble = crate::transfer::decode_htxf_preamble(&preamble_bytes)?;

    let Some(transfer) = state.transfers.get(preamble.ref_num).await else {
        return Err(crate::Error::No(crate::error::errno::ENOENT));
    };

    let result = serve(&mut stream, &state, &transfer).await;
    if let Err(ref e) = result {
        warn!("file transfer {:?} for client {} failed: {}", transfer.kind, transfer.client_id, e);
    }

    state.transfers.complete(transfer.ref_num).await;
    tokio::time::sleep(crate::transfer::TRANSFER_CLOSE_DELAY).await;
    result
}

async fn serve<S>(stream: &mut S, state: &Arc<AppState>, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if transfer.kind.is_download()
        && (state.transfers.active_download_count().await > state.config.max_downloads
            || state.transfers.client_download_count(transfer.client_id).await > state.config.max_downloads_per_client)
    {
        return Err(crate::Error::Denied("Too many simultaneous downloads.".into()));
    }

    match transfer.kind {
        TransferType::FileDownload => serve_file_download(stream, state, transfer).await,
        TransferType::FileUpload => serve_file_upload(stream, state, transfer).await,
        TransferType::FolderDownload => serve_folder_download(stream, state, transfer).await,
        TransferType::FolderUpload => serve_folder_upload(stream, state, transfer).await,
        TransferType::BannerDownload => serve_banner_download(stream, state, transfer).await,
    }
}

fn incomplete_path(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    path.with_file_name(format!("{}{}", name, filewrapper::INCOMPLETE_SUFFIX))
}

async fn read_fork_header<S: AsyncRead + Unpin>(stream: &mut S) -> crate::Result<([u8; 4], u32)> {
    let mut buf = [0u8; 16];
    stream.read_exact(&mut buf).await?;
    Ok(([buf[0], buf[1], buf[2], buf[3]], u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]])))
}

async fn skip_exact<S: AsyncRead + Unpin>(stream: &mut S, mut len: u64) -> crate::Result<()> {
    let mut buf = [0u8; 8192];
    while len > 0 {
        let chunk = len.min(buf.len() as u64) as usize;
        stream.read_exact(&mut buf[..chunk]).await?;
        len -= chunk as u64;
    }
    Ok(())
}

/// Reads an incoming FILP envelope and appends its DATA fork to `incomplete`,
/// discarding the INFO fork and writing the MACR fork (if present) to the
/// resource-fork sidecar when fork preservation is enabled.
async fn receive_filp_stream<S: AsyncRead + Unpin>(
    stream: &mut S,
    state: &Arc<AppState>,
    final_path: &Path,
    incomplete: &Path,
) -> crate::Result<()> {
    let mut hdr = [0u8; 24];
    stream.read_exact(&mut hdr).await?;
    if &hdr[0..4] != b"FILP" {
        return Err(crate::Error::Protocol("bad FILP magic".into()));
    }
    let fork_count = u16::from_be_bytes([hdr[22], hdr[23]]);

    let (info_tag, info_size) = read_fork_header(stream).await?;
    if &info_tag != b"INFO" {
        return Err(crate::Error::Protocol("expected INFO fork first".into()));
    }
    skip_exact(stream, info_size as u64).await?;

    let (data_tag, data_size) = read_fork_header(stream).await?;
    if &data_tag != b"DATA" {
        return Err(crate::Error::Protocol("expected DATA fork".into()));
    }
    let mut remaining = data_size as u64;
    let mut buf = [0u8; 65536];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        stream.read_exact(&mut buf[..chunk]).await?;
        state.files.append_file(incomplete, &buf[..chunk]).await?;
        state.transfers.record_received(chunk as u64);
        remaining -= chunk as u64;
    }

    if fork_count >= 3 {
        let (macr_tag, macr_size) = read_fork_header(stream).await?;
        if &macr_tag != b"MACR" {
            return Err(crate::Error::Protocol("expected MACR fork".into()));
        }
        if state.config.preserve_resource_forks && macr_size > 0 {
            let mut macr = vec![0u8; macr_size as usize];
            stream.read_exact(&mut macr).await?;
            state.files.write_resource_fork(final_path, &macr).await?;
        } else {
            skip_exact(stream, macr_size as u64).await?;
        }
    }

    state.files.rename(incomplete, final_path).await?;
    Ok(())
}

async fn serve_file_download<S>(stream: &mut S, state: &Arc<AppState>, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let path = PathBuf::from(&transfer.file_path);
    let wrapper = FileWrapper::new(state.files.as_ref(), path, state.config.preserve_resource_forks);

    if transfer.options == Some(2) {
        let data = wrapper.data_range(0, transfer.transfer_size as u64).await?;
        stream.write_all(&data).await?;
        state.transfers.record_sent(transfer, data.len() as u64);
        return Ok(());
    }

    let flat = wrapper.flatten().await?;
    let resuming = transfer.resume_data.is_some();
    let offset = transfer.resume_data.as_ref().map(FileResumeData::data_offset).unwrap_or(0) as u64;

    let mut envelope_flat = flat.clone();
    if resuming {
        envelope_flat.macr_size = None;
    }
    stream.write_all(&envelope_flat.encode_envelope()).await?;

    let data = wrapper.data_range(offset, flat.data_size as u64 - offset).await?;
    stream.write_all(&data).await?;
    state.transfers.record_sent(transfer, data.len() as u64);

    if !resuming {
        if flat.macr_size.is_some() {
            let macr = wrapper.read_resource_fork().await;
            stream.write_all(&macr).await?;
            state.transfers.record_sent(transfer, macr.len() as u64);
        }
    }
    info!("client {} downloaded {}", transfer.client_id, wrapper.reported_name());
    Ok(())
}

async fn serve_file_upload<S>(stream: &mut S, state: &Arc<AppState>, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let final_path = PathBuf::from(&transfer.file_path);
    let incomplete = incomplete_path(&final_path);
    receive_filp_stream(stream, state, &final_path, &incomplete).await?;
    info!("client {} uploaded {}", transfer.client_id, transfer.file_name);
    Ok(())
}

async fn send_file_header<S: AsyncWrite + Unpin>(stream: &mut S, is_dir: bool, rel_path: &str) -> crate::Result<()> {
    stream.write_u16(FILE_HEADER_SIZE).await?;
    stream.write_u16(if is_dir { FILE_HEADER_TYPE_DIR } else { FILE_HEADER_TYPE_FILE }).await?;
    let path_bytes = rel_path.as_bytes();
    stream.write_u16(path_bytes.len() as u16).await?;
    stream.write_all(path_bytes).await?;
    Ok(())
}

async fn send_whole_file<S>(stream: &mut S, state: &Arc<AppState>, path: &Path, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let wrapper = FileWrapper::new(state.files.as_ref(), path.to_path_buf(), state.config.preserve_resource_forks);
    let flat = wrapper.flatten().await?;
    stream.write_u32(flat.data_size).await?;
    stream.write_all(&flat.encode_envelope()).await?;
    let data = wrapper.data_range(0, flat.data_size as u64).await?;
    stream.write_all(&data).await?;
    state.transfers.record_sent(transfer, data.len() as u64);
    if flat.macr_size.is_some() {
        let macr = wrapper.read_resource_fork().await;
        stream.write_all(&macr).await?;
        state.transfers.record_sent(transfer, macr.len() as u64);
    }
    Ok(())
}

async fn send_resumed_file<S>(
    stream: &mut S,
    state: &Arc<AppState>,
    path: &Path,
    offset: u64,
    transfer: &Arc<FileTransfer>,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let wrapper = FileWrapper::new(state.files.as_ref(), path.to_path_buf(), state.config.preserve_resource_forks);
    let mut flat = wrapper.flatten().await?;
    flat.macr_size = None;
    let remaining = flat.data_size as u64 - offset;
    stream.write_u32(remaining as u32).await?;
    stream.write_all(&flat.encode_envelope()).await?;
    let data = wrapper.data_range(offset, remaining).await?;
    stream.write_all(&data).await?;
    state.transfers.record_sent(transfer, data.len() as u64);
    Ok(())
}

async fn walk_folder_download<S>(
    stream: &mut S,
    state: &Arc<AppState>,
    base: &Path,
    dir: &Path,
    transfer: &Arc<FileTransfer>,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut names = state.files.read_dir(dir).await?;
    names.sort();
    for name in names {
        if name.starts_with('.') {
            continue;
        }
        let child = dir.join(&name);
        let meta = match state.files.stat(&child).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let is_dir = meta.kind == crate::store::EntryKind::Dir;
        let rel = child.strip_prefix(base).unwrap_or(&child).to_string_lossy().into_owned();
        send_file_header(stream, is_dir, &rel).await?;
        let next_action = stream.read_u16().await?;

        if is_dir {
            Box::pin(walk_folder_download(stream, state, base, &child, transfer)).await?;
            continue;
        }

        match next_action {
            ACTION_SEND => send_whole_file(stream, state, &child, transfer).await?,
            ACTION_RESUME => {
                let len = stream.read_u16().await? as usize;
                let mut resume_bytes = vec![0u8; len];
                stream.read_exact(&mut resume_bytes).await?;
                let resume = parse_resume_data(&resume_bytes)?;
                send_resumed_file(stream, state, &child, resume.data_offset() as u64, transfer).await?;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn serve_folder_download<S>(stream: &mut S, state: &Arc<AppState>, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let base = PathBuf::from(&transfer.file_path);
    walk_folder_download(stream, state, &base, &base, transfer).await
}

const ACTION_NEXT_FILE: u16 = ACTION_SKIP;
const ACTION_SEND_FILE: u16 = ACTION_SEND;
const ACTION_RESUME_FILE: u16 = ACTION_RESUME;

async fn serve_folder_upload<S>(stream: &mut S, state: &Arc<AppState>, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let base = PathBuf::from(&transfer.file_path);
    if !state.files.exists(&base).await {
        state.files.mkdir(&base).await?;
    }
    stream.write_u8(0).await?;
    stream.write_u8(ACTION_SEND_FILE as u8).await?;

    for _ in 0..transfer.folder_item_count {
        let data_size = stream.read_u16().await?;
        let is_folder = stream.read_u16().await?;
        let _path_item_count = stream.read_u16().await?;
        if data_size < 4 {
            return Err(crate::Error::Protocol("malformed folderUpload record".into()));
        }
        let mut name_bytes = vec![0u8; data_size as usize - 4];
        stream.read_exact(&mut name_bytes).await?;
        let rel = String::from_utf8_lossy(&name_bytes).into_owned();
        let full = base.join(rel.trim_start_matches('/'));

        if is_folder != 0 {
            let _ = state.files.mkdir(&full).await;
            stream.write_u16(ACTION_NEXT_FILE).await?;
            continue;
        }

        let incomplete = incomplete_path(&full);
        if state.files.exists(&full).await {
            stream.write_u16(ACTION_NEXT_FILE).await?;
            continue;
        }

        if state.files.exists(&incomplete).await {
            let size = state.files.stat(&incomplete).await?.size;
            let resume =
                encode_resume_data(&FileResumeData { forks: vec![ForkResumeInfo { fork: ForkKind::Data, data_size: size as u32 }] });
            stream.write_u16(ACTION_RESUME_FILE).await?;
            stream.write_u16(resume.len() as u16).await?;
            stream.write_all(&resume).await?;
        } else {
            stream.write_u16(ACTION_SEND_FILE).await?;
        }

        let _incoming_size = stream.read_u32().await?;
        receive_filp_stream(stream, state, &full, &incomplete).await?;
    }
    Ok(())
}

async fn serve_banner_download<S>(stream: &mut S, state: &Arc<AppState>, transfer: &Arc<FileTransfer>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let banner = state.config.banner.clone().unwrap_or_default();
    stream.write_all(&banner).await?;
    state.transfers.record_sent(transfer, banner.len() as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Access;
    use crate::config::ServerConfig;
    use crate::models::Account;
    use crate::store::{AccountStore, BanList, EntryKind, FileStore, Metadata};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;
    use std::time::SystemTime;
    use tokio::io::duplex;

    struct NoopAccounts;
    #[async_trait]
    impl AccountStore for NoopAccounts {
        async fn get(&self, _login: &str) -> Option<Account> {
            None
        }
        async fn create(&self, _account: Account) -> crate::Result<()> {
            Ok(())
        }
        async fn update(&self, _login: &str, _account: Account) -> crate::Result<()> {
            Ok(())
        }
        async fn rename(&self, _old_login: &str, _new_login: &str) -> crate::Result<()> {
            Ok(())
        }
        async fn delete(&self, _login: &str) -> crate::Result<()> {
            Ok(())
        }
        async fn list(&self) -> Vec<Account> {
            Vec::new()
        }
    }

    struct NoopBans;
    #[async_trait]
    impl BanList for NoopBans {
        async fn is_banned(&self, _ip: IpAddr) -> (bool, Option<SystemTime>) {
            (false, None)
        }
        async fn add(&self, _ip: IpAddr, _expiry: Option<SystemTime>) {}
        async fn remove(&self, _ip: IpAddr) {}
    }

    /// A tiny in-memory `FileStore`: enough to exercise the transfer session
    /// without touching a real filesystem.
    #[derive(Default)]
    struct MemFiles {
        files: StdMutex<HashMap<PathBuf, Vec<u8>>>,
    }

    #[async_trait]
    impl FileStore for MemFiles {
        async fn stat(&self, path: &Path) -> io::Result<Metadata> {
            let files = self.files.lock().unwrap();
            let data = files.get(path).ok_or(io::ErrorKind::NotFound)?;
            Ok(Metadata { kind: EntryKind::File, size: data.len() as u64, modified: SystemTime::now(), created: SystemTime::now() })
        }
        async fn mkdir(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let mut files = self.files.lock().unwrap();
            let data = files.remove(from).ok_or(io::ErrorKind::NotFound)?;
            files.insert(to.to_path_buf(), data);
            Ok(())
        }
        async fn remove(&self, path: &Path) -> io::Result<()> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
        async fn symlink(&self, _target: &Path, _link: &Path) -> io::Result<()> {
            Ok(())
        }
        async fn read_dir(&self, _path: &Path) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned().ok_or_else(|| io::ErrorKind::NotFound.into())
        }
        async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.files.lock().unwrap().insert(path.to_path_buf(), data.to_vec());
            Ok(())
        }
        async fn append_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.files.lock().unwrap().entry(path.to_path_buf()).or_default().extend_from_slice(data);
            Ok(())
        }
        async fn read_range(&self, path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>> {
            let files = self.files.lock().unwrap();
            let data = files.get(path).ok_or(io::ErrorKind::NotFound)?;
            let start = offset as usize;
            let end = (start + len as usize).min(data.len());
            Ok(data.get(start..end).unwrap_or_default().to_vec())
        }
        async fn read_resource_fork(&self, _path: &Path) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn write_resource_fork(&self, _path: &Path, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        async fn read_comment(&self, _path: &Path) -> io::Result<String> {
            Ok(String::new())
        }
        async fn write_comment(&self, _path: &Path, _comment: &str) -> io::Result<()> {
            Ok(())
        }
        async fn exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }
    }

    fn test_state() -> Arc<AppState> {
        let files = Arc::new(MemFiles::default());
        files.files.lock().unwrap().insert(PathBuf::from("/root/greeting.txt"), b"hello world".to_vec());
        Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(NoopAccounts),
            Arc::new(crate::news::InMemoryThreadedNewsStore::new()),
            Arc::new(crate::news::InMemoryFlatNewsStore::new()),
            Arc::new(NoopBans),
            files,
        ))
    }

    #[tokio::test]
    async fn file_download_streams_envelope_then_data() {
        let state = test_state();
        let ref_num = state
            .transfers
            .register(1, TransferType::FileDownload, "greeting.txt".into(), "/root/greeting.txt".into(), 11, 0, None, None)
            .await;

        let (mut client, server) = duplex(8192);
        let mut preamble = Vec::new();
        preamble.extend_from_slice(crate::transfer::HTXF_MAGIC);
        preamble.extend_from_slice(&ref_num);
        preamble.extend_from_slice(&0u32.to_be_bytes());
        preamble.extend_from_slice(&0u32.to_be_bytes());

        let state2 = state.clone();
        let handle = tokio::spawn(async move { handle_transfer_session(server, state2).await });

        client.write_all(&preamble).await.unwrap();
        client.flush().await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        handle.await.unwrap().unwrap();

        assert!(out.ends_with(b"hello world"));
        assert!(state.transfers.get(ref_num).await.is_none());
    }

    #[tokio::test]
    async fn unknown_ref_num_fails_fast() {
        let state = test_state();
        let (mut client, server) = duplex(8192);
        let mut preamble = Vec::new();
        preamble.extend_from_slice(crate::transfer::HTXF_MAGIC);
        preamble.extend_from_slice(&[9, 9, 9, 9]);
        preamble.extend_from_slice(&0u32.to_be_bytes());
        preamble.extend_from_slice(&0u32.to_be_bytes());

        let handle = tokio::spawn(async move { handle_transfer_session(server, state).await });
        client.write_all(&preamble).await.unwrap();
        client.flush().await.unwrap();
        drop(client);

        assert!(handle.await.unwrap().is_err());
    }
}
