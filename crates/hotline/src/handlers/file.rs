//! File-operation handlers: metadata, filesystem mutation, and transfer
//! registration. The handlers here only register a `FileTransfer` and
//! reply with its reference number; streaming the actual bytes happens on
//! the file-transfer port (`transfer_session`), once the client opens that
//! second connection.

use crate::access::AccessBit;
use crate::dispatch::{reply_to, BoxFuture, HandlerResult};
use crate::filewrapper::{self, FileWrapper};
use crate::models::{ClientConn, TransferType};
use crate::protocol::{field, Field, Transaction};
use crate::state::AppState;
use crate::store::{parse_resume_data, EntryKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn resolve(state: &AppState, path_field: Option<&str>, name_field: Option<&str>) -> PathBuf {
    let mut p = state.config.file_root.clone();
    if let Some(path) = path_field {
        p.push(path.trim_start_matches('/'));
    }
    if let Some(name) = name_field {
        p.push(name);
    }
    p
}

fn path_and_name(tx: &Transaction) -> (Option<String>, Option<String>) {
    (tx.field_string(field::FILE_PATH), tx.field_string(field::FILE_NAME))
}

async fn upload_allowed(state: &AppState, cc: &ClientConn, path: &Path) -> bool {
    if cc.account.lock().await.access.is_set(AccessBit::UploadAnywhere) {
        return true;
    }
    filewrapper::is_under_uploads(path) || filewrapper::is_dropbox(path)
}

pub fn tran_get_file_name_list<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, _) = path_and_name(tx);
        let dir = resolve(state, path.as_deref(), None);

        if filewrapper::is_dropbox(&dir) && !cc.account.lock().await.access.is_set(AccessBit::ViewDropBoxes) {
            return reply_to(cc, tx, Vec::new());
        }

        let entries = filewrapper::list_names(state.files.as_ref(), &dir, &state.config.ignore_files).await?;
        let mut fields = Vec::with_capacity(entries.len());
        for e in entries {
            let mut data = Vec::new();
            data.extend_from_slice(&e.file_type);
            data.extend_from_slice(&e.creator);
            data.extend_from_slice(&(e.size as u32).to_be_bytes());
            data.extend_from_slice(&0u32.to_be_bytes()); // reserved
            data.extend_from_slice(&(e.name.len() as u16).to_be_bytes());
            data.extend_from_slice(e.name.as_bytes());
            fields.push(Field::new(field::FILE_NAME_WITH_INFO, data));
        }
        reply_to(cc, tx, fields)
    })
}

pub fn tran_get_file_info<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        let wrapper = FileWrapper::new(state.files.as_ref(), full, state.config.preserve_resource_forks);
        let flat = wrapper.flatten().await?;

        reply_to(
            cc,
            tx,
            vec![
                Field::new(field::FILE_NAME, flat.info.name.clone()),
                Field::new(field::FILE_TYPE_STRING, flat.info.file_type.to_vec()),
                Field::new(field::FILE_CREATOR_STRING, flat.info.creator.to_vec()),
                Field::new(field::FILE_COMMENT, flat.info.comment.clone()),
                Field::u32(field::FILE_SIZE, flat.data_size),
                Field::new(field::FILE_CREATE_DATE, flat.info.create_date.to_vec()),
                Field::new(field::FILE_MODIFY_DATE, flat.info.modify_date.to_vec()),
            ],
        )
    })
}

pub fn tran_set_file_info<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        let meta = state.files.stat(&full).await;
        let bit = match meta {
            Ok(m) if m.kind == EntryKind::Dir => AccessBit::RenameFolder,
            _ => AccessBit::RenameFile,
        };
        if !cc.account.lock().await.access.is_set(bit) {
            return Err(crate::Error::Denied("You are not allowed to rename this item.".into()));
        }

        if let Some(comment) = tx.field_string(field::FILE_COMMENT) {
            let comment_bit = match meta {
                Ok(m) if m.kind == EntryKind::Dir => AccessBit::SetFolderComment,
                _ => AccessBit::SetFileComment,
            };
            if cc.account.lock().await.access.is_set(comment_bit) {
                state.files.write_comment(&full, &comment).await?;
            }
        }

        if let Some(new_name) = tx.field_string(field::FILE_NEW_NAME) {
            let new_path = full.with_file_name(new_name);
            state.files.rename(&full, &new_path).await?;
        }

        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_delete_file<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        let is_dir = state.files.stat(&full).await.map(|m| m.kind == EntryKind::Dir).unwrap_or(false);
        let bit = if is_dir { AccessBit::DeleteFolder } else { AccessBit::DeleteFile };
        if !cc.account.lock().await.access.is_set(bit) {
            return Err(crate::Error::Denied("You are not allowed to delete this item.".into()));
        }
        state.files.remove(&full).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_move_file<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let from = resolve(state, path.as_deref(), name.as_deref());
        let is_dir = state.files.stat(&from).await.map(|m| m.kind == EntryKind::Dir).unwrap_or(false);
        let bit = if is_dir { AccessBit::MoveFolder } else { AccessBit::MoveFile };
        if !cc.account.lock().await.access.is_set(bit) {
            return Err(crate::Error::Denied("You are not allowed to move this item.".into()));
        }
        let new_path = tx.field_string(field::FILE_NEW_PATH).unwrap_or_default();
        let to = resolve(state, Some(&new_path), name.as_deref());
        state.files.rename(&from, &to).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_new_folder<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        state.files.mkdir(&full).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_make_file_alias<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let target = resolve(state, path.as_deref(), name.as_deref());
        let new_path = tx.field_string(field::FILE_NEW_PATH).unwrap_or_default();
        let link = resolve(state, Some(&new_path), name.as_deref());
        state.files.symlink(&target, &link).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_download_file<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        let wrapper = FileWrapper::new(state.files.as_ref(), full.clone(), state.config.preserve_resource_forks);
        let flat = wrapper.flatten().await?;

        let resume_data = match tx.field_bytes(field::FILE_RESUME_DATA) {
            Some(b) => Some(parse_resume_data(b)?),
            None => None,
        };
        let options = tx.field_bytes(field::FILE_TRANSFER_OPTIONS).and_then(|b| b.try_into().ok()).map(u16::from_be_bytes);

        let file_path_str = full.to_string_lossy().into_owned();
        let ref_num = state
            .transfers
            .register(
                cc.id,
                TransferType::FileDownload,
                wrapper.reported_name(),
                file_path_str,
                flat.data_size,
                0,
                resume_data,
                options,
            )
            .await;

        reply_to(
            cc,
            tx,
            vec![
                Field::new(field::REF_NUM, ref_num.to_vec()),
                Field::u32(field::TRANSFER_SIZE, flat.data_size),
                Field::new(field::FILE_SIZE, flat.data_size.to_be_bytes().to_vec()),
            ],
        )
    })
}

pub fn tran_upload_file<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());

        if !upload_allowed(state, cc, &full).await {
            return Err(crate::Error::Denied("Uploads are only permitted to the Uploads folder or a drop box.".into()));
        }
        if state.files.exists(&full).await {
            return Err(crate::Error::Denied("A file by that name already exists.".into()));
        }

        let ref_num = state
            .transfers
            .register(
                cc.id,
                TransferType::FileUpload,
                name.unwrap_or_default(),
                full.to_string_lossy().into_owned(),
                0,
                0,
                None,
                None,
            )
            .await;

        reply_to(cc, tx, vec![Field::new(field::REF_NUM, ref_num.to_vec())])
    })
}

pub fn tran_download_fldr<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        let total_size = filewrapper::calc_total_size(state.files.as_ref(), &full).await? as u32;
        let item_count = filewrapper::calc_item_count(state.files.as_ref(), &full, &state.config.ignore_files).await?;

        let ref_num = state
            .transfers
            .register(
                cc.id,
                TransferType::FolderDownload,
                name.unwrap_or_default(),
                full.to_string_lossy().into_owned(),
                total_size,
                item_count,
                None,
                None,
            )
            .await;

        reply_to(
            cc,
            tx,
            vec![
                Field::new(field::REF_NUM, ref_num.to_vec()),
                Field::u32(field::TRANSFER_SIZE, total_size),
                Field::u16(field::FOLDER_ITEM_COUNT, item_count),
            ],
        )
    })
}

pub fn tran_upload_fldr<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let (path, name) = path_and_name(tx);
        let full = resolve(state, path.as_deref(), name.as_deref());
        if !upload_allowed(state, cc, &full).await {
            return Err(crate::Error::Denied("Uploads are only permitted to the Uploads folder or a drop box.".into()));
        }
        let item_count = tx.field_bytes(field::FOLDER_ITEM_COUNT).and_then(|b| b.try_into().ok()).map(u16::from_be_bytes).unwrap_or(0);

        let ref_num = state
            .transfers
            .register(
                cc.id,
                TransferType::FolderUpload,
                name.unwrap_or_default(),
                full.to_string_lossy().into_owned(),
                0,
                item_count,
                None,
                None,
            )
            .await;

        reply_to(cc, tx, vec![Field::new(field::REF_NUM, ref_num.to_vec())])
    })
}

pub fn tran_download_banner<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let banner = state.config.banner.clone().unwrap_or_default();
        let ref_num = state
            .transfers
            .register(cc.id, TransferType::BannerDownload, "banner".into(), String::new(), banner.len() as u32, 0, None, None)
            .await;
        reply_to(
            cc,
            tx,
            vec![Field::new(field::REF_NUM, ref_num.to_vec()), Field::u32(field::TRANSFER_SIZE, banner.len() as u32)],
        )
    })
}
