//! Builds the dispatcher's type -> handler table. ~45 handlers split by
//! concern across sibling modules.

mod chat;
mod file;
mod im;
mod misc;
mod news;
mod pchat;
mod user;

use crate::access::AccessBit;
use crate::dispatch::{Dispatcher, HandlerDef};
use crate::protocol::{field, TranType};
use std::collections::HashMap;

macro_rules! entry {
    ($table:ident, $ty:expr, $access:expr, $deny:expr, $fields:expr, $handler:expr) => {
        $table.insert(
            $ty as u16,
            HandlerDef { required_access: $access, deny_message: $deny, required_fields: $fields, handler: $handler },
        );
    };
}

/// Builds the default handler table.
pub fn default_dispatcher() -> Dispatcher {
    let mut table: HashMap<u16, HandlerDef> = HashMap::new();

    entry!(table, TranType::ChatSend, Some(AccessBit::SendChat), "You are not allowed to send chat messages.", &[field::DATA], chat::tran_chat_send);
    entry!(table, TranType::SendInstantMsg, Some(AccessBit::SendPrivMsg), "You are not allowed to send private messages.", &[field::USER_ID], im::tran_send_instant_msg);

    entry!(table, TranType::GetFileNameList, None, "", &[], file::tran_get_file_name_list);
    entry!(table, TranType::GetFileInfo, None, "", &[], file::tran_get_file_info);
    entry!(table, TranType::SetFileInfo, None, "", &[], file::tran_set_file_info);
    entry!(table, TranType::DeleteFile, None, "", &[], file::tran_delete_file);
    entry!(table, TranType::MoveFile, None, "", &[], file::tran_move_file);
    entry!(table, TranType::NewFolder, Some(AccessBit::CreateFolder), "You are not allowed to create folders.", &[], file::tran_new_folder);
    entry!(table, TranType::MakeFileAlias, Some(AccessBit::MakeAlias), "You are not allowed to make aliases.", &[], file::tran_make_file_alias);
    entry!(table, TranType::DownloadFile, Some(AccessBit::DownloadFile), "You are not allowed to download files.", &[field::FILE_NAME], file::tran_download_file);
    entry!(table, TranType::UploadFile, Some(AccessBit::UploadFile), "You are not allowed to upload files.", &[field::FILE_NAME], file::tran_upload_file);
    entry!(table, TranType::DownloadFldr, Some(AccessBit::DownloadFolder), "You are not allowed to download folders.", &[field::FILE_NAME], file::tran_download_fldr);
    entry!(table, TranType::UploadFldr, Some(AccessBit::UploadFolder), "You are not allowed to upload folders.", &[field::FILE_NAME], file::tran_upload_fldr);
    entry!(table, TranType::DownloadBanner, None, "", &[], file::tran_download_banner);

    entry!(table, TranType::NewUser, Some(AccessBit::CreateUser), "You are not allowed to create new accounts.", &[field::USER_LOGIN], user::tran_new_user);
    entry!(table, TranType::DeleteUser, Some(AccessBit::DeleteUser), "You are not allowed to delete accounts.", &[field::USER_LOGIN], user::tran_delete_user);
    entry!(table, TranType::GetUser, Some(AccessBit::OpenUser), "You are not allowed to view accounts.", &[field::USER_LOGIN], user::tran_get_user);
    entry!(table, TranType::SetUser, Some(AccessBit::ModifyUser), "You are not allowed to modify accounts.", &[field::USER_LOGIN], user::tran_set_user);
    entry!(table, TranType::ListUsers, Some(AccessBit::OpenUser), "You are not allowed to view accounts.", &[], user::tran_list_users);
    entry!(table, TranType::UpdateUser, None, "", &[], user::tran_update_user);
    entry!(table, TranType::GetClientInfoText, Some(AccessBit::GetClientInfo), "You are not allowed to view client information.", &[field::USER_ID], user::tran_get_client_info_text);
    entry!(table, TranType::DisconnectUser, Some(AccessBit::DisconUser), "You are not allowed to disconnect users.", &[field::USER_ID], user::tran_disconnect_user);

    entry!(table, TranType::InviteNewChat, Some(AccessBit::OpenChat), "You are not allowed to request private chat.", &[field::USER_ID], pchat::tran_invite_new_chat);
    entry!(table, TranType::InviteToChat, Some(AccessBit::OpenChat), "You are not allowed to invite users to private chat.", &[field::CHAT_ID, field::USER_ID], pchat::tran_invite_to_chat);
    entry!(table, TranType::JoinChat, Some(AccessBit::OpenChat), "You are not allowed to join private chat.", &[field::CHAT_ID], pchat::tran_join_chat);
    entry!(table, TranType::LeaveChat, None, "", &[field::CHAT_ID], pchat::tran_leave_chat);
    entry!(table, TranType::RejectChatInvite, None, "", &[field::CHAT_ID], pchat::tran_reject_chat_invite);
    entry!(table, TranType::SetChatSubject, None, "", &[field::CHAT_ID], pchat::tran_set_chat_subject);

    entry!(table, TranType::GetNewsCatNameList, Some(AccessBit::NewsReadArt), "You are not allowed to read news.", &[], news::tran_get_news_cat_name_list);
    entry!(table, TranType::GetNewsArtNameList, Some(AccessBit::NewsReadArt), "You are not allowed to read news.", &[], news::tran_get_news_art_name_list);
    entry!(table, TranType::GetNewsArtData, Some(AccessBit::NewsReadArt), "You are not allowed to read news.", &[field::NEWS_ART_ID], news::tran_get_news_art_data);
    entry!(table, TranType::PostNewsArt, None, "", &[field::NEWS_ART_TITLE], news::tran_post_news_art);
    entry!(table, TranType::DelNewsArt, None, "", &[field::NEWS_ART_ID], news::tran_del_news_art);
    entry!(table, TranType::DelNewsItem, None, "", &[field::NEWS_PATH], news::tran_del_news_item);
    entry!(table, TranType::NewNewsCat, Some(AccessBit::NewsCreateCat), "You are not allowed to create news categories.", &[field::NEWS_CAT_NAME], news::tran_new_news_cat);
    entry!(table, TranType::NewNewsFldr, Some(AccessBit::NewsCreateFldr), "You are not allowed to create news bundles.", &[field::NEWS_CAT_NAME], news::tran_new_news_fldr);
    entry!(table, TranType::GetMsgs, Some(AccessBit::NewsReadArt), "You are not allowed to read the message board.", &[], news::tran_get_msgs);
    entry!(table, TranType::OldPostNews, None, "", &[field::DATA], news::tran_old_post_news);

    entry!(table, TranType::UserBroadcast, Some(AccessBit::UserBroadcast), "You are not allowed to broadcast.", &[field::DATA], misc::tran_user_broadcast);
    entry!(table, TranType::KeepAlive, None, "", &[], misc::tran_keep_alive);
    entry!(table, TranType::SetClientUserInfo, None, "", &[], misc::tran_set_client_user_info);
    entry!(table, TranType::Agreed, None, "", &[], misc::tran_agreed);

    Dispatcher::new(table)
}
