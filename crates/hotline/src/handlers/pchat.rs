//! Private-chat handlers: invite, join, leave, subject, and decline.

use crate::dispatch::{reply_to, BoxFuture, HandlerResult};
use crate::models::{ClientConn, UserFlags};
use crate::protocol::{field, Field, TranType, Transaction};
use crate::state::AppState;
use std::sync::Arc;

fn chat_id_field(tx: &Transaction) -> crate::Result<[u8; 4]> {
    tx.field_bytes(field::CHAT_ID)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .ok_or_else(|| crate::Error::Protocol("missing chat id".into()))
}

pub fn tran_invite_new_chat<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let target_id = tx
            .field_bytes(field::USER_ID)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_be_bytes)
            .ok_or_else(|| crate::Error::Protocol("missing user id".into()))?;

        let chat_id = state.chats.new_chat(cc.clone()).await;

        let mut replies = vec![(
            cc.id,
            Transaction::reply_to(tx, vec![Field::new(field::CHAT_ID, chat_id.to_vec())]),
        )];

        if let Some(target) = state.clients.get(target_id).await {
            if !target.has_flag(UserFlags::REFUSE_PCHAT).await {
                replies.push((
                    target.id,
                    Transaction::request(
                        TranType::InviteToChat,
                        0,
                        vec![
                            Field::new(field::CHAT_ID, chat_id.to_vec()),
                            Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec()),
                            Field::new(field::USER_NAME, cc.name().await),
                        ],
                    ),
                ));
            }
        }
        Ok(replies)
    })
}

/// `TranInviteToChat`: invites an additional user into a chat the caller
/// already belongs to, as opposed to `TranInviteNewChat` which creates one.
pub fn tran_invite_to_chat<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let chat_id = chat_id_field(tx)?;
        let target_id = tx
            .field_bytes(field::USER_ID)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_be_bytes)
            .ok_or_else(|| crate::Error::Protocol("missing user id".into()))?;

        if state.chats.get(chat_id).await.is_none() {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        }

        let Some(target) = state.clients.get(target_id).await else {
            return Ok(Vec::new());
        };
        if target.has_flag(UserFlags::REFUSE_PCHAT).await {
            return Ok(Vec::new());
        }

        Ok(vec![(
            target.id,
            Transaction::request(
                TranType::InviteToChat,
                0,
                vec![
                    Field::new(field::CHAT_ID, chat_id.to_vec()),
                    Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec()),
                    Field::new(field::USER_NAME, cc.name().await),
                ],
            ),
        )])
    })
}

pub fn tran_join_chat<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let chat_id = chat_id_field(tx)?;
        let Some(_chat) = state.chats.join(chat_id, cc.clone()).await else {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        };
        let subject = state.chats.subject(chat_id).await.unwrap_or_default();
        let members = state.chats.members(chat_id).await;

        let mut fields = vec![Field::new(field::CHAT_SUBJECT, subject.into_bytes())];
        for m in &members {
            let mut data = Vec::new();
            data.extend_from_slice(&m.id.to_be_bytes());
            data.extend_from_slice(&m.icon.to_be_bytes());
            data.extend_from_slice(&m.flags.lock().await.bits().to_be_bytes());
            let name = m.name().await;
            data.extend_from_slice(&(name.len() as u16).to_be_bytes());
            data.extend_from_slice(&name);
            fields.push(Field::new(field::USERNAME_WITH_INFO, data));
        }

        let join_notice = Transaction::request(
            TranType::NotifyChatChangeUser,
            0,
            vec![Field::new(field::CHAT_ID, chat_id.to_vec()), Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec())],
        );
        state.chats.broadcast(chat_id, join_notice).await;

        reply_to(cc, tx, fields)
    })
}

pub fn tran_leave_chat<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let chat_id = chat_id_field(tx)?;
        state.chats.leave(chat_id, cc.id).await;
        let notice = Transaction::request(
            TranType::NotifyChatDeleteUser,
            0,
            vec![Field::new(field::CHAT_ID, chat_id.to_vec()), Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec())],
        );
        state.chats.broadcast(chat_id, notice).await;
        Ok(Vec::new())
    })
}

pub fn tran_reject_chat_invite<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let chat_id = chat_id_field(tx)?;
        let name = String::from_utf8_lossy(&cc.name().await).into_owned();
        let notice = Transaction::request(
            TranType::ServerMsg,
            0,
            vec![Field::new(field::DATA, format!("{} declined your invitation.", name).into_bytes())],
        );
        state.chats.broadcast(chat_id, notice).await;
        Ok(Vec::new())
    })
}

pub fn tran_set_chat_subject<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let chat_id = chat_id_field(tx)?;
        let subject = tx.field_string(field::CHAT_SUBJECT).unwrap_or_default();
        state.chats.set_subject(chat_id, subject.clone()).await;
        let notice = Transaction::request(
            TranType::NotifyChatSubject,
            0,
            vec![Field::new(field::CHAT_ID, chat_id.to_vec()), Field::new(field::CHAT_SUBJECT, subject.into_bytes())],
        );
        state.chats.broadcast(chat_id, notice).await;
        Ok(Vec::new())
    })
}
