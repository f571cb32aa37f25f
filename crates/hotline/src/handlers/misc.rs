//! Small handlers that don't warrant their own file: client self-info
//! updates, the 1.5+ login completion, keepalive, and server-wide
//! broadcast.

use crate::access::AccessBit;
use crate::dispatch::{empty_reply, BoxFuture, HandlerResult};
use crate::models::{ClientConn, UserFlags};
use crate::protocol::{field, Field, TranType, Transaction};
use crate::state::AppState;
use std::sync::Arc;

fn notify_change_user(cc_id: u16, icon: i16, flags: UserFlags, name: &[u8]) -> Transaction {
    Transaction::request(
        TranType::NotifyChangeUser,
        0,
        vec![
            Field::new(field::USER_ID, cc_id.to_be_bytes().to_vec()),
            Field::new(field::USER_ICON_ID, icon.to_be_bytes().to_vec()),
            Field::new(field::USER_FLAGS, flags.bits().to_be_bytes().to_vec()),
            Field::new(field::USER_NAME, name.to_vec()),
        ],
    )
}

pub fn tran_set_client_user_info<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if let Some(name) = tx.field_string(field::USER_NAME) {
            if cc.account.lock().await.access.is_set(AccessBit::AnyName) {
                *cc.user_name.lock().await = name.into_bytes();
            }
        }
        if let Some(opts) = tx.field_bytes(field::OPTIONS).and_then(|b| b.try_into().ok()).map(u16::from_be_bytes) {
            cc.set_flag(UserFlags::REFUSE_PM, opts & 0b0000_0000_0000_0010 != 0).await;
            cc.set_flag(UserFlags::REFUSE_PCHAT, opts & 0b0000_0000_0000_0100 != 0).await;
        }
        if let Some(auto) = tx.field_bytes(field::AUTOMATIC_RESPONSE) {
            *cc.auto_reply.lock().await = auto.to_vec();
        }

        let flags = *cc.flags.lock().await;
        let name = cc.name().await;
        state.broadcast(notify_change_user(cc.id, cc.icon, flags, &name)).await;
        empty_reply(cc, tx)
    })
}

pub fn tran_agreed<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if let Some(name) = tx.field_string(field::USER_NAME) {
            *cc.user_name.lock().await = name.into_bytes();
        }
        if let Some(auto) = tx.field_bytes(field::AUTOMATIC_RESPONSE) {
            *cc.auto_reply.lock().await = auto.to_vec();
        }
        if let Some(opts) = tx.field_bytes(field::OPTIONS).and_then(|b| b.try_into().ok()).map(u16::from_be_bytes) {
            cc.set_flag(UserFlags::REFUSE_PM, opts & 0b0000_0000_0000_0010 != 0).await;
            cc.set_flag(UserFlags::REFUSE_PCHAT, opts & 0b0000_0000_0000_0100 != 0).await;
        }

        let flags = *cc.flags.lock().await;
        let name = cc.name().await;
        state.broadcast(notify_change_user(cc.id, cc.icon, flags, &name)).await;

        let mut replies = vec![(cc.id, Transaction::reply_to(tx, Vec::new()))];
        if let Some(banner) = &state.config.banner {
            replies.push((
                cc.id,
                Transaction::request(TranType::ServerBanner, 0, vec![Field::u32(field::TRANSFER_SIZE, banner.len() as u32)]),
            ));
        }
        Ok(replies)
    })
}

pub fn tran_keep_alive<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    _state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move { empty_reply(cc, tx) })
}

pub fn tran_user_broadcast<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let data = tx.field_string(field::DATA).unwrap_or_default();
        state
            .broadcast(Transaction::request(TranType::ServerMsg, 0, vec![Field::new(field::DATA, data.into_bytes())]))
            .await;
        empty_reply(cc, tx)
    })
}
