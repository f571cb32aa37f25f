//! `TranChatSend`: public-chat and private-chat message fan-out.

use crate::access::AccessBit;
use crate::chat::{chat_msg, format_public_chat, is_emote_options};
use crate::dispatch::{BoxFuture, HandlerResult};
use crate::models::ClientConn;
use crate::protocol::{field, Transaction};
use crate::state::AppState;
use std::sync::Arc;

pub fn tran_chat_send<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let data = tx.field_string(field::DATA).unwrap_or_default();
        let name = String::from_utf8_lossy(&cc.name().await).into_owned();
        let formatted = format_public_chat(&name, &data, is_emote_options(tx));

        let chat_id = tx.field_bytes(field::CHAT_ID).and_then(|b| <[u8; 4]>::try_from(b).ok());
        let msg = chat_msg(formatted, chat_id);

        if let Some(id) = chat_id {
            state.chats.broadcast(id, msg).await;
        } else {
            for client in state.clients.list().await {
                if client.account.lock().await.access.is_set(AccessBit::ReadChat) {
                    client.send(msg.clone());
                }
            }
        }
        state.stats.inc_chat_messages_sent();
        Ok(Vec::new())
    })
}
