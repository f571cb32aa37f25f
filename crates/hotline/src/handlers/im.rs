//! `TranSendInstantMsg`: private messaging between two connected clients.

use crate::dispatch::{BoxFuture, HandlerResult};
use crate::models::{ClientConn, UserFlags};
use crate::protocol::{field, Field, TranType, Transaction};
use crate::state::AppState;
use std::sync::Arc;

/// `FieldChatOptions` value used on `SendInstantMsg`-originated `ServerMsg`
/// replies. Distinct from `ChatSend`'s emote marker `{0, 1}`; the two
/// meanings must not be unified even though both ride the same field.
const IM_OPTIONS: [u8; 2] = [0, 2];

pub fn tran_send_instant_msg<'a>(
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
        let data = tx.field_string(field::DATA).unwrap_or_default();
        let sender_name = String::from_utf8_lossy(&cc.name().await).into_owned();

        let Some(target) = state.clients.get(target_id).await else {
            return Ok(Vec::new());
        };

        let mut replies = Vec::new();

        if target.has_flag(UserFlags::REFUSE_PM).await {
            let target_name = String::from_utf8_lossy(&target.name().await).into_owned();
            let msg = format!("{} does not accept private messages.", target_name);
            replies.push((
                cc.id,
                Transaction::request(
                    TranType::ServerMsg,
                    0,
                    vec![
                        Field::new(field::DATA, msg.into_bytes()),
                        Field::new(field::CHAT_OPTIONS, IM_OPTIONS.to_vec()),
                    ],
                ),
            ));
            state.stats.inc_instant_messages_sent();
            return Ok(replies);
        }

        let auto_reply = target.auto_reply.lock().await.clone();

        let mut to_target_fields = vec![
            Field::new(field::DATA, data.clone().into_bytes()),
            Field::new(field::USER_NAME, sender_name.clone().into_bytes()),
            Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec()),
            Field::new(field::CHAT_OPTIONS, IM_OPTIONS.to_vec()),
        ];
        if let Some(q) = tx.field_bytes(field::QUOTING_MSG) {
            to_target_fields.push(Field::new(field::QUOTING_MSG, q.to_vec()));
        }
        replies.push((target.id, Transaction::request(TranType::ServerMsg, 0, to_target_fields)));

        if !auto_reply.is_empty() {
            replies.push((
                cc.id,
                Transaction::request(
                    TranType::ServerMsg,
                    0,
                    vec![
                        Field::new(field::DATA, String::from_utf8_lossy(&auto_reply).into_owned().into_bytes()),
                        Field::new(field::USER_NAME, target.name().await),
                        Field::new(field::USER_ID, target.id.to_be_bytes().to_vec()),
                        Field::new(field::CHAT_OPTIONS, IM_OPTIONS.to_vec()),
                    ],
                ),
            ));
        }

        state.stats.inc_instant_messages_sent();
        Ok(replies)
    })
}
