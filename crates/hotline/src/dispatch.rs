//! Transaction dispatcher: type -> handler, required-field/permission
//! validation, and outbox delivery.

use crate::access::AccessBit;
use crate::models::ClientConn;
use crate::protocol::{Field, TranType, Transaction, field};
use crate::state::AppState;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler's return value: each `(client_id, Transaction)` pair is
/// addressed to one recipient and enqueued on that client's outbox.
pub type HandlerResult = crate::Result<Vec<(u16, Transaction)>>;

pub type HandlerFn = for<'a> fn(&'a Arc<ClientConn>, &'a Transaction, &'a Arc<AppState>) -> BoxFuture<'a, HandlerResult>;

pub struct HandlerDef {
    pub required_access: Option<AccessBit>,
    pub deny_message: &'static str,
    pub required_fields: &'static [u16],
    pub handler: HandlerFn,
}

/// Type -> handler lookup table, built once at startup.
pub struct Dispatcher {
    table: HashMap<u16, HandlerDef>,
}

impl Dispatcher {
    pub fn new(table: HashMap<u16, HandlerDef>) -> Dispatcher {
        Dispatcher { table }
    }

    /// Looks up, validates and runs the handler for `tx`, returning the
    /// addressed replies to enqueue. Permission/validation failures are
    /// turned into a single error reply to the sender rather than
    /// propagated rather than closing the connection.
    pub async fn dispatch(&self, cc: &Arc<ClientConn>, tx: &Transaction, state: &Arc<AppState>) -> Vec<(u16, Transaction)> {
        let Some(def) = self.table.get(&tx.ty) else {
            return vec![(cc.id, Transaction::error_reply(tx, "Unsupported transaction type."))];
        };

        if let Some(bit) = def.required_access {
            let has = cc.account.lock().await.access.is_set(bit);
            if !has {
                return vec![(cc.id, Transaction::error_reply(tx, def.deny_message))];
            }
        }

        if let Some(missing) = missing_required_field(tx, def.required_fields) {
            return vec![(cc.id, Transaction::error_reply(tx, &format!("Missing required field {}.", missing)))];
        }

        match (def.handler)(cc, tx, state).await {
            Ok(replies) => replies,
            Err(e) => vec![(cc.id, Transaction::error_reply(tx, &e.to_string()))],
        }
    }
}

/// Returns the first required field ID absent from `tx`, if any.
fn missing_required_field(tx: &Transaction, required: &[u16]) -> Option<u16> {
    required.iter().copied().find(|id| tx.field(*id).is_none())
}

/// Convenience for handlers building a single-recipient reply.
pub fn reply_to(cc: &Arc<ClientConn>, tx: &Transaction, fields: Vec<Field>) -> HandlerResult {
    Ok(vec![(cc.id, Transaction::reply_to(tx, fields))])
}

pub fn empty_reply(cc: &Arc<ClientConn>, tx: &Transaction) -> HandlerResult {
    Ok(vec![(cc.id, Transaction::reply_to(tx, Vec::new()))])
}

pub fn server_msg_to(cc_id: u16, text: &str) -> (u16, Transaction) {
    (
        cc_id,
        Transaction::request(TranType::ServerMsg, 0, vec![Field::new(field::DATA, text.as_bytes().to_vec())]),
    )
}
