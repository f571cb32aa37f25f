//! Public chat formatting and private-chat room management.

use crate::access::AccessBit;
use crate::models::{ClientConn, PrivateChat};
use crate::protocol::{field, Field, TranType, Transaction};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Public chat is not itself a room; it is the set of all connected clients
/// with `ReadChat`. This keeps that broadcast fan-out and the formatting
/// rules next to the private-chat room management that shares its wire
/// shape.
#[derive(Default)]
pub struct ChatManager {
    rooms: RwLock<HashMap<[u8; 4], Arc<PrivateChat>>>,
}

const MAX_CHAT_MESSAGE: usize = 8192;

impl ChatManager {
    pub fn new() -> ChatManager {
        ChatManager { rooms: RwLock::new(HashMap::new()) }
    }

    /// Creates a private chat seeded with `creator`, returning its ID.
    pub async fn new_chat(&self, creator: Arc<ClientConn>) -> [u8; 4] {
        let mut id = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut id);
        let chat = Arc::new(PrivateChat::new(id, creator));
        self.rooms.write().await.insert(id, chat);
        id
    }

    pub async fn get(&self, id: [u8; 4]) -> Option<Arc<PrivateChat>> {
        self.rooms.read().await.get(&id).cloned()
    }

    pub async fn join(&self, id: [u8; 4], cc: Arc<ClientConn>) -> Option<Arc<PrivateChat>> {
        let chat = self.get(id).await?;
        chat.members.lock().await.insert(cc.id, cc);
        Some(chat)
    }

    /// Removes `client_id` from the chat. If the chat is now empty, it is
    /// dropped from the registry — invariant (c): a private chat exists iff
    /// at least one member holds a reference.
    pub async fn leave(&self, id: [u8; 4], client_id: u16) {
        let Some(chat) = self.get(id).await else { return };
        let mut members = chat.members.lock().await;
        members.remove(&client_id);
        let empty = members.is_empty();
        drop(members);
        if empty {
            self.rooms.write().await.remove(&id);
        }
    }

    pub async fn set_subject(&self, id: [u8; 4], subject: String) {
        if let Some(chat) = self.get(id).await {
            *chat.subject.lock().await = subject;
        }
    }

    pub async fn subject(&self, id: [u8; 4]) -> Option<String> {
        let chat = self.get(id).await?;
        Some(chat.subject.lock().await.clone())
    }

    /// Members sorted by client ID.
    pub async fn members(&self, id: [u8; 4]) -> Vec<Arc<ClientConn>> {
        let Some(chat) = self.get(id).await else { return Vec::new() };
        let members = chat.members.lock().await;
        let mut v: Vec<Arc<ClientConn>> = members.values().cloned().collect();
        v.sort_by_key(|c| c.id);
        v
    }

    /// Sends `tx` to every member of the chat, including the sender.
    pub async fn broadcast(&self, id: [u8; 4], tx: Transaction) {
        for member in self.members(id).await {
            member.send(tx.clone());
        }
    }
}

/// Formats a public chat line: `"\r%13.13s:  %s"`, or the emote form
/// `"\r*** <name> <text>"` when `chat_options == [0, 1]`.
pub fn format_public_chat(user_name: &str, message: &str, is_emote: bool) -> String {
    let mut truncated = message.to_string();
    if truncated.len() > MAX_CHAT_MESSAGE {
        truncated.truncate(MAX_CHAT_MESSAGE);
    }
    if is_emote {
        format!("\r*** {} {}", user_name, truncated)
    } else {
        let padded = pad_truncate_13(user_name);
        format!("\r{}:  {}", padded, truncated)
    }
}

/// Right-justifies (or truncates) to exactly 13 characters, C's `%13.13s`.
fn pad_truncate_13(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    chars.truncate(13);
    let s: String = chars.into_iter().collect();
    let pad = 13 - s.chars().count();
    format!("{}{}", " ".repeat(pad), s)
}

/// `true` iff the request's `ChatOptions` field is the two-byte emote
/// marker `{0, 1}`.
pub fn is_emote_options(tx: &Transaction) -> bool {
    matches!(tx.field_bytes(field::CHAT_OPTIONS), Some([0, 1]))
}

/// Builds the `ChatMsg` broadcast transaction for public chat.
pub fn chat_msg(data: String, chat_id: Option<[u8; 4]>) -> Transaction {
    let mut fields = vec![Field::new(field::DATA, data.into_bytes())];
    if let Some(id) = chat_id {
        fields.push(Field::new(field::CHAT_ID, id.to_vec()));
    }
    Transaction::request(TranType::ChatMsg, 0, fields)
}

/// Returns `false` if `cc` lacks `ReadChat`/whatever bit is passed, without
/// needing the caller to reach into `Account` directly.
pub async fn client_has_access(cc: &ClientConn, bit: AccessBit) -> bool {
    cc.account.lock().await.access.is_set(bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_plain_message() {
        let s = format_public_chat("Al", "hi", false);
        assert_eq!(s, "\r           Al:  hi");
    }

    #[test]
    fn formats_emote() {
        let s = format_public_chat("Al", "waves", true);
        assert_eq!(s, "\r*** Al waves");
    }

    #[test]
    fn truncates_long_names() {
        let s = format_public_chat("ThisNameIsWayTooLong", "hi", false);
        assert!(s.starts_with("\rThisNameIsWay:  hi"));
    }

    #[test]
    fn truncates_to_8192_bytes() {
        let long = "x".repeat(9000);
        let s = format_public_chat("Al", &long, false);
        assert!(s.len() <= MAX_CHAT_MESSAGE + 20);
    }
}
