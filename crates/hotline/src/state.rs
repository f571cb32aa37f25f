//! The capability bundle handlers receive, in place of the historical
//! mega-object: client/chat registries, account/news/ban stores, the file
//! store, the transfer manager and stats — everything a handler needs and
//! nothing it can reach into unexpectedly.

use crate::chat::ChatManager;
use crate::config::ServerConfig;
use crate::ratelimit::ConnAdmission;
use crate::registry::ClientRegistry;
use crate::stats::Stats;
use crate::store::{AccountStore, BanList, FileStore, FlatNewsStore, ThreadedNewsStore};
use crate::transfer::TransferManager;
use std::sync::Arc;

pub struct AppState {
    pub config: ServerConfig,
    pub clients: Arc<ClientRegistry>,
    pub chats: Arc<ChatManager>,
    pub accounts: Arc<dyn AccountStore>,
    pub threaded_news: Arc<dyn ThreadedNewsStore>,
    pub flat_news: Arc<dyn FlatNewsStore>,
    pub bans: Arc<dyn BanList>,
    pub files: Arc<dyn FileStore>,
    pub transfers: Arc<TransferManager>,
    pub stats: Arc<Stats>,
    pub conn_admission: Arc<ConnAdmission>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServerConfig,
        accounts: Arc<dyn AccountStore>,
        threaded_news: Arc<dyn ThreadedNewsStore>,
        flat_news: Arc<dyn FlatNewsStore>,
        bans: Arc<dyn BanList>,
        files: Arc<dyn FileStore>,
    ) -> AppState {
        AppState {
            config,
            clients: Arc::new(ClientRegistry::new()),
            chats: Arc::new(ChatManager::new()),
            accounts,
            threaded_news,
            flat_news,
            bans,
            files,
            transfers: Arc::new(TransferManager::new()),
            stats: Arc::new(Stats::new()),
            conn_admission: Arc::new(ConnAdmission::new()),
        }
    }

    /// Broadcasts `tx` to every connected client.
    pub async fn broadcast(&self, tx: crate::protocol::Transaction) {
        for client in self.clients.list().await {
            client.send(tx.clone());
        }
    }

    /// Broadcasts to every client with `ReadChat` (public chat's audience).
    pub async fn broadcast_to_chat_readers(&self, tx: crate::protocol::Transaction) {
        use crate::access::AccessBit;
        for client in self.clients.list().await {
            if crate::chat::client_has_access(&client, AccessBit::ReadChat).await {
                client.send(tx.clone());
            }
        }
    }
}
