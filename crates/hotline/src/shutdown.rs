//! Graceful shutdown: tell every connected client before the process exits.

use crate::protocol::{field, Field, TranType, Transaction};
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Broadcasts a `DisconnectMsg` to everyone connected and gives outbox
/// writers a moment to flush before the caller tears down listeners.
pub async fn broadcast_shutdown(state: &Arc<AppState>, message: &str) {
    state
        .broadcast(Transaction::request(TranType::DisconnectMsg, 0, vec![Field::new(field::DATA, message.as_bytes().to_vec())]))
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Access;
    use crate::config::ServerConfig;
    use crate::models::{Account, ClientConn, UserFlags};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::Path;
    use tokio::sync::Mutex;

    struct NoopBans;
    #[async_trait]
    impl crate::store::BanList for NoopBans {
        async fn is_banned(&self, _ip: IpAddr) -> (bool, Option<std::time::SystemTime>) {
            (false, None)
        }
        async fn add(&self, _ip: IpAddr, _expiry: Option<std::time::SystemTime>) {}
        async fn remove(&self, _ip: IpAddr) {}
    }

    struct NoopAccounts;
    #[async_trait]
    impl crate::store::AccountStore for NoopAccounts {
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

    struct NoopFiles;
    #[async_trait]
    impl crate::store::FileStore for NoopFiles {
        async fn stat(&self, _path: &Path) -> std::io::Result<crate::store::Metadata> {
            Err(std::io::ErrorKind::NotFound.into())
        }
        async fn mkdir(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> std::io::Result<()> {
            Ok(())
        }
        async fn remove(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }
        async fn symlink(&self, _target: &Path, _link: &Path) -> std::io::Result<()> {
            Ok(())
        }
        async fn read_dir(&self, _path: &Path) -> std::io::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn read_file(&self, _path: &Path) -> std::io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn write_file(&self, _path: &Path, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        async fn append_file(&self, _path: &Path, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        async fn read_range(&self, _path: &Path, _offset: u64, _len: u64) -> std::io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn read_resource_fork(&self, _path: &Path) -> std::io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn write_resource_fork(&self, _path: &Path, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        async fn read_comment(&self, _path: &Path) -> std::io::Result<String> {
            Ok(String::new())
        }
        async fn write_comment(&self, _path: &Path, _comment: &str) -> std::io::Result<()> {
            Ok(())
        }
        async fn exists(&self, _path: &Path) -> bool {
            false
        }
    }

    fn test_conn(id: u16) -> (Arc<ClientConn>, tokio::sync::mpsc::UnboundedReceiver<Transaction>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = Arc::new(ClientConn {
            id,
            icon: 0,
            flags: Mutex::new(UserFlags::empty()),
            user_name: Mutex::new(b"test".to_vec()),
            version: Some(190),
            account: Mutex::new(Arc::new(Account::new("guest", "Guest", "", Access::EMPTY))),
            idle_time: Mutex::new(0),
            auto_reply: Mutex::new(Vec::new()),
            remote_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            outbox: tx,
            transfer_bucket: Mutex::new(Vec::new()),
        });
        (conn, rx)
    }

    #[tokio::test]
    async fn every_connected_client_receives_a_disconnect_message() {
        let state = Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(NoopAccounts),
            Arc::new(crate::news::InMemoryThreadedNewsStore::new()),
            Arc::new(crate::news::InMemoryFlatNewsStore::new()),
            Arc::new(NoopBans),
            Arc::new(NoopFiles),
        ));
        let (conn, mut rx) = test_conn(1);
        state.clients.insert(conn.clone()).await;

        broadcast_shutdown(&state, "Server is shutting down.").await;

        let received = rx.try_recv().expect("a disconnect message should be queued");
        assert_eq!(received.ty, TranType::DisconnectMsg as u16);
    }
}
