//! Background idle sweep: every 10 seconds, clients silent for 300
//! seconds or more are marked away and the change is broadcast, matching
//! the flag a quiet `KeepAlive` alone does not clear.

use crate::conn::IDLE_THRESHOLD_SECS;
use crate::models::UserFlags;
use crate::protocol::{field, Field, TranType, Transaction};
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

pub const SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Runs until `state` is dropped elsewhere; intended to be spawned once per
/// server and never joined.
pub async fn run(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(SCAN_INTERVAL);
    loop {
        ticker.tick().await;
        sweep(&state).await;
    }
}

async fn sweep(state: &Arc<AppState>) {
    for client in state.clients.list().await {
        let mut idle = client.idle_time.lock().await;
        *idle += SCAN_INTERVAL.as_secs();
        let became_idle = *idle >= IDLE_THRESHOLD_SECS && !client.has_flag(UserFlags::AWAY).await;
        drop(idle);

        if became_idle {
            client.set_flag(UserFlags::AWAY, true).await;
            let flags = *client.flags.lock().await;
            let name = client.name().await;
            state
                .broadcast(Transaction::request(
                    TranType::NotifyChangeUser,
                    0,
                    vec![
                        Field::new(field::USER_ID, client.id.to_be_bytes().to_vec()),
                        Field::new(field::USER_ICON_ID, client.icon.to_be_bytes().to_vec()),
                        Field::new(field::USER_FLAGS, flags.bits().to_be_bytes().to_vec()),
                        Field::new(field::USER_NAME, name),
                    ],
                ))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Access;
    use crate::config::ServerConfig;
    use crate::models::{Account, ClientConn};
    use crate::store::EntryKind;
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
            let _ = EntryKind::File;
            false
        }
    }

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(NoopAccounts),
            Arc::new(crate::news::InMemoryThreadedNewsStore::new()),
            Arc::new(crate::news::InMemoryFlatNewsStore::new()),
            Arc::new(NoopBans),
            Arc::new(NoopFiles),
        ))
    }

    fn test_conn(id: u16) -> Arc<ClientConn> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(ClientConn {
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
        })
    }

    #[tokio::test]
    async fn marks_away_once_threshold_elapses() {
        let state = test_state();
        let conn = test_conn(1);
        state.clients.insert(conn.clone()).await;

        for _ in 0..(IDLE_THRESHOLD_SECS / SCAN_INTERVAL.as_secs()) {
            sweep(&state).await;
        }

        assert!(conn.has_flag(UserFlags::AWAY).await);
    }

    #[tokio::test]
    async fn resets_when_idle_time_is_zeroed_externally() {
        let state = test_state();
        let conn = test_conn(2);
        state.clients.insert(conn.clone()).await;

        sweep(&state).await;
        *conn.idle_time.lock().await = 0;
        sweep(&state).await;

        assert!(!conn.has_flag(UserFlags::AWAY).await);
    }
}
