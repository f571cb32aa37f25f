//! In-memory IP ban list, process lifetime only: good enough to back
//! `TranDisconnectUser`'s temporary-ban option and a manually maintained
//! permanent list. A durable ban list is an external concern this binary
//! doesn't need to solve.

use async_trait::async_trait;
use hotline::store::BanList;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::SystemTime;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryBanList {
    bans: RwLock<HashMap<IpAddr, Option<SystemTime>>>,
}

impl InMemoryBanList {
    pub fn new() -> InMemoryBanList {
        InMemoryBanList::default()
    }
}

#[async_trait]
impl BanList for InMemoryBanList {
    async fn is_banned(&self, ip: IpAddr) -> (bool, Option<SystemTime>) {
        match self.bans.read().await.get(&ip) {
            Some(Some(expiry)) if *expiry <= SystemTime::now() => (false, None),
            Some(entry) => (true, *entry),
            None => (false, None),
        }
    }

    async fn add(&self, ip: IpAddr, expiry: Option<SystemTime>) {
        self.bans.write().await.insert(ip, expiry);
    }

    async fn remove(&self, ip: IpAddr) {
        self.bans.write().await.remove(&ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn permanent_ban_has_no_expiry() {
        let bans = InMemoryBanList::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        bans.add(ip, None).await;
        assert_eq!(bans.is_banned(ip).await, (true, None));
    }

    #[tokio::test]
    async fn lapsed_temporary_ban_no_longer_reports_banned() {
        let bans = InMemoryBanList::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        bans.add(ip, Some(SystemTime::now() - Duration::from_secs(1))).await;
        assert_eq!(bans.is_banned(ip).await, (false, None));
    }

    #[tokio::test]
    async fn removed_ban_is_gone() {
        let bans = InMemoryBanList::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));
        bans.add(ip, None).await;
        bans.remove(ip).await;
        assert_eq!(bans.is_banned(ip).await, (false, None));
    }
}
