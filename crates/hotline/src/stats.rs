//! Monotonic counters and gauges, cheap enough to bump on every hot path.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub logins_failed: AtomicU64,
    pub transactions_handled: AtomicU64,
    pub chat_messages_sent: AtomicU64,
    pub instant_messages_sent: AtomicU64,
    pub news_articles_posted: AtomicU64,
    pub bans_enforced: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub logins_failed: u64,
    pub transactions_handled: u64,
    pub chat_messages_sent: u64,
    pub instant_messages_sent: u64,
    pub news_articles_posted: u64,
    pub bans_enforced: u64,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            logins_failed: self.logins_failed.load(Ordering::Relaxed),
            transactions_handled: self.transactions_handled.load(Ordering::Relaxed),
            chat_messages_sent: self.chat_messages_sent.load(Ordering::Relaxed),
            instant_messages_sent: self.instant_messages_sent.load(Ordering::Relaxed),
            news_articles_posted: self.news_articles_posted.load(Ordering::Relaxed),
            bans_enforced: self.bans_enforced.load(Ordering::Relaxed),
        }
    }

    pub fn inc_connections_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_connections_active(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_logins_failed(&self) {
        self.logins_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transactions_handled(&self) {
        self.transactions_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_chat_messages_sent(&self) {
        self.chat_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_instant_messages_sent(&self) {
        self.instant_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_news_articles_posted(&self) {
        self.news_articles_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bans_enforced(&self) {
        self.bans_enforced.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let s = Stats::new();
        s.inc_connections_accepted();
        s.inc_transactions_handled();
        s.inc_transactions_handled();
        let snap = s.snapshot();
        assert_eq!(snap.connections_accepted, 1);
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.transactions_handled, 2);
    }
}
