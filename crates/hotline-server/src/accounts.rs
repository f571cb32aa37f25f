//! Accounts file backing: one line per account, tab-separated
//! `login, name, bcrypt hash, access bitmap as 16 hex chars`. Loaded once at
//! startup into memory and rewritten in full on every mutation — a workable
//! persistence format for a standalone binary to be runnable, not a
//! prescribed format any client or protocol cares about.

use async_trait::async_trait;
use hotline::access::{Access, AccessBit};
use hotline::models::Account;
use hotline::store::AccountStore;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

fn encode_access(access: Access) -> String {
    access.to_bytes().iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_access(hex: &str) -> Access {
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        if let Some(chunk) = hex.get(i * 2..i * 2 + 2) {
            *byte = u8::from_str_radix(chunk, 16).unwrap_or(0);
        }
    }
    Access::from_bytes(bytes)
}

fn encode_line(account: &Account) -> String {
    format!("{}\t{}\t{}\t{}", account.login, account.name, account.password_hash, encode_access(account.access))
}

fn decode_line(line: &str) -> Option<Account> {
    let mut parts = line.splitn(4, '\t');
    let login = parts.next()?.to_owned();
    let name = parts.next()?.to_owned();
    let password_hash = parts.next()?.to_owned();
    let access = decode_access(parts.next()?);
    Some(Account { login, name, password_hash, access })
}

/// A freshly created server's starting accounts: an admin with every bit
/// set and a guest with enough access to read chat, browse and download.
fn default_accounts() -> Vec<Account> {
    let mut guest_access = Access::EMPTY;
    for bit in [
        AccessBit::ReadChat,
        AccessBit::SendChat,
        AccessBit::DownloadFile,
        AccessBit::DownloadFolder,
        AccessBit::NewsReadArt,
        AccessBit::GetClientInfo,
    ] {
        guest_access.set(bit);
    }
    vec![Account::new("admin", "Admin", "admin", Access::all()), Account::new("guest", "Guest", "", guest_access)]
}

pub struct FileAccountStore {
    path: PathBuf,
    accounts: RwLock<HashMap<String, Account>>,
}

impl FileAccountStore {
    /// Loads accounts from `path`; if it doesn't exist yet, seeds the
    /// default admin/guest pair and writes them out so the server is
    /// runnable on a bare checkout.
    pub async fn load(path: PathBuf) -> std::io::Result<FileAccountStore> {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let accounts: HashMap<String, Account> = default_accounts().into_iter().map(|a| (a.login.clone(), a)).collect();
            let store = FileAccountStore { path, accounts: RwLock::new(accounts) };
            store.persist().await?;
            return Ok(store);
        }
        let text = tokio::fs::read_to_string(&path).await?;
        let accounts = text.lines().filter(|l| !l.trim().is_empty()).filter_map(decode_line).map(|a| (a.login.clone(), a)).collect();
        Ok(FileAccountStore { path, accounts: RwLock::new(accounts) })
    }

    async fn persist(&self) -> std::io::Result<()> {
        let accounts = self.accounts.read().await;
        let mut sorted: Vec<&Account> = accounts.values().collect();
        sorted.sort_by(|a, b| a.login.cmp(&b.login));
        let text = sorted.iter().map(|a| encode_line(a)).collect::<Vec<_>>().join("\n");
        tokio::fs::write(&self.path, text).await
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn get(&self, login: &str) -> Option<Account> {
        self.accounts.read().await.get(login).cloned()
    }

    async fn create(&self, account: Account) -> hotline::Result<()> {
        self.accounts.write().await.insert(account.login.clone(), account);
        self.persist().await?;
        Ok(())
    }

    async fn update(&self, login: &str, account: Account) -> hotline::Result<()> {
        self.accounts.write().await.insert(login.to_owned(), account);
        self.persist().await?;
        Ok(())
    }

    async fn rename(&self, old_login: &str, new_login: &str) -> hotline::Result<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(mut account) = accounts.remove(old_login) {
            account.login = new_login.to_owned();
            accounts.insert(new_login.to_owned(), account);
        }
        drop(accounts);
        self.persist().await?;
        Ok(())
    }

    async fn delete(&self, login: &str) -> hotline::Result<()> {
        self.accounts.write().await.remove(login);
        self.persist().await?;
        Ok(())
    }

    async fn list(&self) -> Vec<Account> {
        self.accounts.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(label: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("hotline-accounts-{}-{}.txt", label, nanos))
    }

    #[tokio::test]
    async fn missing_file_seeds_admin_and_guest() {
        let path = scratch_path("seed");
        let store = FileAccountStore::load(path.clone()).await.unwrap();
        assert!(store.get("admin").await.unwrap().access.is_set(AccessBit::DeleteFile));
        assert!(store.get("guest").await.unwrap().access.is_set(AccessBit::ReadChat));
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn created_accounts_survive_a_reload() {
        let path = scratch_path("reload");
        {
            let store = FileAccountStore::load(path.clone()).await.unwrap();
            store.create(Account::new("alice", "Alice", "hunter2", Access::EMPTY)).await.unwrap();
        }
        let reloaded = FileAccountStore::load(path.clone()).await.unwrap();
        let alice = reloaded.get("alice").await.unwrap();
        assert!(alice.verify_password("hunter2"));
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn rename_moves_the_account_under_its_new_login() {
        let path = scratch_path("rename");
        let store = FileAccountStore::load(path.clone()).await.unwrap();
        store.rename("guest", "visitor").await.unwrap();
        assert!(store.get("guest").await.is_none());
        assert_eq!(store.get("visitor").await.unwrap().login, "visitor");
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
