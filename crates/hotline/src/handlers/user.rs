//! User-account administration handlers: CRUD plus the bulk `UpdateUser`.

use crate::access::{Access, AccessBit};
use crate::dispatch::{reply_to, server_msg_to, BoxFuture, HandlerResult};
use crate::models::{Account, ClientConn};
use crate::protocol::{field, obfuscate, Field, Transaction};
use crate::serialize::Decodable;
use crate::state::AppState;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn decode_login(tx: &Transaction, id: u16) -> Option<String> {
    tx.field_bytes(id).map(|b| {
        let plain = obfuscate(b);
        String::from_utf8_lossy(&plain).into_owned()
    })
}

fn access_from_field(tx: &Transaction) -> Access {
    tx.field_bytes(field::USER_ACCESS)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(Access::from_bytes)
        .unwrap_or(Access::EMPTY)
}

/// A caller may never grant/keep a bit on the target account that they
/// don't hold themselves: no account can be created or modified to carry
/// an access bit its editor lacks.
fn requested_access_within_caller(requested: &Access, caller: &Access) -> bool {
    requested.is_subset_of(caller)
}

pub fn tran_new_user<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::CreateUser) {
            return Err(crate::Error::Denied("You are not allowed to create new accounts.".into()));
        }
        let login = decode_login(tx, field::USER_LOGIN).ok_or_else(|| crate::Error::Protocol("missing login".into()))?;
        let name = tx.field_string(field::USER_NAME).unwrap_or_default();
        let password = decode_login(tx, field::USER_PASSWORD).unwrap_or_default();
        let requested_access = access_from_field(tx);

        let caller_access = cc.account.lock().await.access;
        if !requested_access_within_caller(&requested_access, &caller_access) {
            return Err(crate::Error::Denied("You cannot grant access you do not have.".into()));
        }
        if state.accounts.get(&login).await.is_some() {
            return Err(crate::Error::No(crate::error::errno::EEXIST));
        }
        state.accounts.create(Account::new(login, name, &password, requested_access)).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_delete_user<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::DeleteUser) {
            return Err(crate::Error::Denied("You are not allowed to delete accounts.".into()));
        }
        let login = decode_login(tx, field::USER_LOGIN).ok_or_else(|| crate::Error::Protocol("missing login".into()))?;
        state.accounts.delete(&login).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_get_user<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::OpenUser) {
            return Err(crate::Error::Denied("You are not allowed to view accounts.".into()));
        }
        let login = decode_login(tx, field::USER_LOGIN).ok_or_else(|| crate::Error::Protocol("missing login".into()))?;
        let Some(account) = state.accounts.get(&login).await else {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        };
        reply_to(
            cc,
            tx,
            vec![
                Field::new(field::USER_LOGIN, obfuscate(account.login.as_bytes())),
                Field::new(field::USER_NAME, account.name.into_bytes()),
                Field::new(field::USER_PASSWORD, Vec::new()),
                Field::new(field::USER_ACCESS, account.access.to_bytes().to_vec()),
            ],
        )
    })
}

pub fn tran_set_user<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::ModifyUser) {
            return Err(crate::Error::Denied("You are not allowed to modify accounts.".into()));
        }
        let login = decode_login(tx, field::USER_LOGIN).ok_or_else(|| crate::Error::Protocol("missing login".into()))?;
        let Some(mut account) = state.accounts.get(&login).await else {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        };
        let requested_access = access_from_field(tx);
        let caller_access = cc.account.lock().await.access;
        if !requested_access_within_caller(&requested_access, &caller_access) {
            return Err(crate::Error::Denied("You cannot grant access you do not have.".into()));
        }
        if let Some(name) = tx.field_string(field::USER_NAME) {
            account.name = name;
        }
        if let Some(password) = decode_login(tx, field::USER_PASSWORD) {
            if !password.is_empty() {
                account = Account::new(account.login.clone(), account.name.clone(), &password, requested_access);
            }
        }
        account.access = requested_access;
        state.accounts.update(&login, account).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_list_users<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::OpenUser) {
            return Err(crate::Error::Denied("You are not allowed to view accounts.".into()));
        }
        let accounts = state.accounts.list().await;
        let fields = accounts
            .into_iter()
            .map(|a| {
                let mut data = Vec::new();
                data.extend_from_slice(&obfuscate(a.login.as_bytes()));
                data.extend_from_slice(&(a.name.len() as u16).to_be_bytes());
                data.extend_from_slice(a.name.as_bytes());
                Field::new(field::USERNAME_WITH_INFO, data)
            })
            .collect();
        reply_to(cc, tx, fields)
    })
}

/// Parses a nested block of `Field`s the same way the outer transaction's
/// field list is encoded: each `UpdateUser` data field carries one of
/// these per account being touched.
fn decode_sub_fields(bytes: &[u8]) -> crate::Result<Vec<Field>> {
    let mut cur = Cursor::new(bytes);
    let count: u16 = Decodable::decode(&mut cur).map_err(|_| crate::Error::Protocol("bad UpdateUser block".into()))?;
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        fields.push(Decodable::decode(&mut cur).map_err(|_| crate::Error::Protocol("bad UpdateUser field".into()))?);
    }
    Ok(fields)
}

/// `TranUpdateUser`: a bulk request. Each `FieldData` occurrence is one
/// nested field block for a single account:
/// - one sub-field -> delete that account;
/// - `FieldData`(old login) + `FieldUserLogin`(new login) both present ->
///   rename;
/// - otherwise -> create/update using whichever fields are present.
pub fn tran_update_user<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let caller_access = cc.account.lock().await.access;

        for block_field in tx.fields.iter().filter(|f| f.id == field::DATA) {
            let sub = decode_sub_fields(&block_field.data)?;

            if sub.len() == 1 {
                if !caller_access.is_set(AccessBit::DeleteUser) {
                    return Err(crate::Error::Denied("You are not allowed to delete accounts.".into()));
                }
                let login_bytes = obfuscate(&sub[0].data);
                let login = String::from_utf8_lossy(&login_bytes).into_owned();
                state.accounts.delete(&login).await?;
                continue;
            }

            let old_login = sub.iter().find(|f| f.id == field::DATA).map(|f| String::from_utf8_lossy(&obfuscate(&f.data)).into_owned());
            let new_login =
                sub.iter().find(|f| f.id == field::USER_LOGIN).map(|f| String::from_utf8_lossy(&obfuscate(&f.data)).into_owned());
            let name = sub.iter().find(|f| f.id == field::USER_NAME).map(|f| String::from_utf8_lossy(&f.data).into_owned());
            let password = sub.iter().find(|f| f.id == field::USER_PASSWORD).map(|f| String::from_utf8_lossy(&obfuscate(&f.data)).into_owned());
            let access = sub
                .iter()
                .find(|f| f.id == field::USER_ACCESS)
                .and_then(|f| <[u8; 8]>::try_from(f.data.as_slice()).ok())
                .map(Access::from_bytes)
                .unwrap_or(Access::EMPTY);

            if !requested_access_within_caller(&access, &caller_access) {
                return Err(crate::Error::Denied("You cannot grant access you do not have.".into()));
            }

            match (old_login, new_login) {
                (Some(old), Some(new)) if old != new => {
                    if !caller_access.is_set(AccessBit::ModifyUser) {
                        return Err(crate::Error::Denied("You are not allowed to modify accounts.".into()));
                    }
                    state.accounts.rename(&old, &new).await?;
                    if let Some(mut account) = state.accounts.get(&new).await {
                        account.name = name.unwrap_or(account.name);
                        account.access = access;
                        state.accounts.update(&new, account).await?;
                    }
                }
                (Some(login), _) => {
                    if state.accounts.get(&login).await.is_some() {
                        if !caller_access.is_set(AccessBit::ModifyUser) {
                            return Err(crate::Error::Denied("You are not allowed to modify accounts.".into()));
                        }
                        let mut account = state.accounts.get(&login).await.unwrap();
                        account.name = name.unwrap_or(account.name);
                        account.access = access;
                        state.accounts.update(&login, account).await?;
                    } else {
                        if !caller_access.is_set(AccessBit::CreateUser) {
                            return Err(crate::Error::Denied("You are not allowed to create new accounts.".into()));
                        }
                        state
                            .accounts
                            .create(Account::new(login, name.unwrap_or_default(), &password.unwrap_or_default(), access))
                            .await?;
                    }
                }
                (None, Some(login)) => {
                    if !caller_access.is_set(AccessBit::CreateUser) {
                        return Err(crate::Error::Denied("You are not allowed to create new accounts.".into()));
                    }
                    state
                        .accounts
                        .create(Account::new(login, name.unwrap_or_default(), &password.unwrap_or_default(), access))
                        .await?;
                }
                (None, None) => {}
            }
        }
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_get_client_info_text<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::GetClientInfo) {
            return Err(crate::Error::Denied("You are not allowed to view client information.".into()));
        }
        let target_id = tx
            .field_bytes(field::USER_ID)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_be_bytes)
            .ok_or_else(|| crate::Error::Protocol("missing user id".into()))?;
        let Some(target) = state.clients.get(target_id).await else {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        };
        let account = target.account.lock().await;
        let text = format!(
            "Name: {}\rLogin: {}\rAddress: {}",
            String::from_utf8_lossy(&target.name().await),
            account.login,
            target.remote_addr
        );
        reply_to(cc, tx, vec![Field::new(field::DATA, text.into_bytes())])
    })
}

pub fn tran_disconnect_user<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::DisconUser) {
            return Err(crate::Error::Denied("You are not allowed to disconnect users.".into()));
        }
        let target_id = tx
            .field_bytes(field::USER_ID)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_be_bytes)
            .ok_or_else(|| crate::Error::Protocol("missing user id".into()))?;
        let Some(target) = state.clients.get(target_id).await else {
            return Ok(Vec::new());
        };
        if target.account.lock().await.access.is_set(AccessBit::CannotBeDisconnected) {
            return Err(crate::Error::Denied("That user cannot be disconnected.".into()));
        }

        let ban_option = tx.field_bytes(field::OPTIONS).and_then(|b| b.get(1).copied());
        if let Some(opt @ (1 | 2)) = ban_option {
            let (msg, expiry) = if opt == 1 {
                ("You are temporarily banned on this server.", Some(std::time::SystemTime::now() + Duration::from_secs(30 * 60)))
            } else {
                ("You are permanently banned on this server.", None)
            };
            target.send(server_msg_to(target.id, msg).1);
            state.bans.add(target.remote_addr, expiry).await;
            state.stats.inc_bans_enforced();
        }

        target.send(Transaction::request(crate::protocol::TranType::DisconnectMsg, 0, Vec::new()));
        let state = Arc::clone(state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            state.clients.remove(target_id).await;
        });

        reply_to(cc, tx, Vec::new())
    })
}
