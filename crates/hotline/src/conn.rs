//! Per-connection flow: handshake, ban/rate-limit checks, login, and the
//! transaction loop that feeds the dispatcher and drains this client's
//! outbox.

use crate::access::AccessBit;
use crate::dispatch::Dispatcher;
use crate::models::{ClientConn, UserFlags};
use crate::protocol::{
    decode_login, field, Field, TranType, Transaction, HANDSHAKE_LEN, HANDSHAKE_MAGIC, HANDSHAKE_REPLY_LEN,
    HANDSHAKE_SUBPROTO,
};
use crate::ratelimit::ConnRateLimiter;
use crate::serialize::TransactionCodec;
use crate::state::AppState;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

/// Every 300s of silence marks a client idle; the keepalive sweep runs on
/// a 10s cadence and checks against this threshold.
pub const IDLE_THRESHOLD_SECS: u64 = 300;

async fn do_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> crate::Result<()> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut buf).await?;
    if &buf[0..4] != HANDSHAKE_MAGIC || &buf[4..8] != HANDSHAKE_SUBPROTO {
        return Err(crate::Error::Protocol("invalid protocol".into()));
    }
    let mut reply = [0u8; HANDSHAKE_REPLY_LEN];
    reply[0..4].copy_from_slice(HANDSHAKE_MAGIC);
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

struct LoginRequest {
    login: String,
    password: String,
    user_name: Option<Vec<u8>>,
    icon: i16,
    version: Option<u16>,
}

fn parse_login(tx: &Transaction) -> LoginRequest {
    let login = tx.field_bytes(field::USER_LOGIN).map(decode_login).unwrap_or_else(|| "guest".to_owned());
    let password = tx.field_string(field::USER_PASSWORD).unwrap_or_default();
    let user_name = tx.field_bytes(field::USER_NAME).map(|b| b.to_vec());
    let icon = tx.field_bytes(field::USER_ICON_ID).and_then(|b| b.try_into().ok()).map(i16::from_be_bytes).unwrap_or(0);
    let version = tx.field_bytes(field::VERSION).and_then(|b| b.try_into().ok()).map(u16::from_be_bytes);

    LoginRequest { login, password, user_name, icon, version }
}

/// Drives one accepted transaction-port connection end to end. Returns
/// once the client disconnects or a protocol-level error ends the
/// connection; errors are the caller's cue to close the socket.
pub async fn handle_connection<S>(
    mut stream: S,
    peer_addr: IpAddr,
    state: Arc<AppState>,
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<ConnRateLimiter>,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    do_handshake(&mut stream).await?;

    let (banned, _expiry) = state.bans.is_banned(peer_addr).await;
    if banned {
        let mut framed = Framed::new(stream, TransactionCodec::new());
        let _ = framed
            .send(Transaction::request(
                TranType::ServerMsg,
                0,
                vec![Field::new(field::DATA, b"You are banned from this server.".to_vec())],
            ))
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        return Ok(());
    }

    if !rate_limiter.check(peer_addr).await {
        return Ok(());
    }

    let Some(_admission_guard) = state.conn_admission.try_acquire(peer_addr, state.config.max_connections_per_ip) else {
        return Ok(());
    };

    let mut framed = Framed::new(stream, TransactionCodec::new());

    let Some(Ok(login_tx)) = framed.next().await else {
        return Ok(());
    };
    if TranType::try_from(login_tx.ty) != Ok(TranType::Login) {
        return Err(crate::Error::Protocol("expected login transaction".into()));
    }

    let login = parse_login(&login_tx);
    let account = state.accounts.get(&login.login).await;
    let authenticated = account.as_ref().map(|a| a.verify_password(&login.password)).unwrap_or(false);

    if !authenticated {
        state.stats.inc_logins_failed();
        let _ = framed.send(Transaction::error_reply(&login_tx, "Incorrect login.")).await;
        return Ok(());
    }
    let account = Arc::new(account.expect("authenticated implies Some"));

    let id = state.clients.next_id();
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::unbounded_channel();
    let user_name = login.user_name.clone().unwrap_or_else(|| login.login.clone().into_bytes());

    let cc = Arc::new(ClientConn {
        id,
        icon: login.icon,
        flags: tokio::sync::Mutex::new(UserFlags::empty()),
        user_name: tokio::sync::Mutex::new(user_name),
        version: login.version,
        account: tokio::sync::Mutex::new(account.clone()),
        idle_time: tokio::sync::Mutex::new(0),
        auto_reply: tokio::sync::Mutex::new(Vec::new()),
        remote_addr: peer_addr,
        outbox: outbox_tx,
        transfer_bucket: tokio::sync::Mutex::new(Vec::new()),
    });
    state.clients.insert(cc.clone()).await;
    state.stats.inc_connections_accepted();
    info!("client {} logged in as {}", id, login.login);

    let login_reply = Transaction::reply_to(
        &login_tx,
        vec![
            Field::u16(field::VERSION, crate::protocol::SERVER_VERSION),
            Field::new(field::SERVER_NAME, state.config.name.clone().into_bytes()),
        ],
    );
    cc.send(login_reply);
    cc.send(Transaction::request(
        TranType::UserAccess,
        0,
        vec![Field::new(field::USER_ACCESS, account.access.to_bytes().to_vec())],
    ));

    let is_1_2_3 = login.version.is_none();
    if account.access.is_set(AccessBit::NoAgreement) && !is_1_2_3 {
        cc.send(Transaction::request(TranType::ShowAgreement, 0, vec![Field::u16(field::NO_SERVER_AGREEMENT, 1)]));
    } else {
        cc.send(Transaction::request(
            TranType::ShowAgreement,
            0,
            vec![Field::new(field::DATA, state.config.agreement_text.clone().into_bytes())],
        ));
    }

    if is_1_2_3 && login.user_name.is_some() {
        let name = cc.name().await;
        let flags = *cc.flags.lock().await;
        state
            .broadcast(Transaction::request(
                TranType::NotifyChangeUser,
                0,
                vec![
                    Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec()),
                    Field::new(field::USER_ICON_ID, cc.icon.to_be_bytes().to_vec()),
                    Field::new(field::USER_FLAGS, flags.bits().to_be_bytes().to_vec()),
                    Field::new(field::USER_NAME, name),
                ],
            ))
            .await;
    }

    let result = transaction_loop(&mut framed, &cc, &state, &dispatcher, &mut outbox_rx).await;

    state.clients.remove(cc.id).await;
    state.transfers.clear_client(cc.id).await;
    state.stats.dec_connections_active();
    state
        .broadcast(Transaction::request(
            TranType::NotifyDeleteUser,
            0,
            vec![Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec())],
        ))
        .await;
    info!("client {} disconnected", cc.id);

    result
}

async fn transaction_loop<S>(
    framed: &mut Framed<S, TransactionCodec>,
    cc: &Arc<ClientConn>,
    state: &Arc<AppState>,
    dispatcher: &Arc<Dispatcher>,
    outbox_rx: &mut tokio::sync::mpsc::UnboundedReceiver<Transaction>,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(tx)) => {
                        state.stats.inc_transactions_handled();
                        let ty = TranType::try_from(tx.ty);
                        if ty != Ok(TranType::KeepAlive) {
                            *cc.idle_time.lock().await = 0;
                            if cc.has_flag(UserFlags::AWAY).await {
                                cc.set_flag(UserFlags::AWAY, false).await;
                                let name = cc.name().await;
                                let flags = *cc.flags.lock().await;
                                state.broadcast(Transaction::request(
                                    TranType::NotifyChangeUser,
                                    0,
                                    vec![
                                        Field::new(field::USER_ID, cc.id.to_be_bytes().to_vec()),
                                        Field::new(field::USER_ICON_ID, cc.icon.to_be_bytes().to_vec()),
                                        Field::new(field::USER_FLAGS, flags.bits().to_be_bytes().to_vec()),
                                        Field::new(field::USER_NAME, name),
                                    ],
                                )).await;
                            }
                        }
                        let replies = dispatcher.dispatch(cc, &tx, state).await;
                        for (target_id, reply) in replies {
                            if target_id == cc.id {
                                framed.send(reply).await?;
                            } else if let Some(target) = state.clients.get(target_id).await {
                                target.send(reply);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("frame error from client {}: {}", cc.id, e);
                        return Err(e.into());
                    }
                    None => return Ok(()),
                }
            }
            Some(outgoing) = outbox_rx.recv() => {
                framed.send(outgoing).await?;
            }
        }
    }
}
