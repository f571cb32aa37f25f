//! Threaded-news and flat-news handlers.

use crate::access::AccessBit;
use crate::dispatch::{reply_to, BoxFuture, HandlerResult};
use crate::filewrapper::encode_mac_date;
use crate::models::{ClientConn, NewsArtData, NewsNodeType};
use crate::news::render_flat_post;
use crate::protocol::{field, Field, TranType, Transaction};
use crate::state::AppState;
use std::sync::Arc;
use std::time::SystemTime;

fn news_path(tx: &Transaction) -> Vec<String> {
    tx.field_string(field::NEWS_PATH)
        .map(|s| s.split('\u{0}').filter(|s| !s.is_empty()).map(|s| s.to_owned()).collect())
        .unwrap_or_default()
}

pub fn tran_get_news_cat_name_list<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let path = news_path(tx);
        let cats = state.threaded_news.get_categories(&path).await?;
        let fields = cats
            .into_iter()
            .map(|c| {
                let mut data = Vec::new();
                data.extend_from_slice(&(c.kind as u16).to_be_bytes());
                data.extend_from_slice(&(c.name.len() as u16).to_be_bytes());
                data.extend_from_slice(c.name.as_bytes());
                Field::new(field::NEWS_CAT_LIST_DATA_15, data)
            })
            .collect();
        reply_to(cc, tx, fields)
    })
}

pub fn tran_new_news_cat<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let path = news_path(tx);
        let name = tx.field_string(field::NEWS_CAT_NAME).unwrap_or_default();
        state.threaded_news.create_grouping(&path, &name, NewsNodeType::Category).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_new_news_fldr<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let path = news_path(tx);
        let name = tx.field_string(field::NEWS_CAT_NAME).unwrap_or_default();
        state.threaded_news.create_grouping(&path, &name, NewsNodeType::Bundle).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_del_news_item<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::NewsDeleteCat) {
            return Err(crate::Error::Denied("You are not allowed to delete news categories.".into()));
        }
        let path = news_path(tx);
        state.threaded_news.delete_news_item(&path).await?;
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_get_news_art_name_list<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let path = news_path(tx);
        let articles = state.threaded_news.list_articles(&path).await?;
        let fields = articles
            .into_iter()
            .map(|(id, a)| {
                let mut data = Vec::new();
                data.extend_from_slice(&id.to_be_bytes());
                data.extend_from_slice(&a.parent_art.to_be_bytes());
                data.extend_from_slice(&(a.title.len() as u16).to_be_bytes());
                data.extend_from_slice(a.title.as_bytes());
                data.extend_from_slice(&(a.poster.len() as u16).to_be_bytes());
                data.extend_from_slice(a.poster.as_bytes());
                Field::new(field::NEWS_ART_LIST_DATA, data)
            })
            .collect();
        reply_to(cc, tx, fields)
    })
}

pub fn tran_get_news_art_data<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let path = news_path(tx);
        let id = tx.field_bytes(field::NEWS_ART_ID).and_then(|b| b.try_into().ok()).map(u32::from_be_bytes).unwrap_or(0);
        let Some(art) = state.threaded_news.get_article(&path, id).await? else {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        };
        reply_to(
            cc,
            tx,
            vec![
                Field::new(field::NEWS_ART_TITLE, art.title.into_bytes()),
                Field::new(field::NEWS_ART_POSTER, art.poster.into_bytes()),
                Field::new(field::NEWS_ART_DATE, art.date.to_vec()),
                Field::u32(field::NEWS_ART_PREV_ART, art.prev_art),
                Field::u32(field::NEWS_ART_NEXT_ART, art.next_art),
                Field::u32(field::NEWS_ART_PARENT_ART, art.parent_art),
                Field::u32(field::NEWS_ART_1ST_CHILD_ART, art.first_child_art),
                Field::new(field::NEWS_ART_DATA_FLAV, art.data_flavor.into_bytes()),
                Field::new(field::NEWS_ART_DATA, art.data),
            ],
        )
    })
}

pub fn tran_post_news_art<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::NewsPostArt) {
            return Err(crate::Error::Denied("You are not allowed to post news articles.".into()));
        }
        let path = news_path(tx);
        let parent_id = tx.field_bytes(field::NEWS_ART_ID).and_then(|b| b.try_into().ok()).map(u32::from_be_bytes).unwrap_or(0);
        let title = tx.field_string(field::NEWS_ART_TITLE).unwrap_or_default();
        let data = tx.field_bytes(field::NEWS_ART_DATA).map(|b| b.to_vec()).unwrap_or_default();
        let flavor = tx.field_string(field::NEWS_ART_DATA_FLAV).unwrap_or_else(|| "text/plain".to_owned());
        let poster = String::from_utf8_lossy(&cc.name().await).into_owned();

        let art = NewsArtData {
            title,
            poster,
            date: encode_mac_date(SystemTime::now()),
            prev_art: 0,
            next_art: 0,
            parent_art: 0,
            first_child_art: 0,
            data_flavor: flavor,
            data,
        };
        state.threaded_news.post_article(&path, parent_id, art).await?;
        state.stats.inc_news_articles_posted();
        reply_to(cc, tx, Vec::new())
    })
}

pub fn tran_del_news_art<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::NewsDeleteArt) {
            return Err(crate::Error::Denied("You are not allowed to delete news articles.".into()));
        }
        let path = news_path(tx);
        let id = tx.field_bytes(field::NEWS_ART_ID).and_then(|b| b.try_into().ok()).map(u32::from_be_bytes).unwrap_or(0);
        let recursive = tx.field_bytes(field::NEWS_ART_RECURSE_DEL).map(|b| b.first().copied().unwrap_or(0) != 0).unwrap_or(false);
        state.threaded_news.delete_article(&path, id, recursive).await?;
        reply_to(cc, tx, Vec::new())
    })
}

/// `TranGetMsgs`: fetches the whole flat message board.
pub fn tran_get_msgs<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let all = state.flat_news.read_all().await?;
        reply_to(cc, tx, vec![Field::new(field::DATA, all)])
    })
}

/// `TranOldPostNews`: appends a post to the flat board and broadcasts
/// `NewMsg` to every connected client.
pub fn tran_old_post_news<'a>(
    cc: &'a Arc<ClientConn>,
    tx: &'a Transaction,
    state: &'a Arc<AppState>,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if !cc.account.lock().await.access.is_set(AccessBit::NewsPostArt) {
            return Err(crate::Error::Denied("You are not allowed to post to the message board.".into()));
        }
        let body = tx.field_string(field::DATA).unwrap_or_default();
        let poster = String::from_utf8_lossy(&cc.name().await).into_owned();
        let rendered =
            render_flat_post(&state.config.news_delimiter, &state.config.news_date_format, &poster, &body, now());
        state.flat_news.prepend(rendered.as_bytes()).await?;

        state.broadcast(Transaction::request(TranType::NewMsg, 0, vec![Field::new(field::DATA, rendered.into_bytes())])).await;
        Ok(Vec::new())
    })
}

fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}
