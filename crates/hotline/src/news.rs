//! Threaded-news tree walking and post/delete semantics, plus the flat
//! message board's prepend-formatting.
//!
//! `store::ThreadedNewsStore`/`store::FlatNewsStore` are the seam an
//! external durable backing fills in; this module holds the tree-shaped
//! algorithm and a default in-memory implementation of both traits
//! sufficient to run a standalone server; the on-disk persistence format
//! itself is a concern for whatever wraps this.

use crate::models::{NewsArtData, NewsNode, NewsNodeType};
use crate::store::{FlatNewsStore, NewsPath, ThreadedNewsStore};
use async_trait::async_trait;
use time::format_description;
use tokio::sync::RwLock as TokioRwLock;

/// Default `NewsDateFormat`.
pub const DEFAULT_DATE_FORMAT: &str = "[month repr:short] [day padding:zero] [hour]:[minute]";

/// Walks `path` from `root`, returning the addressed node.
pub fn find_node<'a>(root: &'a NewsNode, path: &[String]) -> Option<&'a NewsNode> {
    let mut node = root;
    for seg in path {
        node = node.sub_cats.iter().find(|n| &n.name == seg)?;
    }
    Some(node)
}

pub fn find_node_mut<'a>(root: &'a mut NewsNode, path: &[String]) -> Option<&'a mut NewsNode> {
    let mut node = root;
    for seg in path {
        node = node.sub_cats.iter_mut().find(|n| &n.name == seg)?;
    }
    Some(node)
}

/// Posts `art` into the category at `parent`:
/// - `next_id = max(existing) + 1`, or `1` if the category is empty;
/// - the new article's `prev_art` is the previous max id;
/// - that previous article's `next_art` is updated to `next_id`;
/// - if `parent_id != 0` and the parent article's `first_child_art` is
///   still zero, it is set to `next_id`.
pub fn post_article(cat: &mut NewsNode, parent_id: u32, mut art: NewsArtData) -> u32 {
    let prev_max = cat.articles.keys().copied().max().unwrap_or(0);
    let next_id = prev_max + 1;

    art.prev_art = prev_max;
    art.next_art = 0;
    art.parent_art = parent_id;

    if prev_max != 0 {
        if let Some(prev) = cat.articles.get_mut(&prev_max) {
            prev.next_art = next_id;
        }
    }
    if parent_id != 0 {
        if let Some(parent) = cat.articles.get_mut(&parent_id) {
            if parent.first_child_art == 0 {
                parent.first_child_art = next_id;
            }
        }
    }

    cat.articles.insert(next_id, art);
    next_id
}

/// Deletes article `id`. When `recursive` is set, also deletes every
/// article reachable by following `first_child_art`/`next_art` from it;
/// otherwise only the article itself is removed and its neighbors'
/// `prev_art`/`next_art` are relinked around the gap.
pub fn delete_article(cat: &mut NewsNode, id: u32, recursive: bool) {
    let Some(removed) = cat.articles.remove(&id) else { return };

    if let Some(prev) = cat.articles.get_mut(&removed.prev_art) {
        prev.next_art = removed.next_art;
    }
    if removed.next_art != 0 {
        if let Some(next) = cat.articles.get_mut(&removed.next_art) {
            next.prev_art = removed.prev_art;
        }
    }

    if recursive {
        let mut stack = vec![removed.first_child_art];
        while let Some(child_id) = stack.pop() {
            if child_id == 0 {
                continue;
            }
            if let Some(child) = cat.articles.remove(&child_id) {
                stack.push(child.next_art);
                stack.push(child.first_child_art);
            }
        }
    }
}

/// Renders one flat-news post from `NewsDelimiter`/`NewsDateFormat`.
/// `delimiter` takes `{poster}`, `{date}`, `{body}` placeholders, matching
/// the template-driven format the config option names imply.
pub fn render_flat_post(delimiter: &str, date_format: &str, poster: &str, body: &str, now: time::OffsetDateTime) -> String {
    let fmt = format_description::parse(date_format).unwrap_or_else(|_| {
        format_description::parse(DEFAULT_DATE_FORMAT).expect("default format is valid")
    });
    let date = now.format(&fmt).unwrap_or_default();
    delimiter.replace("{poster}", poster).replace("{date}", &date).replace("{body}", body)
}

/// Default in-memory `ThreadedNewsStore`: a single root bundle behind a
/// lock, durability left to whatever wraps this.
pub struct InMemoryThreadedNewsStore {
    root: TokioRwLock<NewsNode>,
}

impl InMemoryThreadedNewsStore {
    pub fn new() -> InMemoryThreadedNewsStore {
        InMemoryThreadedNewsStore { root: TokioRwLock::new(NewsNode::new_bundle("")) }
    }
}

impl Default for InMemoryThreadedNewsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreadedNewsStore for InMemoryThreadedNewsStore {
    async fn get_categories(&self, path: &NewsPath) -> crate::Result<Vec<NewsNode>> {
        let root = self.root.read().await;
        let node = find_node(&root, path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        Ok(node.sub_cats.clone())
    }

    async fn create_grouping(&self, path: &NewsPath, name: &str, kind: NewsNodeType) -> crate::Result<()> {
        let mut root = self.root.write().await;
        let node = find_node_mut(&mut root, path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        if node.sub_cats.iter().any(|n| n.name == name) {
            return Err(crate::Error::No(crate::error::errno::EEXIST));
        }
        node.sub_cats.push(match kind {
            NewsNodeType::Category => NewsNode::new_category(name),
            NewsNodeType::Bundle => NewsNode::new_bundle(name),
        });
        Ok(())
    }

    async fn delete_news_item(&self, path: &NewsPath) -> crate::Result<()> {
        let Some((parent_path, name)) = path.split_last().map(|(l, rest)| (rest.to_vec(), l.clone())) else {
            return Err(crate::Error::No(crate::error::errno::EINVAL));
        };
        let mut root = self.root.write().await;
        let parent = find_node_mut(&mut root, &parent_path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        let before = parent.sub_cats.len();
        parent.sub_cats.retain(|n| n.name != name);
        if parent.sub_cats.len() == before {
            return Err(crate::Error::No(crate::error::errno::ENOENT));
        }
        Ok(())
    }

    async fn news_item(&self, path: &NewsPath) -> crate::Result<Option<NewsNode>> {
        let root = self.root.read().await;
        Ok(find_node(&root, path).cloned())
    }

    async fn list_articles(&self, path: &NewsPath) -> crate::Result<Vec<(u32, NewsArtData)>> {
        let root = self.root.read().await;
        let node = find_node(&root, path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        let mut v: Vec<(u32, NewsArtData)> = node.articles.iter().map(|(id, a)| (*id, a.clone())).collect();
        v.sort_by_key(|(id, _)| *id);
        Ok(v)
    }

    async fn get_article(&self, path: &NewsPath, id: u32) -> crate::Result<Option<NewsArtData>> {
        let root = self.root.read().await;
        let node = find_node(&root, path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        Ok(node.articles.get(&id).cloned())
    }

    async fn post_article(&self, path: &NewsPath, parent_id: u32, art: NewsArtData) -> crate::Result<u32> {
        let mut root = self.root.write().await;
        let node = find_node_mut(&mut root, path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        Ok(post_article(node, parent_id, art))
    }

    async fn delete_article(&self, path: &NewsPath, id: u32, recursive: bool) -> crate::Result<()> {
        let mut root = self.root.write().await;
        let node = find_node_mut(&mut root, path).ok_or_else(|| crate::Error::No(crate::error::errno::ENOENT))?;
        delete_article(node, id, recursive);
        Ok(())
    }
}

/// Default in-memory `FlatNewsStore`: a byte buffer behind a lock, newest
/// posts first.
pub struct InMemoryFlatNewsStore {
    buf: TokioRwLock<Vec<u8>>,
}

impl InMemoryFlatNewsStore {
    pub fn new() -> InMemoryFlatNewsStore {
        InMemoryFlatNewsStore { buf: TokioRwLock::new(Vec::new()) }
    }
}

impl Default for InMemoryFlatNewsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlatNewsStore for InMemoryFlatNewsStore {
    async fn read_all(&self) -> crate::Result<Vec<u8>> {
        Ok(self.buf.read().await.clone())
    }

    async fn prepend(&self, post: &[u8]) -> crate::Result<()> {
        let mut buf = self.buf.write().await;
        let mut next = post.to_vec();
        next.extend_from_slice(&buf);
        *buf = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(title: &str) -> NewsArtData {
        NewsArtData {
            title: title.into(),
            poster: "Al".into(),
            date: [0; 8],
            prev_art: 0,
            next_art: 0,
            parent_art: 0,
            first_child_art: 0,
            data_flavor: "text/plain".into(),
            data: b"hello".to_vec(),
        }
    }

    #[test]
    fn post_semantics_link_and_assign_first_child() {
        let mut cat = NewsNode::new_category("General");
        let id1 = post_article(&mut cat, 0, art("first"));
        assert_eq!(id1, 1);
        assert_eq!(cat.articles[&1].prev_art, 0);
        assert_eq!(cat.articles[&1].next_art, 0);

        let id2 = post_article(&mut cat, 0, art("second"));
        assert_eq!(id2, 2);
        assert_eq!(cat.articles[&1].next_art, 2);
        assert_eq!(cat.articles[&2].prev_art, 1);

        let id3 = post_article(&mut cat, 1, art("reply"));
        assert_eq!(cat.articles[&1].first_child_art, id3);
    }

    #[test]
    fn first_child_is_only_set_once() {
        let mut cat = NewsNode::new_category("General");
        post_article(&mut cat, 0, art("root"));
        let first_reply = post_article(&mut cat, 1, art("reply1"));
        post_article(&mut cat, 1, art("reply2"));
        assert_eq!(cat.articles[&1].first_child_art, first_reply);
    }

    #[test]
    fn delete_relinks_neighbors() {
        let mut cat = NewsNode::new_category("General");
        post_article(&mut cat, 0, art("a"));
        post_article(&mut cat, 0, art("b"));
        post_article(&mut cat, 0, art("c"));
        delete_article(&mut cat, 2, false);
        assert!(!cat.articles.contains_key(&2));
        assert_eq!(cat.articles[&1].next_art, 3);
        assert_eq!(cat.articles[&3].prev_art, 1);
    }

    #[test]
    fn recursive_delete_removes_descendants() {
        let mut cat = NewsNode::new_category("General");
        post_article(&mut cat, 0, art("root"));
        post_article(&mut cat, 1, art("child"));
        post_article(&mut cat, 2, art("grandchild"));
        delete_article(&mut cat, 1, true);
        assert!(cat.articles.is_empty());
    }

    #[tokio::test]
    async fn flat_news_prepends() {
        let store = InMemoryFlatNewsStore::new();
        store.prepend(b"first").await.unwrap();
        store.prepend(b"second").await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), b"secondfirst".to_vec());
    }
}
