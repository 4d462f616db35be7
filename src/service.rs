use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

use crate::activity;
use crate::models::{
    Comment, Community, Item, NewComment, NewItem, PersonalActivity, ReadReceipt, Viewer,
};

/// Read/write contract of the remote board service.
#[async_trait]
pub trait DataService: Send + Sync {
    /// The signed-in viewer, or `None` when the session is anonymous.
    async fn current_viewer(&self) -> Result<Option<Viewer>>;

    async fn list_main_feed_items(&self) -> Result<Vec<Item>>;

    async fn list_community_items(&self, community_id: &str) -> Result<Vec<Item>>;

    async fn list_personal_activity(&self, viewer_id: &str) -> Result<PersonalActivity>;

    async fn get_item(&self, item_id: &str) -> Result<Item>;

    async fn list_comments(&self, item_id: &str) -> Result<Vec<Comment>>;

    async fn create_item(&self, community_id: &str, payload: &NewItem) -> Result<Item>;

    async fn create_comment(&self, item_id: &str, payload: &NewComment) -> Result<Comment>;

    async fn mark_item_read(&self, item_id: &str) -> Result<()>;

    async fn list_read_receipts(&self, viewer_id: &str) -> Result<Vec<ReadReceipt>>;

    async fn list_communities(&self) -> Result<Vec<Community>>;

    async fn subscribe(&self, community_id: &str) -> Result<()>;

    async fn unsubscribe(&self, community_id: &str) -> Result<()>;
}

/// Fetches every item's comments concurrently and annotates the items, keeping their order.
///
/// An item whose comments cannot be fetched is annotated as if it had none.
pub async fn annotate_items(
    service: Arc<dyn DataService>,
    items: Vec<Item>,
    now: DateTime<Utc>,
) -> Vec<Item> {
    let mut fetches = JoinSet::new();
    for item in &items {
        let service = service.clone();
        let item_id = item.id.clone();
        fetches.spawn(async move {
            let comments = service.list_comments(&item_id).await;
            (item_id, comments)
        });
    }

    let mut comments_by_item: HashMap<String, Vec<Comment>> = HashMap::new();
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok((item_id, Ok(comments))) => {
                comments_by_item.insert(item_id, comments);
            }
            Ok((item_id, Err(e))) => {
                warn!(%item_id, "Could not load comments for activity badges: {e:#}");
            }
            Err(e) => warn!("Comment fetch task failed: {e}"),
        }
    }

    items
        .iter()
        .map(|item| {
            let comments = comments_by_item.get(&item.id).map(Vec::as_slice).unwrap_or(&[]);
            activity::annotate(item, comments, now)
        })
        .collect()
}

/// Authored and commented-on items as one list, most recently active first.
pub fn merge_personal_activity(activity: PersonalActivity) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut items: Vec<Item> = activity
        .authored
        .into_iter()
        .chain(activity.commented_on)
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    items.sort_by_key(|item| std::cmp::Reverse(item.last_activity_at()));
    items
}
