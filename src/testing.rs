//! Fixtures shared by the unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::models::{
    Comment, Community, Item, NewComment, NewItem, PersonalActivity, ReadReceipt, Viewer,
};
use crate::service::DataService;
use crate::storage::{MemoryStorage, StoragePort};

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

pub fn item(id: &str, community_id: &str, author_id: &str, created_at: DateTime<Utc>) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Post {id}"),
        body: String::new(),
        image_url: None,
        audio_url: None,
        author_id: author_id.to_string(),
        author_name: author_id.to_uppercase(),
        community_id: community_id.to_string(),
        created_at,
        comment_count: 0,
        is_trending: false,
        latest_other_comment_at: None,
    }
}

pub fn comment(id: &str, item_id: &str, author_id: &str, created_at: DateTime<Utc>) -> Comment {
    Comment {
        id: id.to_string(),
        item_id: item_id.to_string(),
        author_id: author_id.to_string(),
        author_name: author_id.to_uppercase(),
        body: format!("comment {id}"),
        created_at,
    }
}

pub fn community(id: &str) -> Community {
    Community {
        id: id.to_string(),
        name: format!("University {id}"),
        short_name: id.to_uppercase(),
        city: "Springfield".to_string(),
        category: "public".to_string(),
        is_subscribed: false,
        item_count: 0,
    }
}

pub fn viewer(id: &str) -> Viewer {
    Viewer {
        id: id.to_string(),
        display_name: id.to_uppercase(),
    }
}

/// Lets a test keep a handle on storage it hands to the controller.
impl StoragePort for Arc<MemoryStorage> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        (**self).remove_prefix(prefix)
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Scripted in-memory board service.
///
/// Every call is logged as `<operation>:<argument>` (or just `<operation>`). The same key can be
/// made to fail with [`FakeService::fail`] or to wait for [`FakeService::release`] with
/// [`FakeService::hold`].
pub struct FakeService {
    now: Mutex<DateTime<Utc>>,
    viewer: Mutex<Option<Viewer>>,
    feed: Mutex<Vec<Item>>,
    boards: Mutex<HashMap<String, Vec<Item>>>,
    comments: Mutex<HashMap<String, Vec<Comment>>>,
    communities: Mutex<Vec<Community>>,
    receipts: Mutex<Vec<ReadReceipt>>,
    activity: Mutex<PersonalActivity>,
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(at(2024, 5, 10, 12)),
            viewer: Mutex::new(None),
            feed: Mutex::new(Vec::new()),
            boards: Mutex::new(HashMap::new()),
            comments: Mutex::new(HashMap::new()),
            communities: Mutex::new(Vec::new()),
            receipts: Mutex::new(Vec::new()),
            activity: Mutex::new(PersonalActivity::default()),
            failing: Mutex::new(HashSet::new()),
            held: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn sign_in(&self, id: &str) {
        *self.viewer.lock().unwrap() = Some(viewer(id));
    }

    pub fn set_feed(&self, items: Vec<Item>) {
        *self.feed.lock().unwrap() = items;
    }

    pub fn set_board(&self, community_id: &str, items: Vec<Item>) {
        self.boards
            .lock()
            .unwrap()
            .insert(community_id.to_string(), items);
    }

    pub fn set_comments(&self, item_id: &str, comments: Vec<Comment>) {
        self.comments
            .lock()
            .unwrap()
            .insert(item_id.to_string(), comments);
    }

    pub fn set_communities(&self, communities: Vec<Community>) {
        *self.communities.lock().unwrap() = communities;
    }

    pub fn set_remote_receipts(&self, receipts: Vec<ReadReceipt>) {
        *self.receipts.lock().unwrap() = receipts;
    }

    pub fn set_activity(&self, activity: PersonalActivity) {
        *self.activity.lock().unwrap() = activity;
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn recover(&self, key: &str) {
        self.failing.lock().unwrap().remove(key);
    }

    /// Makes the next call under `key` wait until [`FakeService::release`].
    pub fn hold(&self, key: &str) {
        self.held
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.held.lock().unwrap().remove(key) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == key)
            .count()
    }

    async fn enter(&self, key: String) -> Result<()> {
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.held.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(&key) {
            bail!("scripted failure for {key}");
        }
        Ok(())
    }

    fn find_item(&self, item_id: &str) -> Option<Item> {
        let feed = self.feed.lock().unwrap();
        let boards = self.boards.lock().unwrap();
        feed.iter()
            .chain(boards.values().flatten())
            .find(|item| item.id == item_id)
            .cloned()
    }
}

#[async_trait]
impl DataService for FakeService {
    async fn current_viewer(&self) -> Result<Option<Viewer>> {
        self.enter("current_viewer".into()).await?;
        Ok(self.viewer.lock().unwrap().clone())
    }

    async fn list_main_feed_items(&self) -> Result<Vec<Item>> {
        self.enter("list_main_feed_items".into()).await?;
        Ok(self.feed.lock().unwrap().clone())
    }

    async fn list_community_items(&self, community_id: &str) -> Result<Vec<Item>> {
        self.enter(format!("list_community_items:{community_id}")).await?;
        Ok(self
            .boards
            .lock()
            .unwrap()
            .get(community_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_personal_activity(&self, viewer_id: &str) -> Result<PersonalActivity> {
        self.enter(format!("list_personal_activity:{viewer_id}")).await?;
        Ok(self.activity.lock().unwrap().clone())
    }

    async fn get_item(&self, item_id: &str) -> Result<Item> {
        self.enter(format!("get_item:{item_id}")).await?;
        match self.find_item(item_id) {
            Some(item) => Ok(item),
            None => bail!("no item {item_id}"),
        }
    }

    async fn list_comments(&self, item_id: &str) -> Result<Vec<Comment>> {
        self.enter(format!("list_comments:{item_id}")).await?;
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_item(&self, community_id: &str, payload: &NewItem) -> Result<Item> {
        self.enter(format!("create_item:{community_id}")).await?;
        let author = self.viewer.lock().unwrap().clone().unwrap_or_else(|| viewer("nobody"));
        let mut boards = self.boards.lock().unwrap();
        let board = boards.entry(community_id.to_string()).or_default();
        let mut created = item(
            &format!("{community_id}-new-{}", board.len() + 1),
            community_id,
            &author.id,
            *self.now.lock().unwrap(),
        );
        created.title = payload.title.clone();
        created.body = payload.body.clone();
        created.image_url = payload.image_url.clone();
        created.audio_url = payload.audio_url.clone();
        board.insert(0, created.clone());
        Ok(created)
    }

    async fn create_comment(&self, item_id: &str, payload: &NewComment) -> Result<Comment> {
        self.enter(format!("create_comment:{item_id}")).await?;
        let author = self.viewer.lock().unwrap().clone().unwrap_or_else(|| viewer("nobody"));
        let mut comments = self.comments.lock().unwrap();
        let thread = comments.entry(item_id.to_string()).or_default();
        let mut created = comment(
            &format!("{item_id}-c{}", thread.len() + 1),
            item_id,
            &author.id,
            *self.now.lock().unwrap(),
        );
        created.body = payload.body.clone();
        thread.push(created.clone());
        Ok(created)
    }

    async fn mark_item_read(&self, item_id: &str) -> Result<()> {
        self.enter(format!("mark_item_read:{item_id}")).await
    }

    async fn list_read_receipts(&self, viewer_id: &str) -> Result<Vec<ReadReceipt>> {
        self.enter(format!("list_read_receipts:{viewer_id}")).await?;
        Ok(self.receipts.lock().unwrap().clone())
    }

    async fn list_communities(&self) -> Result<Vec<Community>> {
        self.enter("list_communities".into()).await?;
        Ok(self.communities.lock().unwrap().clone())
    }

    async fn subscribe(&self, community_id: &str) -> Result<()> {
        self.enter(format!("subscribe:{community_id}")).await?;
        self.set_subscribed(community_id, true);
        Ok(())
    }

    async fn unsubscribe(&self, community_id: &str) -> Result<()> {
        self.enter(format!("unsubscribe:{community_id}")).await?;
        self.set_subscribed(community_id, false);
        Ok(())
    }
}

impl FakeService {
    fn set_subscribed(&self, community_id: &str, subscribed: bool) {
        for community in self.communities.lock().unwrap().iter_mut() {
            if community.id == community_id {
                community.is_subscribed = subscribed;
            }
        }
    }
}
