use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::models::{Item, ItemId, ReadReceipt, UserId};
use crate::storage::{read_json, write_json, StoragePort};

/// One viewer's "last viewed" timestamps plus the items they just commented on.
#[derive(Debug, Clone)]
pub struct ReadReceipts {
    viewer_id: UserId,
    seen: HashMap<ItemId, DateTime<Utc>>,
    just_commented: HashSet<ItemId>,
}

impl ReadReceipts {
    pub fn new(viewer_id: &str) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            seen: HashMap::new(),
            just_commented: HashSet::new(),
        }
    }

    fn receipts_key(viewer_id: &str) -> String {
        format!("receipts:{viewer_id}")
    }

    fn just_commented_key(viewer_id: &str) -> String {
        format!("just_commented:{viewer_id}")
    }

    /// Loads the durable local copy. Unreadable entries are logged and start empty.
    pub fn load(store: &dyn StoragePort, viewer_id: &str) -> Self {
        let mut receipts = Self::new(viewer_id);
        match read_json::<HashMap<ItemId, DateTime<Utc>>>(store, &Self::receipts_key(viewer_id)) {
            Ok(Some(seen)) => receipts.seen = seen,
            Ok(None) => {}
            Err(e) => warn!(%viewer_id, "Discarding unreadable read receipts: {e:#}"),
        }
        match read_json::<HashSet<ItemId>>(store, &Self::just_commented_key(viewer_id)) {
            Ok(Some(ids)) => receipts.just_commented = ids,
            Ok(None) => {}
            Err(e) => warn!(%viewer_id, "Discarding unreadable just-commented set: {e:#}"),
        }
        debug!(%viewer_id, count = receipts.seen.len(), "loaded local read receipts");
        receipts
    }

    pub fn save(&self, store: &dyn StoragePort) -> anyhow::Result<()> {
        write_json(store, &Self::receipts_key(&self.viewer_id), &self.seen)?;
        write_json(store, &Self::just_commented_key(&self.viewer_id), &self.just_commented)?;
        Ok(())
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn last_seen(&self, item_id: &str) -> Option<DateTime<Utc>> {
        self.seen.get(item_id).copied()
    }

    /// Moves the receipt forward to `at`. Receipts never move backwards.
    pub fn record(&mut self, item_id: &str, at: DateTime<Utc>) -> bool {
        match self.seen.get(item_id) {
            Some(existing) if *existing >= at => false,
            _ => {
                self.seen.insert(item_id.to_string(), at);
                true
            }
        }
    }

    /// Folds receipts from another source in, keeping the newer timestamp per item.
    pub fn merge<I>(&mut self, receipts: I) -> usize
    where
        I: IntoIterator<Item = ReadReceipt>,
    {
        receipts
            .into_iter()
            .filter(|receipt| self.record(&receipt.item_id, receipt.read_at))
            .count()
    }

    pub fn is_author(&self, item: &Item) -> bool {
        item.author_id == self.viewer_id
    }

    pub fn is_unread(&self, item: &Item) -> bool {
        if self.just_commented.contains(&item.id) {
            return false;
        }
        match self.seen.get(&item.id) {
            Some(seen_at) => item
                .latest_other_comment_at
                .is_some_and(|latest| latest > *seen_at),
            // The author never wrote the discussion under their own post.
            None if self.is_author(item) => {
                item.comment_count > 0 || item.latest_other_comment_at.is_some()
            }
            None => item.latest_other_comment_at.is_some(),
        }
    }

    /// Whether viewing `item` right now should move its receipt. Authors only need a new receipt
    /// when somebody else's comment is still unseen.
    pub fn should_record(&self, item: &Item) -> bool {
        !self.is_author(item) || self.is_unread(item)
    }

    pub fn mark_just_commented(&mut self, item_id: &str) {
        self.just_commented.insert(item_id.to_string());
    }

    pub fn clear_just_commented(&mut self, item_id: &str) -> bool {
        self.just_commented.remove(item_id)
    }

    pub fn has_just_commented(&self, item_id: &str) -> bool {
        self.just_commented.contains(item_id)
    }
}
