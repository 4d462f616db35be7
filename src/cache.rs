use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Community, Item};
use crate::storage::{read_json, write_json, StoragePort};

pub const DIRECTORY_TTL_SECS: i64 = 300;

const ANONYMOUS_SCOPE: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, cached_at: DateTime<Utc>) -> Self {
        Self { payload, cached_at }
    }

    /// Without a TTL an entry stays usable for as long as its store keeps it.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => now - self.cached_at < ttl,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub community: Option<Community>,
    pub items: Vec<Item>,
}

fn scope_of(viewer_id: Option<&str>) -> String {
    viewer_id.unwrap_or(ANONYMOUS_SCOPE).to_string()
}

/// Per-community snapshots kept in session storage.
#[derive(Debug, Clone)]
pub struct BoardCache {
    scope: String,
    ttl: Option<Duration>,
}

impl BoardCache {
    pub fn new(viewer_id: Option<&str>, ttl: Option<Duration>) -> Self {
        Self {
            scope: scope_of(viewer_id),
            ttl,
        }
    }

    fn prefix(&self) -> String {
        format!("board:{}:", self.scope)
    }

    fn key(&self, community_id: &str) -> String {
        format!("{}{}", self.prefix(), community_id)
    }

    pub fn get(
        &self,
        store: &dyn StoragePort,
        community_id: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<BoardSnapshot>> {
        match read_json::<CacheEntry<BoardSnapshot>>(store, &self.key(community_id)) {
            Ok(Some(entry)) if entry.is_fresh(now, self.ttl) => Some(entry),
            Ok(Some(_)) => {
                debug!(%community_id, "board cache entry expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%community_id, "Ignoring unreadable board cache entry: {e:#}");
                None
            }
        }
    }

    pub fn put(
        &self,
        store: &dyn StoragePort,
        community_id: &str,
        snapshot: BoardSnapshot,
        now: DateTime<Utc>,
    ) {
        let entry = CacheEntry::new(snapshot, now);
        if let Err(e) = write_json(store, &self.key(community_id), &entry) {
            warn!(%community_id, "Failed to cache board: {e:#}");
        }
    }

    pub fn invalidate(&self, store: &dyn StoragePort, community_id: &str) {
        if let Err(e) = store.remove(&self.key(community_id)) {
            warn!(%community_id, "Failed to drop board cache entry: {e:#}");
        }
    }

    /// Puts a freshly created item at the top of a cached board. Returns false when the board was
    /// not cached.
    pub fn prepend_item(&self, store: &dyn StoragePort, item: &Item) -> bool {
        let key = self.key(&item.community_id);
        match read_json::<CacheEntry<BoardSnapshot>>(store, &key) {
            Ok(Some(mut entry)) => {
                entry.payload.items.retain(|existing| existing.id != item.id);
                entry.payload.items.insert(0, item.clone());
                if let Some(community) = entry.payload.community.as_mut() {
                    community.item_count += 1;
                }
                if let Err(e) = write_json(store, &key, &entry) {
                    warn!(community_id = %item.community_id, "Failed to refresh board cache: {e:#}");
                    self.invalidate(store, &item.community_id);
                    return false;
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(community_id = %item.community_id, "Dropping unreadable board cache entry: {e:#}");
                self.invalidate(store, &item.community_id);
                false
            }
        }
    }

    /// Forgets every board cached for this viewer.
    pub fn clear(&self, store: &dyn StoragePort) {
        match store.remove_prefix(&self.prefix()) {
            Ok(removed) => debug!(scope = %self.scope, removed, "cleared board cache"),
            Err(e) => warn!(scope = %self.scope, "Failed to clear board cache: {e:#}"),
        }
    }
}

/// The community list with the viewer's subscription flags, kept in durable storage.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    scope: String,
    ttl: Duration,
}

impl DirectoryCache {
    pub fn new(viewer_id: Option<&str>, ttl: Duration) -> Self {
        Self {
            scope: scope_of(viewer_id),
            ttl,
        }
    }

    fn key(&self) -> String {
        format!("directory:{}", self.scope)
    }

    pub fn get(&self, store: &dyn StoragePort, now: DateTime<Utc>) -> Option<Vec<Community>> {
        match read_json::<CacheEntry<Vec<Community>>>(store, &self.key()) {
            Ok(Some(entry)) if entry.is_fresh(now, Some(self.ttl)) => Some(entry.payload),
            Ok(Some(_)) => {
                debug!(scope = %self.scope, "directory cache expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable directory cache: {e:#}");
                None
            }
        }
    }

    pub fn put(&self, store: &dyn StoragePort, communities: &[Community], now: DateTime<Utc>) {
        let entry = CacheEntry::new(communities.to_vec(), now);
        if let Err(e) = write_json(store, &self.key(), &entry) {
            warn!("Failed to cache community directory: {e:#}");
        }
    }

    pub fn invalidate(&self, store: &dyn StoragePort) {
        if let Err(e) = store.remove(&self.key()) {
            warn!("Failed to drop community directory cache: {e:#}");
        }
    }

    /// Patches one community in place, keeping the entry's age. Returns false when the directory
    /// is not cached or does not list the community.
    pub fn update_community<F>(&self, store: &dyn StoragePort, community_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut Community),
    {
        let key = self.key();
        let mut entry = match read_json::<CacheEntry<Vec<Community>>>(store, &key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                warn!("Dropping unreadable directory cache: {e:#}");
                self.invalidate(store);
                return false;
            }
        };
        let Some(community) = entry.payload.iter_mut().find(|c| c.id == community_id) else {
            return false;
        };
        update(community);
        if let Err(e) = write_json(store, &key, &entry) {
            warn!(%community_id, "Failed to patch community directory, dropping it: {e:#}");
            self.invalidate(store);
            return false;
        }
        true
    }
}
