//! Trending and "latest other comment" derivation.
//!
//! Every listing surface (main feed, community board, personal activity, item detail) annotates
//! its items through [`annotate`], so the threshold and the window are defined exactly once.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Comment, Item};

pub const TRENDING_WINDOW_HOURS: i64 = 48;
pub const TRENDING_THRESHOLD: usize = 10;

pub fn trending_window() -> Duration {
    Duration::hours(TRENDING_WINDOW_HOURS)
}

/// Comments not written by `author_id` created inside the trailing window ending at `now`.
pub fn other_comments_in_window(author_id: &str, comments: &[Comment], now: DateTime<Utc>) -> usize {
    let cutoff = now - trending_window();
    comments
        .iter()
        .filter(|c| c.author_id != author_id && c.created_at >= cutoff)
        .count()
}

pub fn is_trending(author_id: &str, comments: &[Comment], now: DateTime<Utc>) -> bool {
    other_comments_in_window(author_id, comments, now) >= TRENDING_THRESHOLD
}

/// Newest comment over the full history whose author differs from `author_id`.
pub fn latest_other_comment_at(author_id: &str, comments: &[Comment]) -> Option<DateTime<Utc>> {
    comments
        .iter()
        .filter(|c| c.author_id != author_id)
        .map(|c| c.created_at)
        .max()
}

/// Returns a copy of `item` with its derived fields computed from `comments`.
pub fn annotate(item: &Item, comments: &[Comment], now: DateTime<Utc>) -> Item {
    let mut annotated = item.clone();
    annotated.is_trending = is_trending(&item.author_id, comments, now);
    annotated.latest_other_comment_at = latest_other_comment_at(&item.author_id, comments);
    annotated
}
