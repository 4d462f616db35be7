//! URL <-> view mapping and the history stack the view controller drives.
//!
//! The only route is `/`. A view is encoded in its query string:
//!
//! - `/` is the main feed (the tab is not part of the URL)
//! - `/?community=<id>` is a community board
//! - `/?item=<id>` is an item opened from the main feed
//! - `/?item=<id>&community=<id>` is an item opened from that community's board
//!
//! `refresh` may accompany any of these as a one-shot request to bypass caches.

use std::collections::VecDeque;
use tracing::debug;

use crate::view::{FeedTab, Origin, ViewState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub view: ViewState,
    pub refresh: bool,
}

pub fn format(view: &ViewState) -> String {
    match view {
        ViewState::MainFeed { .. } => "/".to_string(),
        ViewState::CommunityBoard { community_id } => {
            format!("/?community={}", urlencoding::encode(community_id))
        }
        ViewState::ItemDetail { item_id, origin } => match origin {
            Origin::MainFeed => format!("/?item={}", urlencoding::encode(item_id)),
            Origin::CommunityBoard(community_id) => format!(
                "/?item={}&community={}",
                urlencoding::encode(item_id),
                urlencoding::encode(community_id)
            ),
        },
    }
}

/// Derives the view from a URL alone. `tab` fills in the main-feed tab, which the URL does not
/// carry. Anything unrecognised falls back to the main feed.
pub fn parse(url: &str, tab: FeedTab) -> Location {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let query = without_fragment
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default();

    let mut item = None;
    let mut community = None;
    let mut refresh = false;
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (name, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let value = match urlencoding::decode(raw) {
            Ok(value) => value.into_owned(),
            Err(e) => {
                debug!(%name, "skipping undecodable query parameter: {e}");
                continue;
            }
        };
        match name {
            "item" if !value.is_empty() => item = Some(value),
            "community" if !value.is_empty() => community = Some(value),
            "refresh" => refresh = true,
            _ => {}
        }
    }

    let view = match (item, community) {
        (Some(item_id), community) => ViewState::ItemDetail {
            item_id,
            origin: community.map_or(Origin::MainFeed, Origin::CommunityBoard),
        },
        (None, Some(community_id)) => ViewState::CommunityBoard { community_id },
        (None, None) => ViewState::MainFeed { tab },
    };
    Location { view, refresh }
}

/// The host's history stack.
///
/// `back` only requests navigation; the resulting location is reported later through
/// `poll_pop`, the same way a browser fires its back/forward event after the fact.
pub trait NavigationPort {
    fn location(&self) -> String;

    fn push(&mut self, url: &str);

    fn replace(&mut self, url: &str);

    fn can_go_back(&self) -> bool;

    fn back(&mut self);

    fn poll_pop(&mut self) -> Option<String>;
}

/// In-process history stack.
pub struct MemoryHistory {
    entries: Vec<String>,
    index: usize,
    pops: VecDeque<String>,
    // Some hosts report every location change, including the ones we make ourselves.
    echo_writes: bool,
}

impl MemoryHistory {
    pub fn new(initial_url: &str) -> Self {
        Self {
            entries: vec![initial_url.to_string()],
            index: 0,
            pops: VecDeque::new(),
            echo_writes: false,
        }
    }

    #[cfg(test)]
    pub fn echoing(initial_url: &str) -> Self {
        Self {
            echo_writes: true,
            ..Self::new(initial_url)
        }
    }

    pub fn can_go_forward(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn forward(&mut self) {
        if self.can_go_forward() {
            self.index += 1;
            self.pops.push_back(self.entries[self.index].clone());
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl NavigationPort for MemoryHistory {
    fn location(&self) -> String {
        self.entries[self.index].clone()
    }

    fn push(&mut self, url: &str) {
        self.entries.truncate(self.index + 1);
        self.entries.push(url.to_string());
        self.index += 1;
        if self.echo_writes {
            self.pops.push_back(url.to_string());
        }
    }

    fn replace(&mut self, url: &str) {
        self.entries[self.index] = url.to_string();
        if self.echo_writes {
            self.pops.push_back(url.to_string());
        }
    }

    fn can_go_back(&self) -> bool {
        self.index > 0
    }

    fn back(&mut self) {
        if self.can_go_back() {
            self.index -= 1;
            self.pops.push_back(self.entries[self.index].clone());
        }
    }

    fn poll_pop(&mut self) -> Option<String> {
        self.pops.pop_front()
    }
}

/// Keeps the navigation port in step with the view controller.
///
/// Our own writes are synchronous, so any location change the port echoes for one is already
/// queued when the write returns. That echo is dropped there; pops the user made before the
/// write are kept and handed out by [`HistorySync::poll`] first.
pub struct HistorySync<N> {
    port: N,
    pending: VecDeque<String>,
}

impl<N: NavigationPort> HistorySync<N> {
    pub fn new(port: N) -> Self {
        Self {
            port,
            pending: VecDeque::new(),
        }
    }

    pub fn port_mut(&mut self) -> &mut N {
        &mut self.port
    }

    pub fn current(&self, tab: FeedTab) -> Location {
        parse(&self.port.location(), tab)
    }

    pub fn location(&self) -> String {
        self.port.location()
    }

    /// Adds exactly one history entry for `view`.
    pub fn push(&mut self, view: &ViewState) {
        self.write(view, false);
    }

    /// Rewrites the current entry, e.g. to strip `refresh`.
    pub fn replace(&mut self, view: &ViewState) {
        self.write(view, true);
    }

    fn write(&mut self, view: &ViewState, replace: bool) {
        let url = format(view);
        if replace {
            self.port.replace(&url);
        } else {
            self.port.push(&url);
        }
        let mut raised: Vec<String> = std::iter::from_fn(|| self.port.poll_pop()).collect();
        if raised.last() == Some(&url) {
            raised.pop();
            debug!(%url, "ignoring location change raised by our own update");
        }
        self.pending.extend(raised);
    }

    /// Asks the port to go back one entry. False when there is nothing to go back to.
    pub fn back(&mut self) -> bool {
        if !self.port.can_go_back() {
            return false;
        }
        self.port.back();
        true
    }

    /// Next back/forward navigation made by the user, already parsed.
    pub fn poll(&mut self, tab: FeedTab) -> Option<Location> {
        self.pending
            .pop_front()
            .or_else(|| self.port.poll_pop())
            .map(|url| parse(&url, tab))
    }
}
