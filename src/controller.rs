//! The navigation state machine.
//!
//! [`ViewController`] owns the active view, the per-view data panels, the caches and the read
//! receipts. Everything that changes them runs on the controller one event at a time: user
//! actions arrive through [`ViewController::dispatch`], back/forward navigation is polled from
//! the history port, and network tasks report back over the controller's event channel tagged
//! with their request token.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::activity;
use crate::cache::{BoardCache, BoardSnapshot, DirectoryCache};
use crate::clock::Clock;
use crate::history::{HistorySync, Location, NavigationPort};
use crate::models::{
    Comment, Community, CommunityId, Item, ItemId, NewComment, NewItem, ReadReceipt,
    SessionState, Viewer,
};
use crate::receipts::ReadReceipts;
use crate::requests::{RequestCoordinator, RequestGroup, RequestToken};
use crate::service::{annotate_items, merge_personal_activity, DataService};
use crate::storage::{read_json, write_json, StoragePort};
use crate::view::{FeedTab, Origin, ViewState};

const ACTIVE_TAB_KEY: &str = "active_tab";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenItem(ItemId),
    OpenCommunity(CommunityId),
    GoBack,
    ChangeTab(FeedTab),
    /// Re-fetch the active view, bypassing caches. Doubles as the retry after a failed load.
    Refresh,
    CreateItem {
        community_id: CommunityId,
        payload: NewItem,
    },
    CreateComment {
        item_id: ItemId,
        payload: NewComment,
    },
    Subscribe(CommunityId),
    Unsubscribe(CommunityId),
    LoadDirectory,
    DismissPrompt,
}

impl Action {
    fn needs_session(&self) -> bool {
        match self {
            Action::OpenItem(_)
            | Action::CreateItem { .. }
            | Action::CreateComment { .. }
            | Action::Subscribe(_)
            | Action::Unsubscribe(_) => true,
            Action::ChangeTab(tab) => tab.needs_session(),
            _ => false,
        }
    }
}

/// An action taken before the session resolved, with the origin its view had at the time.
struct Deferred {
    action: Action,
    origin: Origin,
}

pub enum Payload {
    Session(Option<Viewer>),
    Directory(Vec<Community>),
    Receipts {
        viewer_id: String,
        receipts: Vec<ReadReceipt>,
    },
    Feed {
        tab: FeedTab,
        items: Vec<Item>,
    },
    Board {
        community_id: CommunityId,
        snapshot: BoardSnapshot,
    },
    Detail(DetailView),
}

pub enum Written {
    ItemCreated(Item),
    CommentCreated(Comment),
    MarkedRead(ItemId),
    Subscription {
        community_id: CommunityId,
        subscribed: bool,
    },
    ReadSyncFailed {
        item_id: ItemId,
        message: String,
    },
    Failed {
        action: &'static str,
        message: String,
    },
}

pub enum Event {
    Action(Action),
    /// The host's credentials changed (sign-in, sign-out, account switch).
    SessionChanged(Option<Viewer>),
    Fetched {
        group: RequestGroup,
        token: RequestToken,
        result: Result<Payload>,
    },
    Written(Written),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// Last payload of one view plus its load state. Background refreshes keep the payload on screen.
#[derive(Debug, Clone)]
pub struct Panel<T> {
    data: Option<T>,
    state: LoadState,
    refreshing: bool,
}

impl<T> Default for Panel<T> {
    fn default() -> Self {
        Self {
            data: None,
            state: LoadState::Idle,
            refreshing: false,
        }
    }
}

impl<T> Panel<T> {
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    fn start(&mut self) {
        if self.data.is_some() {
            self.refreshing = true;
        } else {
            self.state = LoadState::Loading;
        }
    }

    fn succeed(&mut self, data: T) {
        self.data = Some(data);
        self.state = LoadState::Ready;
        self.refreshing = false;
    }

    /// Returns true when the failure replaced the panel's content.
    fn fail(&mut self, message: String) -> bool {
        self.refreshing = false;
        if self.data.is_some() {
            return false;
        }
        self.state = LoadState::Failed(message);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailView {
    pub item: Item,
    pub comments: Vec<Comment>,
}

pub struct Ports<N> {
    pub service: Arc<dyn DataService>,
    pub navigation: N,
    /// Survives restarts.
    pub durable: Box<dyn StoragePort>,
    /// Lives as long as this client session.
    pub session: Box<dyn StoragePort>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub directory_ttl: Duration,
    pub board_ttl: Option<Duration>,
}

pub struct ViewController<N> {
    service: Arc<dyn DataService>,
    durable: Box<dyn StoragePort>,
    session_store: Box<dyn StoragePort>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    runtime: Handle,
    history: HistorySync<N>,
    requests: RequestCoordinator,
    events: UnboundedSender<Event>,
    inbox: UnboundedReceiver<Event>,

    view: ViewState,
    tab: FeedTab,
    session: SessionState,
    receipts: Option<ReadReceipts>,
    board_cache: BoardCache,
    directory_cache: DirectoryCache,

    feeds: HashMap<FeedTab, Panel<Vec<Item>>>,
    board_id: Option<CommunityId>,
    board: Panel<BoardSnapshot>,
    detail_id: Option<ItemId>,
    detail: Panel<DetailView>,
    directory: Panel<Vec<Community>>,

    deferred: VecDeque<Deferred>,
    // Set while the view found on mount waits for the session.
    awaiting_session: Option<Load>,
    pending_read: Option<ItemId>,
    access_prompt: bool,
    notice: Option<String>,
    writes_in_flight: usize,
}

impl<N: NavigationPort> ViewController<N> {
    pub fn new(ports: Ports<N>, settings: Settings, runtime: Handle) -> Self {
        let (events, inbox) = unbounded_channel();
        Self {
            service: ports.service,
            durable: ports.durable,
            session_store: ports.session,
            clock: ports.clock,
            board_cache: BoardCache::new(None, settings.board_ttl),
            directory_cache: DirectoryCache::new(None, settings.directory_ttl),
            settings,
            runtime,
            history: HistorySync::new(ports.navigation),
            requests: RequestCoordinator::new(),
            events,
            inbox,
            view: ViewState::default(),
            tab: FeedTab::default(),
            session: SessionState::Pending,
            receipts: None,
            feeds: HashMap::new(),
            board_id: None,
            board: Panel::default(),
            detail_id: None,
            detail: Panel::default(),
            directory: Panel::default(),
            deferred: VecDeque::new(),
            awaiting_session: None,
            pending_read: None,
            access_prompt: false,
            notice: None,
            writes_in_flight: 0,
        }
    }

    /// Derives the first view from the current URL and starts loading it.
    pub fn mount(&mut self) {
        match read_json::<FeedTab>(self.durable.as_ref(), ACTIVE_TAB_KEY) {
            Ok(Some(tab)) => self.tab = tab,
            Ok(None) => {}
            Err(e) => warn!("Ignoring stored feed tab: {e:#}"),
        }

        let Location { view, refresh } = self.history.current(self.tab);
        info!(view = view.name(), url = %self.history.location(), refresh, "mounting");
        if let ViewState::MainFeed { tab } = &view {
            self.tab = *tab;
        }
        self.view = view.clone();
        if refresh {
            self.history.replace(&view);
        }

        let service = self.service.clone();
        self.fetch(RequestGroup::Session, async move {
            Ok(Payload::Session(service.current_viewer().await?))
        });

        let load = if refresh { Load::Force } else { Load::Revalidate };
        if view.needs_session() {
            debug!(view = view.name(), "waiting for the session before loading");
            self.awaiting_session = Some(load);
        } else {
            self.load_view(load);
        }
    }

    pub fn sender(&self) -> UnboundedSender<Event> {
        self.events.clone()
    }

    pub fn dispatch(&mut self, action: Action) {
        let origin = self.view.origin_for_child();
        self.dispatch_from(action, origin);
    }

    /// Runs `action` as if taken on a view whose children get `origin`.
    ///
    /// Once one action is deferred, everything after it queues behind it, except dismissing a
    /// prompt.
    fn dispatch_from(&mut self, action: Action, origin: Origin) {
        let queue_behind = !self.deferred.is_empty() && action != Action::DismissPrompt;
        if queue_behind || action.needs_session() {
            match &self.session {
                SessionState::Pending => {
                    debug!(?action, queued = self.deferred.len(), "session pending, deferring");
                    self.deferred.push_back(Deferred { action, origin });
                    return;
                }
                SessionState::SignedOut if !action.needs_session() => {}
                SessionState::SignedOut => {
                    info!(?action, "sign-in required");
                    self.access_prompt = true;
                    return;
                }
                SessionState::SignedIn(_) => {}
            }
        }

        match action {
            Action::OpenItem(item_id) => self.open_item(item_id, origin),
            Action::OpenCommunity(community_id) => self.open_community(community_id),
            Action::GoBack => self.go_back(),
            Action::ChangeTab(tab) => self.change_tab(tab),
            Action::Refresh => self.refresh(),
            Action::CreateItem {
                community_id,
                payload,
            } => self.create_item(community_id, payload),
            Action::CreateComment { item_id, payload } => self.create_comment(item_id, payload),
            Action::Subscribe(community_id) => self.set_subscription(community_id, true),
            Action::Unsubscribe(community_id) => self.set_subscription(community_id, false),
            Action::LoadDirectory => self.load_directory(true),
            Action::DismissPrompt => {
                self.access_prompt = false;
                self.notice = None;
            }
        }
    }

    /// Handles every back/forward navigation and every queued event without waiting.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let before = handled;
            while let Some(location) = self.history.poll(self.tab) {
                self.on_pop(location);
                handled += 1;
            }
            while let Ok(event) = self.inbox.try_recv() {
                self.handle(event);
                handled += 1;
            }
            if handled == before {
                return handled;
            }
        }
    }

    /// Processes events until no request or write is in flight.
    pub async fn settle(&mut self) {
        loop {
            self.pump();
            if !self.is_busy() {
                return;
            }
            match self.inbox.recv().await {
                Some(event) => self.handle(event),
                None => return,
            }
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Action(action) => self.dispatch(action),
            Event::SessionChanged(viewer) => self.resolve_session(viewer),
            Event::Fetched {
                group,
                token,
                result,
            } => {
                if !self.requests.accept(group, token) {
                    return;
                }
                match result {
                    Ok(payload) => self.apply_payload(payload),
                    Err(e) => self.fetch_failed(group, e),
                }
            }
            Event::Written(written) => {
                self.writes_in_flight = self.writes_in_flight.saturating_sub(1);
                self.apply_write(written);
            }
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn tab(&self) -> FeedTab {
        self.tab
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn feed(&self, tab: FeedTab) -> Option<&Panel<Vec<Item>>> {
        self.feeds.get(&tab)
    }

    pub fn board(&self) -> &Panel<BoardSnapshot> {
        &self.board
    }

    pub fn detail(&self) -> &Panel<DetailView> {
        &self.detail
    }

    pub fn directory(&self) -> &Panel<Vec<Community>> {
        &self.directory
    }

    pub fn receipts(&self) -> Option<&ReadReceipts> {
        self.receipts.as_ref()
    }

    pub fn access_prompt(&self) -> bool {
        self.access_prompt
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn location(&self) -> String {
        self.history.location()
    }

    pub fn navigation_mut(&mut self) -> &mut N {
        self.history.port_mut()
    }

    /// True while any fetch or write is still out.
    pub fn is_busy(&self) -> bool {
        !self.requests.is_idle() || self.writes_in_flight > 0
    }

    pub fn is_unread(&self, item: &Item) -> bool {
        self.receipts
            .as_ref()
            .is_some_and(|receipts| receipts.is_unread(item))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn fetch<F>(&mut self, group: RequestGroup, request: F)
    where
        F: Future<Output = Result<Payload>> + Send + 'static,
    {
        let token = self.requests.begin(group);
        let events = self.events.clone();
        let task = self.runtime.spawn(async move {
            let result = request.await;
            let _ = events.send(Event::Fetched {
                group,
                token,
                result,
            });
        });
        self.requests.attach(group, token, task.abort_handle());
    }

    fn write<F>(&mut self, request: F)
    where
        F: Future<Output = Written> + Send + 'static,
    {
        self.writes_in_flight += 1;
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let _ = events.send(Event::Written(request.await));
        });
    }

    fn open_item(&mut self, item_id: ItemId, origin: Origin) {
        let target = ViewState::ItemDetail { origin, item_id };
        if target == self.view {
            return;
        }
        self.enter(target, Load::Revalidate, HistoryWrite::Push);
    }

    fn open_community(&mut self, community_id: CommunityId) {
        let target = ViewState::CommunityBoard { community_id };
        if target == self.view {
            let materialized = self.board_id.as_deref() == target.community_id()
                && (self.board.data.is_some() || self.requests.is_loading(RequestGroup::Board));
            if materialized {
                debug!(community_id = ?target.community_id(), "board already active");
                return;
            }
            self.load_view(Load::Revalidate);
            return;
        }
        self.enter(target, Load::Revalidate, HistoryWrite::Push);
    }

    fn go_back(&mut self) {
        if self.history.back() {
            // The pop is reported by the port and applied in `pump`.
            return;
        }
        match self.view.back_target(self.tab) {
            Some(target) => {
                debug!(to = target.name(), "no earlier history entry, replacing");
                self.enter_gated(target, Load::Reuse, HistoryWrite::Replace);
            }
            None => debug!("already at the main feed"),
        }
    }

    fn change_tab(&mut self, tab: FeedTab) {
        if !matches!(self.view, ViewState::MainFeed { .. }) {
            debug!(?tab, "tabs only switch on the main feed");
            return;
        }
        self.tab = tab;
        self.view = ViewState::MainFeed { tab };
        if let Err(e) = write_json(self.durable.as_ref(), ACTIVE_TAB_KEY, &tab) {
            warn!(?tab, "Failed to remember feed tab: {e:#}");
        }
        self.load_feed(tab, Load::Reuse);
    }

    fn refresh(&mut self) {
        if self.awaiting_session.is_some() {
            debug!("refresh ignored until the session resolves");
            return;
        }
        info!(view = self.view.name(), "refreshing");
        self.load_view(Load::Force);
    }

    fn on_pop(&mut self, location: Location) {
        debug!(view = location.view.name(), "history pop");
        let load = if location.refresh { Load::Force } else { Load::Reuse };
        if location.view == self.view {
            if location.refresh {
                self.load_view(load);
            }
            return;
        }
        self.enter_gated(location.view, load, HistoryWrite::Keep);
    }

    /// Enters `target`, falling back to its parent view when it needs a session the viewer does
    /// not have.
    fn enter_gated(&mut self, target: ViewState, load: Load, write: HistoryWrite) {
        if target.needs_session() {
            match &self.session {
                SessionState::Pending => {
                    self.leave_current(&target);
                    self.view = target;
                    self.write_history(write);
                    self.awaiting_session = Some(load);
                    return;
                }
                SessionState::SignedOut => {
                    self.access_prompt = true;
                    let fallback = target.back_target(self.tab).unwrap_or_default();
                    let write = match write {
                        HistoryWrite::Push => HistoryWrite::Push,
                        _ => HistoryWrite::Replace,
                    };
                    self.enter(fallback, load, write);
                    return;
                }
                SessionState::SignedIn(_) => {}
            }
        }
        self.enter(target, load, write);
    }

    fn enter(&mut self, target: ViewState, load: Load, write: HistoryWrite) {
        self.leave_current(&target);
        if let ViewState::MainFeed { tab } = &target {
            self.tab = *tab;
        }
        self.view = target;
        self.write_history(write);
        info!(view = self.view.name(), url = %self.history.location(), "view changed");

        if let ViewState::ItemDetail { item_id, .. } = &self.view {
            let item_id = item_id.clone();
            self.begin_read(&item_id);
        }
        self.load_view(load);
    }

    fn write_history(&mut self, write: HistoryWrite) {
        match write {
            HistoryWrite::Push => self.history.push(&self.view),
            HistoryWrite::Replace => self.history.replace(&self.view),
            HistoryWrite::Keep => {}
        }
    }

    fn leave_current(&mut self, target: &ViewState) {
        if self.view != *target && matches!(self.view, ViewState::ItemDetail { .. }) {
            self.flush_read();
        }
    }

    fn load_view(&mut self, load: Load) {
        match self.view.clone() {
            ViewState::MainFeed { tab } => self.load_feed(tab, load),
            ViewState::CommunityBoard { community_id } => self.load_board(community_id, load),
            ViewState::ItemDetail { item_id, .. } => self.load_detail(item_id, load),
        }
    }

    /// Feeds are only re-fetched on an explicit refresh.
    fn load_feed(&mut self, tab: FeedTab, load: Load) {
        let group = RequestGroup::Feed(tab);
        let panel = self.feeds.entry(tab).or_default();
        if load != Load::Force && (panel.data.is_some() || self.requests.is_loading(group)) {
            return;
        }
        if tab.needs_session() && self.session.viewer().is_none() {
            debug!(?tab, "feed needs a signed-in viewer");
            return;
        }
        panel.start();

        let service = self.service.clone();
        let now = self.now();
        match tab {
            FeedTab::Latest => self.fetch(group, async move {
                let items = service.list_main_feed_items().await?;
                let items = annotate_items(service, items, now).await;
                Ok(Payload::Feed { tab, items })
            }),
            FeedTab::Subscribed => self.fetch(group, async move {
                let (items, communities) =
                    tokio::try_join!(service.list_main_feed_items(), service.list_communities())?;
                let subscribed: HashSet<_> = communities
                    .into_iter()
                    .filter(|c| c.is_subscribed)
                    .map(|c| c.id)
                    .collect();
                let items = items
                    .into_iter()
                    .filter(|item| subscribed.contains(&item.community_id))
                    .collect();
                let items = annotate_items(service, items, now).await;
                Ok(Payload::Feed { tab, items })
            }),
            FeedTab::Activity => {
                let viewer_id = self.session.viewer_id().unwrap_or_default().to_string();
                self.fetch(group, async move {
                    let activity = service.list_personal_activity(&viewer_id).await?;
                    let items = merge_personal_activity(activity);
                    let items = annotate_items(service, items, now).await;
                    Ok(Payload::Feed { tab, items })
                })
            }
        }
    }

    fn load_board(&mut self, community_id: CommunityId, load: Load) {
        let now = self.now();
        let loading = self.requests.is_loading(RequestGroup::Board);
        if self.board_id.as_ref() != Some(&community_id) {
            self.board_id = Some(community_id.clone());
            self.board = Panel::default();
            if load != Load::Force {
                if let Some(entry) =
                    self.board_cache
                        .get(self.session_store.as_ref(), &community_id, now)
                {
                    self.board.succeed(entry.payload);
                    // Another board's fetch may still be out; it must not land here.
                    if !load.should_fetch(true, false) {
                        debug!(%community_id, "rendering cached board");
                        self.requests.cancel(RequestGroup::Board);
                        return;
                    }
                    debug!(%community_id, "rendering cached board, refreshing in the background");
                }
            }
        } else if !load.should_fetch(
            self.board.data.is_some(),
            loading,
        ) {
            return;
        }
        self.board.start();

        let service = self.service.clone();
        self.fetch(RequestGroup::Board, async move {
            let (items, communities) = tokio::try_join!(
                service.list_community_items(&community_id),
                service.list_communities()
            )?;
            let community = communities.into_iter().find(|c| c.id == community_id);
            let items = annotate_items(service, items, now).await;
            Ok(Payload::Board {
                community_id,
                snapshot: BoardSnapshot { community, items },
            })
        });
    }

    fn load_detail(&mut self, item_id: ItemId, load: Load) {
        if self.detail_id.as_ref() != Some(&item_id) {
            self.detail_id = Some(item_id.clone());
            self.detail = Panel::default();
        } else if !load.should_fetch(
            self.detail.data.is_some(),
            self.requests.is_loading(RequestGroup::Detail),
        ) {
            return;
        }
        self.detail.start();

        let service = self.service.clone();
        let now = self.now();
        self.fetch(RequestGroup::Detail, async move {
            let (item, mut comments) =
                tokio::try_join!(service.get_item(&item_id), service.list_comments(&item_id))?;
            comments.sort_by_key(|c| c.created_at);
            let item = activity::annotate(&item, &comments, now);
            Ok(Payload::Detail(DetailView { item, comments }))
        });
    }

    fn load_directory(&mut self, force: bool) {
        if !self.session.is_resolved() {
            debug!("directory waits for the session");
            return;
        }
        if !force {
            if let Some(communities) = self.directory_cache.get(self.durable.as_ref(), self.now())
            {
                debug!(count = communities.len(), "using cached community directory");
                self.directory.succeed(communities);
                return;
            }
        }
        self.directory.start();
        let service = self.service.clone();
        self.fetch(RequestGroup::Directory, async move {
            Ok(Payload::Directory(service.list_communities().await?))
        });
    }

    fn apply_payload(&mut self, payload: Payload) {
        match payload {
            Payload::Session(viewer) => self.resolve_session(viewer),
            Payload::Directory(communities) => {
                info!(count = communities.len(), "community directory loaded");
                self.directory_cache
                    .put(self.durable.as_ref(), &communities, self.now());
                self.directory.succeed(communities);
            }
            Payload::Receipts {
                viewer_id,
                receipts,
            } => {
                let Some(local) = self.receipts.as_mut() else {
                    return;
                };
                if local.viewer_id() != viewer_id {
                    return;
                }
                let updated = local.merge(receipts);
                debug!(%viewer_id, updated, "merged remote read receipts");
                self.save_receipts();
            }
            Payload::Feed { tab, items } => {
                debug!(?tab, count = items.len(), "feed loaded");
                self.feeds.entry(tab).or_default().succeed(items);
            }
            Payload::Board {
                community_id,
                snapshot,
            } => {
                debug!(%community_id, count = snapshot.items.len(), "board loaded");
                self.board_cache.put(
                    self.session_store.as_ref(),
                    &community_id,
                    snapshot.clone(),
                    self.now(),
                );
                self.board.succeed(snapshot);
            }
            Payload::Detail(detail) => {
                let item = detail.item.clone();
                self.detail.succeed(detail);
                self.patch_item(&item);
                if self.pending_read.as_ref() == Some(&item.id) {
                    self.pending_read = None;
                    self.record_read(&item);
                }
            }
        }
    }

    fn fetch_failed(&mut self, group: RequestGroup, e: anyhow::Error) {
        let message = format!("{e:#}");
        let replaced = match group {
            RequestGroup::Session => {
                error!("Could not resolve the session: {message}");
                self.resolve_session(None);
                return;
            }
            RequestGroup::Receipts => {
                warn!("Could not fetch remote read receipts: {message}");
                return;
            }
            RequestGroup::Directory => self.directory.fail(message.clone()),
            RequestGroup::Feed(tab) => self.feeds.entry(tab).or_default().fail(message.clone()),
            RequestGroup::Board => self.board.fail(message.clone()),
            RequestGroup::Detail => self.detail.fail(message.clone()),
        };
        if replaced {
            warn!(?group, "Load failed: {message}");
        } else {
            warn!(?group, "Background refresh failed, keeping what is on screen: {message}");
        }
    }

    fn resolve_session(&mut self, viewer: Option<Viewer>) {
        let next = match viewer {
            Some(viewer) => SessionState::SignedIn(viewer),
            None => SessionState::SignedOut,
        };
        let previous = std::mem::replace(&mut self.session, next);
        let previous_id = previous.viewer_id().map(str::to_string);
        let viewer_id = self.session.viewer_id().map(str::to_string);
        let identity_changed = previous.is_resolved() && previous_id != viewer_id;
        info!(viewer = ?viewer_id, identity_changed, "session resolved");

        if identity_changed {
            self.directory_cache.invalidate(self.durable.as_ref());
            if previous_id.is_some() {
                self.board_cache.clear(self.session_store.as_ref());
            }
            self.feeds.clear();
            self.board_id = None;
            self.board = Panel::default();
            self.detail_id = None;
            self.detail = Panel::default();
            self.pending_read = None;
        }

        self.board_cache = BoardCache::new(viewer_id.as_deref(), self.settings.board_ttl);
        self.directory_cache = DirectoryCache::new(viewer_id.as_deref(), self.settings.directory_ttl);
        if identity_changed {
            self.directory_cache.invalidate(self.durable.as_ref());
        }

        self.receipts = viewer_id.as_deref().map(|id| {
            ReadReceipts::load(self.durable.as_ref(), id)
        });
        if let Some(id) = viewer_id.clone() {
            let service = self.service.clone();
            self.fetch(RequestGroup::Receipts, async move {
                let receipts = service.list_read_receipts(&id).await?;
                Ok(Payload::Receipts {
                    viewer_id: id,
                    receipts,
                })
            });
        } else {
            self.requests.cancel(RequestGroup::Receipts);
        }

        self.load_directory(identity_changed);

        if let Some(load) = self.awaiting_session.take() {
            self.enter_gated(self.view.clone(), load, HistoryWrite::Keep);
        } else if identity_changed {
            self.enter_gated(self.view.clone(), Load::Force, HistoryWrite::Replace);
        }

        let deferred: Vec<Deferred> = self.deferred.drain(..).collect();
        if !deferred.is_empty() {
            debug!(count = deferred.len(), "replaying deferred actions");
        }
        for Deferred { action, origin } in deferred {
            self.dispatch_from(action, origin);
            // A replayed back step lands before the next action runs.
            while let Some(location) = self.history.poll(self.tab) {
                self.on_pop(location);
            }
        }
    }

    fn begin_read(&mut self, item_id: &str) {
        if let Some(receipts) = self.receipts.as_mut() {
            if receipts.clear_just_commented(item_id) {
                self.save_receipts();
            }
        }
        match self.find_item(item_id) {
            Some(item) => {
                self.pending_read = None;
                self.record_read(&item);
            }
            None => self.pending_read = Some(item_id.to_string()),
        }
    }

    /// Moves the receipt for `item` to now when viewing it counts as reading it, then tells the
    /// service without waiting for the answer.
    fn record_read(&mut self, item: &Item) {
        let now = self.now();
        let Some(receipts) = self.receipts.as_mut() else {
            return;
        };
        if !receipts.should_record(item) || !receipts.record(&item.id, now) {
            return;
        }
        debug!(item_id = %item.id, "recorded read");
        self.save_receipts();

        let service = self.service.clone();
        let item_id = item.id.clone();
        self.write(async move {
            match service.mark_item_read(&item_id).await {
                Ok(()) => Written::MarkedRead(item_id),
                Err(e) => Written::ReadSyncFailed {
                    item_id,
                    message: format!("{e:#}"),
                },
            }
        });
    }

    /// Receipt update for the item detail being left.
    fn flush_read(&mut self) {
        let Some(item_id) = self.view.item_id().map(str::to_string) else {
            return;
        };
        self.pending_read = None;
        if let Some(receipts) = self.receipts.as_mut() {
            if receipts.clear_just_commented(&item_id) {
                self.save_receipts();
            }
        }
        match self.find_item(&item_id) {
            Some(item) => self.record_read(&item),
            None => debug!(%item_id, "left an item that never loaded"),
        }
    }

    fn save_receipts(&self) {
        if let Some(receipts) = &self.receipts {
            if let Err(e) = receipts.save(self.durable.as_ref()) {
                warn!(viewer_id = %receipts.viewer_id(), "Failed to persist read receipts: {e:#}");
            }
        }
    }

    fn find_item(&self, item_id: &str) -> Option<Item> {
        if self.detail_id.as_deref() == Some(item_id) {
            if let Some(detail) = &self.detail.data {
                return Some(detail.item.clone());
            }
        }
        self.board
            .data
            .iter()
            .flat_map(|snapshot| snapshot.items.iter())
            .chain(
                self.feeds
                    .values()
                    .filter_map(|panel| panel.data.as_ref())
                    .flatten(),
            )
            .find(|item| item.id == item_id)
            .cloned()
    }

    /// Replaces every listed copy of `item` with the newer one.
    fn patch_item(&mut self, item: &Item) {
        let lists = self
            .feeds
            .values_mut()
            .filter_map(|panel| panel.data.as_mut())
            .chain(self.board.data.as_mut().map(|snapshot| &mut snapshot.items));
        for list in lists {
            for listed in list.iter_mut().filter(|listed| listed.id == item.id) {
                *listed = item.clone();
            }
        }
    }

    fn create_item(&mut self, community_id: CommunityId, payload: NewItem) {
        info!(%community_id, title = %payload.title, "creating post");
        let service = self.service.clone();
        self.write(async move {
            match service.create_item(&community_id, &payload).await {
                Ok(item) => Written::ItemCreated(item),
                Err(e) => Written::Failed {
                    action: "create the post",
                    message: format!("{e:#}"),
                },
            }
        });
    }

    fn create_comment(&mut self, item_id: ItemId, payload: NewComment) {
        info!(%item_id, "posting comment");
        let service = self.service.clone();
        self.write(async move {
            match service.create_comment(&item_id, &payload).await {
                Ok(comment) => Written::CommentCreated(comment),
                Err(e) => Written::Failed {
                    action: "post the comment",
                    message: format!("{e:#}"),
                },
            }
        });
    }

    fn set_subscription(&mut self, community_id: CommunityId, subscribed: bool) {
        let service = self.service.clone();
        self.write(async move {
            let result = if subscribed {
                service.subscribe(&community_id).await
            } else {
                service.unsubscribe(&community_id).await
            };
            match result {
                Ok(()) => Written::Subscription {
                    community_id,
                    subscribed,
                },
                Err(e) => Written::Failed {
                    action: if subscribed { "subscribe" } else { "unsubscribe" },
                    message: format!("{e:#}"),
                },
            }
        });
    }

    fn apply_write(&mut self, written: Written) {
        match written {
            Written::ItemCreated(item) => self.item_created(item),
            Written::CommentCreated(comment) => self.comment_created(comment),
            Written::MarkedRead(item_id) => debug!(%item_id, "read receipt synced"),
            Written::ReadSyncFailed { item_id, message } => {
                warn!(%item_id, "Could not sync read receipt: {message}");
            }
            Written::Subscription {
                community_id,
                subscribed,
            } => self.subscription_changed(community_id, subscribed),
            Written::Failed { action, message } => {
                warn!("Could not {action}: {message}");
                self.notice = Some(format!("Could not {action}: {message}"));
            }
        }
    }

    fn item_created(&mut self, item: Item) {
        let now = self.now();
        let item = activity::annotate(&item, &[], now);
        let community_id = item.community_id.clone();
        info!(item_id = %item.id, %community_id, "post created");

        self.board_cache
            .prepend_item(self.session_store.as_ref(), &item);
        self.directory_cache
            .update_community(self.durable.as_ref(), &community_id, |c| c.item_count += 1);

        let mut subscribed = false;
        if let Some(communities) = self.directory.data.as_mut() {
            if let Some(community) = communities.iter_mut().find(|c| c.id == community_id) {
                community.item_count += 1;
                subscribed = community.is_subscribed;
            }
        }
        if self.board_id.as_ref() == Some(&community_id) {
            if let Some(snapshot) = self.board.data.as_mut() {
                snapshot.items.retain(|listed| listed.id != item.id);
                snapshot.items.insert(0, item.clone());
                if let Some(community) = snapshot.community.as_mut() {
                    community.item_count += 1;
                }
            }
        }
        for (tab, panel) in self.feeds.iter_mut() {
            let listed = match tab {
                FeedTab::Latest | FeedTab::Activity => true,
                FeedTab::Subscribed => subscribed,
            };
            if let (true, Some(items)) = (listed, panel.data.as_mut()) {
                items.retain(|listed| listed.id != item.id);
                items.insert(0, item.clone());
            }
        }
    }

    fn comment_created(&mut self, comment: Comment) {
        let item_id = comment.item_id.clone();
        if let Some(receipts) = self.receipts.as_mut() {
            receipts.mark_just_commented(&item_id);
        }
        self.save_receipts();

        let now = self.now();
        let refreshed = match self.detail.data.as_mut() {
            Some(detail) if detail.item.id == item_id => {
                detail.comments.push(comment);
                detail.item.comment_count += 1;
                detail.item = activity::annotate(&detail.item, &detail.comments, now);
                Some(detail.item.clone())
            }
            _ => None,
        };
        match refreshed {
            Some(item) => self.patch_item(&item),
            None => {
                if let Some(mut item) = self.find_item(&item_id) {
                    item.comment_count += 1;
                    self.patch_item(&item);
                }
            }
        }
    }

    fn subscription_changed(&mut self, community_id: CommunityId, subscribed: bool) {
        info!(%community_id, subscribed, "subscription changed");
        self.directory_cache
            .update_community(self.durable.as_ref(), &community_id, |c| {
                c.is_subscribed = subscribed
            });
        if let Some(communities) = self.directory.data.as_mut() {
            for community in communities.iter_mut().filter(|c| c.id == community_id) {
                community.is_subscribed = subscribed;
            }
        }
        let now = self.now();
        if self.board_id.as_ref() == Some(&community_id) {
            if let Some(snapshot) = self.board.data.as_mut() {
                if let Some(community) = snapshot.community.as_mut() {
                    community.is_subscribed = subscribed;
                }
                self.board_cache.put(
                    self.session_store.as_ref(),
                    &community_id,
                    snapshot.clone(),
                    now,
                );
            }
        }

        self.requests.cancel(RequestGroup::Feed(FeedTab::Subscribed));
        self.feeds.remove(&FeedTab::Subscribed);
        if self.view == (ViewState::MainFeed { tab: FeedTab::Subscribed }) {
            self.load_feed(FeedTab::Subscribed, Load::Force);
        }
    }
}

/// How much of an already materialized view may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Load {
    /// Back/forward: show what is there, fetch only what never loaded.
    Reuse,
    /// Explicit navigation: show what is there and refresh it in the background.
    Revalidate,
    /// Refresh: bypass caches.
    Force,
}

impl Load {
    fn should_fetch(self, has_data: bool, loading: bool) -> bool {
        match self {
            Load::Reuse => !has_data && !loading,
            Load::Revalidate => !loading,
            Load::Force => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum HistoryWrite {
    Push,
    Replace,
    Keep,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::storage::MemoryStorage;
    use crate::testing::{at, comment, community, item, viewer, FakeService, ManualClock};

    struct Harness {
        fake: Arc<FakeService>,
        clock: Arc<ManualClock>,
        durable: Arc<MemoryStorage>,
        controller: ViewController<MemoryHistory>,
    }

    fn t0() -> DateTime<Utc> {
        at(2024, 5, 10, 12)
    }

    fn subscribed(id: &str) -> Community {
        let mut community = community(id);
        community.is_subscribed = true;
        community
    }

    /// Two boards, one post each. The viewer is subscribed to `mit`; `p1` has one comment.
    fn fixture() -> Arc<FakeService> {
        let fake = FakeService::new();
        let p1 = item("p1", "mit", "op", t0() - Duration::hours(3));
        let p2 = item("p2", "ucla", "op2", t0() - Duration::hours(5));
        fake.set_communities(vec![subscribed("mit"), community("ucla")]);
        fake.set_feed(vec![p1.clone(), p2.clone()]);
        fake.set_board("mit", vec![p1]);
        fake.set_board("ucla", vec![p2]);
        fake.set_comments(
            "p1",
            vec![comment("c1", "p1", "reader", t0() - Duration::hours(2))],
        );
        Arc::new(fake)
    }

    fn harness_with(
        navigation: MemoryHistory,
        fake: Arc<FakeService>,
        durable: Arc<MemoryStorage>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let ports = Ports {
            service: fake.clone(),
            navigation,
            durable: Box::new(durable.clone()),
            session: Box::new(MemoryStorage::new()),
            clock: clock.clone(),
        };
        let settings = Settings {
            directory_ttl: Duration::minutes(5),
            board_ttl: None,
        };
        let mut controller = ViewController::new(ports, settings, Handle::current());
        controller.mount();
        Harness {
            fake,
            clock,
            durable,
            controller,
        }
    }

    fn harness(url: &str, fake: Arc<FakeService>) -> Harness {
        harness_with(MemoryHistory::new(url), fake, Arc::new(MemoryStorage::new()))
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    fn board(id: &str) -> ViewState {
        ViewState::CommunityBoard {
            community_id: id.to_string(),
        }
    }

    fn feed_item(controller: &ViewController<MemoryHistory>, tab: FeedTab, id: &str) -> Item {
        controller
            .feed(tab)
            .and_then(|panel| panel.data())
            .and_then(|items| items.iter().find(|item| item.id == id))
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn opening_the_active_board_twice_fetches_once() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);
        h.controller.settle().await;

        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.settle().await;
        let listed = h.controller.board().data().unwrap().items.clone();

        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.settle().await;

        assert_eq!(h.fake.calls_to("list_community_items:mit"), 1);
        assert_eq!(h.controller.navigation_mut().len(), 2);
        assert_eq!(h.controller.board().data().unwrap().items, listed);
    }

    #[tokio::test]
    async fn later_board_request_wins() {
        let fake = fixture();
        fake.sign_in("me");
        fake.hold("list_community_items:mit");
        let mut h = harness("/", fake);
        h.controller.settle().await;

        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;
        h.fake.release("list_community_items:mit");
        h.controller.settle().await;

        assert_eq!(h.controller.view(), &board("ucla"));
        let snapshot = h.controller.board().data().unwrap();
        assert_eq!(ids(&snapshot.items), ["p2"]);
        assert_eq!(snapshot.community.as_ref().unwrap().id, "ucla");
        assert_eq!(h.controller.board().state(), &LoadState::Ready);
    }

    #[tokio::test]
    async fn back_from_an_item_restores_the_tab_without_refetching() {
        let fake = fixture();
        fake.sign_in("me");
        let durable = Arc::new(MemoryStorage::new());
        write_json(durable.as_ref(), ACTIVE_TAB_KEY, &FeedTab::Subscribed).unwrap();
        let mut h = harness_with(MemoryHistory::new("/"), fake, durable);
        h.controller.settle().await;

        assert_eq!(h.controller.view(), &ViewState::MainFeed { tab: FeedTab::Subscribed });
        let feed = h.controller.feed(FeedTab::Subscribed).unwrap();
        assert_eq!(ids(feed.data().unwrap()), ["p1"]);
        assert_eq!(h.fake.calls_to("list_main_feed_items"), 1);

        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.settle().await;
        assert_eq!(h.controller.location(), "/?item=p1");
        assert_eq!(h.controller.detail().state(), &LoadState::Ready);

        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;
        assert_eq!(h.controller.view(), &ViewState::MainFeed { tab: FeedTab::Subscribed });
        assert_eq!(h.controller.location(), "/");
        assert_eq!(h.fake.calls_to("list_main_feed_items"), 1);
    }

    #[tokio::test]
    async fn created_post_shows_on_the_next_board_visit_from_cache() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;

        h.controller.dispatch(Action::CreateItem {
            community_id: "mit".into(),
            payload: NewItem {
                title: "Lost keys near the library".into(),
                ..NewItem::default()
            },
        });
        h.controller.settle().await;

        let latest = h.controller.feed(FeedTab::Latest).unwrap().data().unwrap();
        assert_eq!(latest[0].title, "Lost keys near the library");
        let directory = h.controller.directory().data().unwrap();
        assert_eq!(directory.iter().find(|c| c.id == "mit").unwrap().item_count, 1);

        // The refresh stalls; whatever is on screen comes from the cache.
        h.fake.hold("list_community_items:mit");
        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        let shown = h.controller.board().data().unwrap();
        assert_eq!(shown.items[0].title, "Lost keys near the library");
        assert_eq!(shown.items.len(), 2);
        assert_eq!(shown.community.as_ref().unwrap().item_count, 1);
        assert!(h.controller.board().is_refreshing());
    }

    #[tokio::test]
    async fn deep_link_to_an_item_waits_for_the_session() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/?item=p1&community=mit", fake);

        assert!(matches!(h.controller.view(), ViewState::ItemDetail { .. }));
        assert_eq!(h.controller.detail().state(), &LoadState::Idle);

        h.controller.settle().await;
        let detail = h.controller.detail().data().unwrap();
        assert_eq!(detail.item.id, "p1");
        assert_eq!(detail.item.latest_other_comment_at, Some(t0() - Duration::hours(2)));
        assert_eq!(h.controller.receipts().unwrap().last_seen("p1"), Some(t0()));
        assert_eq!(h.fake.calls_to("mark_item_read:p1"), 1);

        // Nothing to pop: back lands on the board the link named.
        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;
        assert_eq!(h.controller.view(), &board("mit"));
        assert_eq!(h.controller.location(), "/?community=mit");
        assert_eq!(h.controller.navigation_mut().len(), 1);
    }

    #[tokio::test]
    async fn signed_out_deep_link_falls_back_with_a_prompt() {
        let mut h = harness("/?item=p1&community=mit", fixture());
        h.controller.settle().await;

        assert_eq!(h.controller.session(), &SessionState::SignedOut);
        assert_eq!(h.controller.view(), &board("mit"));
        assert_eq!(h.controller.location(), "/?community=mit");
        assert!(h.controller.access_prompt());
        assert_eq!(h.controller.board().state(), &LoadState::Ready);
        assert!(!h.fake.calls().iter().any(|call| call.starts_with("get_item")));

        h.controller.dispatch(Action::DismissPrompt);
        assert!(!h.controller.access_prompt());
    }

    #[tokio::test]
    async fn actions_taken_before_the_session_resolves_are_replayed() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);

        h.controller.dispatch(Action::ChangeTab(FeedTab::Activity));
        h.controller.dispatch(Action::OpenItem("p1".into()));
        assert_eq!(h.controller.view(), &ViewState::MainFeed { tab: FeedTab::Latest });

        h.controller.settle().await;
        assert_eq!(
            h.controller.view(),
            &ViewState::ItemDetail {
                item_id: "p1".into(),
                origin: Origin::MainFeed,
            }
        );
        assert_eq!(h.controller.tab(), FeedTab::Activity);
        assert_eq!(h.controller.location(), "/?item=p1");
        assert_eq!(h.fake.calls_to("list_personal_activity:me"), 1);
        let stored: Option<FeedTab> = read_json(h.durable.as_ref(), ACTIVE_TAB_KEY).unwrap();
        assert_eq!(stored, Some(FeedTab::Activity));
    }

    #[tokio::test]
    async fn navigation_queued_behind_a_deferred_action_keeps_its_order() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);

        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        assert_eq!(h.controller.view(), &ViewState::MainFeed { tab: FeedTab::Latest });

        h.controller.settle().await;
        assert_eq!(h.controller.view(), &board("ucla"));
        assert_eq!(h.controller.location(), "/?community=ucla");

        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;
        assert_eq!(
            h.controller.view(),
            &ViewState::ItemDetail {
                item_id: "p1".into(),
                origin: Origin::MainFeed,
            }
        );
        assert_eq!(h.controller.location(), "/?item=p1");
    }

    #[tokio::test]
    async fn deferred_back_step_lands_before_the_next_action() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/?community=mit", fake);

        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.dispatch(Action::GoBack);
        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;

        assert_eq!(h.controller.view(), &board("ucla"));
        assert_eq!(h.controller.location(), "/?community=ucla");
        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;
        assert_eq!(h.controller.view(), &board("mit"));
    }

    #[tokio::test]
    async fn going_back_to_a_cached_board_does_not_refetch_it() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);
        h.controller.settle().await;

        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;

        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;
        assert_eq!(h.controller.view(), &board("mit"));
        assert_eq!(ids(&h.controller.board().data().unwrap().items), ["p1"]);
        assert_eq!(h.controller.board().state(), &LoadState::Ready);
        assert_eq!(h.fake.calls_to("list_community_items:mit"), 1);

        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;
        assert_eq!(h.fake.calls_to("list_community_items:ucla"), 2);
    }

    #[tokio::test]
    async fn signed_out_viewer_is_prompted_instead_of_navigating() {
        let mut h = harness("/", fixture());
        h.controller.settle().await;

        h.controller.dispatch(Action::ChangeTab(FeedTab::Subscribed));
        assert!(h.controller.access_prompt());
        h.controller.dispatch(Action::DismissPrompt);
        h.controller.dispatch(Action::OpenItem("p1".into()));
        assert!(h.controller.access_prompt());

        h.controller.settle().await;
        assert_eq!(h.controller.view(), &ViewState::MainFeed { tab: FeedTab::Latest });
        assert_eq!(h.controller.navigation_mut().len(), 1);
        assert!(!h.controller.is_unread(&feed_item(&h.controller, FeedTab::Latest, "p1")));
    }

    #[tokio::test]
    async fn activity_tab_lists_authored_and_commented_posts() {
        let fake = fixture();
        fake.sign_in("me");
        fake.set_activity(crate::models::PersonalActivity {
            authored: vec![item("p3", "ucla", "me", t0() - Duration::hours(1))],
            commented_on: vec![item("p1", "mit", "op", t0() - Duration::hours(3))],
        });
        let mut h = harness("/", fake);
        h.controller.settle().await;

        h.controller.dispatch(Action::ChangeTab(FeedTab::Activity));
        h.controller.settle().await;
        let activity = h.controller.feed(FeedTab::Activity).unwrap().data().unwrap();
        assert_eq!(ids(activity), ["p3", "p1"]);
        assert!(activity[1].latest_other_comment_at.is_some());
        assert_eq!(h.controller.navigation_mut().len(), 1);
    }

    #[tokio::test]
    async fn leaving_an_item_moves_its_receipt_forward() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);
        h.controller.settle().await;
        let p1 = feed_item(&h.controller, FeedTab::Latest, "p1");
        assert!(h.controller.is_unread(&p1));

        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.settle().await;
        assert_eq!(h.controller.receipts().unwrap().last_seen("p1"), Some(t0()));

        h.clock.advance(Duration::minutes(10));
        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;

        let receipts = h.controller.receipts().unwrap();
        assert_eq!(receipts.last_seen("p1"), Some(t0() + Duration::minutes(10)));
        assert_eq!(h.fake.calls_to("mark_item_read:p1"), 2);
        let p1 = feed_item(&h.controller, FeedTab::Latest, "p1");
        assert!(!h.controller.is_unread(&p1));
    }

    #[tokio::test]
    async fn own_comment_does_not_badge_the_post() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.settle().await;

        h.clock.advance(Duration::minutes(5));
        h.fake.set_now(t0() + Duration::minutes(5));
        h.controller.dispatch(Action::CreateComment {
            item_id: "p1".into(),
            payload: NewComment {
                body: "Same here".into(),
                audio_url: None,
            },
        });
        h.controller.settle().await;

        let detail = h.controller.detail().data().unwrap();
        assert_eq!(detail.comments.len(), 2);
        assert_eq!(
            detail.item.latest_other_comment_at,
            Some(t0() + Duration::minutes(5))
        );
        assert!(!h.controller.is_unread(&detail.item));
        assert!(h.controller.receipts().unwrap().has_just_commented("p1"));

        h.controller.dispatch(Action::GoBack);
        h.controller.settle().await;
        let receipts = h.controller.receipts().unwrap();
        assert!(!receipts.has_just_commented("p1"));
        assert_eq!(receipts.last_seen("p1"), Some(t0() + Duration::minutes(5)));
        let p1 = feed_item(&h.controller, FeedTab::Latest, "p1");
        assert!(!h.controller.is_unread(&p1));
    }

    #[tokio::test]
    async fn failed_first_load_waits_for_an_explicit_retry() {
        let fake = fixture();
        fake.sign_in("me");
        fake.fail("list_community_items:ucla");
        let mut h = harness("/", fake);
        h.controller.settle().await;

        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;
        assert!(matches!(h.controller.board().state(), LoadState::Failed(_)));
        assert!(h.controller.board().data().is_none());

        h.fake.recover("list_community_items:ucla");
        h.controller.dispatch(Action::Refresh);
        h.controller.settle().await;
        assert_eq!(h.controller.board().state(), &LoadState::Ready);
        assert_eq!(ids(&h.controller.board().data().unwrap().items), ["p2"]);
        assert_eq!(h.fake.calls_to("list_community_items:ucla"), 2);
    }

    #[tokio::test]
    async fn failed_background_refresh_keeps_the_cached_board() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness("/", fake);
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenCommunity("ucla".into()));
        h.controller.settle().await;

        h.fake.fail("list_community_items:mit");
        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        assert!(h.controller.board().is_refreshing());
        h.controller.settle().await;

        assert_eq!(h.controller.board().state(), &LoadState::Ready);
        assert!(!h.controller.board().is_refreshing());
        assert_eq!(ids(&h.controller.board().data().unwrap().items), ["p1"]);
        assert_eq!(h.fake.calls_to("list_community_items:mit"), 2);
    }

    #[tokio::test]
    async fn refresh_parameter_is_stripped_from_the_url() {
        let mut h = harness("/?community=mit&refresh=1", fixture());
        assert_eq!(h.controller.location(), "/?community=mit");
        h.controller.settle().await;

        assert_eq!(h.controller.view(), &board("mit"));
        assert_eq!(h.controller.board().state(), &LoadState::Ready);
        assert_eq!(h.controller.navigation_mut().len(), 1);
    }

    #[tokio::test]
    async fn echoed_location_changes_are_not_navigation() {
        let fake = fixture();
        fake.sign_in("me");
        let mut h = harness_with(
            MemoryHistory::echoing("/"),
            fake,
            Arc::new(MemoryStorage::new()),
        );
        h.controller.settle().await;

        h.controller.dispatch(Action::OpenCommunity("mit".into()));
        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.settle().await;

        assert_eq!(h.controller.location(), "/?item=p1&community=mit");
        assert!(matches!(h.controller.view(), ViewState::ItemDetail { .. }));
        assert_eq!(h.controller.navigation_mut().len(), 3);
    }

    #[tokio::test]
    async fn remote_receipts_are_merged_on_sign_in() {
        let fake = fixture();
        fake.sign_in("me");
        fake.set_remote_receipts(vec![ReadReceipt {
            item_id: "p1".into(),
            read_at: t0() - Duration::hours(1),
        }]);
        let mut h = harness("/", fake);
        h.controller.settle().await;

        let receipts = h.controller.receipts().unwrap();
        assert_eq!(receipts.last_seen("p1"), Some(t0() - Duration::hours(1)));
        assert!(!h.controller.is_unread(&feed_item(&h.controller, FeedTab::Latest, "p1")));

        let reloaded = ReadReceipts::load(h.durable.as_ref(), "me");
        assert_eq!(reloaded.last_seen("p1"), Some(t0() - Duration::hours(1)));
    }

    #[tokio::test]
    async fn subscribing_refreshes_directory_and_subscribed_feed() {
        let fake = fixture();
        fake.sign_in("me");
        let durable = Arc::new(MemoryStorage::new());
        write_json(durable.as_ref(), ACTIVE_TAB_KEY, &FeedTab::Subscribed).unwrap();
        let mut h = harness_with(MemoryHistory::new("/"), fake, durable);
        h.controller.settle().await;

        h.controller.dispatch(Action::Subscribe("ucla".into()));
        h.controller.settle().await;

        let directory = h.controller.directory().data().unwrap();
        assert!(directory.iter().all(|c| c.is_subscribed));
        let feed = h.controller.feed(FeedTab::Subscribed).unwrap();
        assert_eq!(ids(feed.data().unwrap()), ["p1", "p2"]);
    }

    #[tokio::test]
    async fn failed_write_is_reported() {
        let fake = fixture();
        fake.sign_in("me");
        fake.fail("create_comment:p1");
        let mut h = harness("/", fake);
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.dispatch(Action::CreateComment {
            item_id: "p1".into(),
            payload: NewComment::default(),
        });
        h.controller.settle().await;

        assert!(h.controller.notice().unwrap().contains("post the comment"));
        assert!(!h.controller.receipts().unwrap().has_just_commented("p1"));
        assert_eq!(h.controller.detail().data().unwrap().comments.len(), 1);
    }

    #[tokio::test]
    async fn switching_accounts_drops_the_previous_directory() {
        let fake = fixture();
        fake.sign_in("u1");
        let mut h = harness("/?community=mit", fake);
        h.controller.settle().await;
        assert!(h.durable.get("directory:u1").unwrap().is_some());

        h.controller.handle(Event::SessionChanged(Some(viewer("u2"))));
        h.controller.settle().await;
        assert!(h.durable.get("directory:u1").unwrap().is_none());
        assert!(h.durable.get("directory:u2").unwrap().is_some());
        assert_eq!(h.controller.receipts().unwrap().viewer_id(), "u2");
        assert_eq!(h.controller.board().state(), &LoadState::Ready);
        assert_eq!(h.fake.calls_to("list_community_items:mit"), 2);

        h.controller.handle(Event::SessionChanged(None));
        h.controller.settle().await;
        assert!(h.controller.receipts().is_none());
        assert_eq!(h.controller.view(), &board("mit"));
    }

    #[tokio::test]
    async fn signing_out_on_an_item_returns_to_its_origin() {
        let fake = fixture();
        fake.sign_in("u1");
        let mut h = harness("/", fake);
        h.controller.settle().await;
        h.controller.dispatch(Action::OpenItem("p1".into()));
        h.controller.settle().await;

        h.controller.handle(Event::SessionChanged(None));
        h.controller.settle().await;

        assert_eq!(h.controller.view(), &ViewState::MainFeed { tab: FeedTab::Latest });
        assert_eq!(h.controller.location(), "/");
        assert!(h.controller.access_prompt());
    }
}
