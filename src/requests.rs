use std::collections::HashMap;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::view::FeedTab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

/// Logical units of work. Only the latest request of a group may touch the state it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestGroup {
    Session,
    Directory,
    Receipts,
    Feed(FeedTab),
    Board,
    Detail,
}

#[derive(Default)]
pub struct RequestCoordinator {
    next_token: u64,
    current: HashMap<RequestGroup, RequestToken>,
    handles: HashMap<RequestGroup, AbortHandle>,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the token for a new request in `group`, cancelling whatever was in flight there.
    pub fn begin(&mut self, group: RequestGroup) -> RequestToken {
        self.cancel(group);
        self.next_token += 1;
        let token = RequestToken(self.next_token);
        self.current.insert(group, token);
        token
    }

    /// Associates the spawned task with its token so a later `begin` can abort it.
    pub fn attach(&mut self, group: RequestGroup, token: RequestToken, handle: AbortHandle) {
        if self.current.get(&group) == Some(&token) {
            self.handles.insert(group, handle);
        } else {
            handle.abort();
        }
    }

    pub fn cancel(&mut self, group: RequestGroup) -> bool {
        let Some(token) = self.current.remove(&group) else {
            return false;
        };
        if let Some(handle) = self.handles.remove(&group) {
            handle.abort();
        }
        debug!(?group, token = token.0, "cancelled in-flight request");
        true
    }

    /// Claims a response. Only the current token of its group is accepted, and only once.
    pub fn accept(&mut self, group: RequestGroup, token: RequestToken) -> bool {
        if self.current.get(&group) != Some(&token) {
            debug!(?group, token = token.0, "discarding superseded response");
            return false;
        }
        self.current.remove(&group);
        self.handles.remove(&group);
        true
    }

    pub fn is_loading(&self, group: RequestGroup) -> bool {
        self.current.contains_key(&group)
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_empty()
    }
}
