use serde::{Deserialize, Serialize};

use crate::models::{CommunityId, ItemId};

// Tabs of the main feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedTab {
    #[default]
    Latest,
    Subscribed,
    Activity,
}

impl FeedTab {
    pub const ALL: [FeedTab; 3] = [FeedTab::Latest, FeedTab::Subscribed, FeedTab::Activity];

    pub fn label(&self) -> &'static str {
        match self {
            FeedTab::Latest => "Latest",
            FeedTab::Subscribed => "Subscribed",
            FeedTab::Activity => "My activity",
        }
    }

    /// Subscriptions and personal activity only exist for a signed-in viewer.
    pub fn needs_session(&self) -> bool {
        !matches!(self, FeedTab::Latest)
    }
}

/// Where an item detail screen was opened from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    MainFeed,
    CommunityBoard(CommunityId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    MainFeed { tab: FeedTab },
    CommunityBoard { community_id: CommunityId },
    ItemDetail { item_id: ItemId, origin: Origin },
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState::MainFeed {
            tab: FeedTab::default(),
        }
    }
}

impl ViewState {
    pub fn name(&self) -> &'static str {
        match self {
            ViewState::MainFeed { .. } => "main-feed",
            ViewState::CommunityBoard { .. } => "community-board",
            ViewState::ItemDetail { .. } => "item-detail",
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            ViewState::ItemDetail { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    pub fn community_id(&self) -> Option<&str> {
        match self {
            ViewState::CommunityBoard { community_id } => Some(community_id),
            _ => None,
        }
    }

    /// Origin recorded for an item opened from this view.
    pub fn origin_for_child(&self) -> Origin {
        match self {
            ViewState::MainFeed { .. } => Origin::MainFeed,
            ViewState::CommunityBoard { community_id } => {
                Origin::CommunityBoard(community_id.clone())
            }
            ViewState::ItemDetail { origin, .. } => origin.clone(),
        }
    }

    /// View that "back" lands on when there is no history entry to pop.
    pub fn back_target(&self, tab: FeedTab) -> Option<ViewState> {
        match self {
            ViewState::MainFeed { .. } => None,
            ViewState::CommunityBoard { .. } => Some(ViewState::MainFeed { tab }),
            ViewState::ItemDetail { origin, .. } => Some(match origin {
                Origin::MainFeed => ViewState::MainFeed { tab },
                Origin::CommunityBoard(community_id) => ViewState::CommunityBoard {
                    community_id: community_id.clone(),
                },
            }),
        }
    }

    pub fn needs_session(&self) -> bool {
        match self {
            ViewState::MainFeed { tab } => tab.needs_session(),
            ViewState::CommunityBoard { .. } => false,
            ViewState::ItemDetail { .. } => true,
        }
    }
}
