use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::models::{
    Comment, Community, Item, NewComment, NewItem, PersonalActivity, ReadReceipt, Viewer,
};
use crate::service::DataService;

/// HTTP/JSON client for the board service.
pub struct BoardClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl BoardClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("campus_board/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.url(segments);
        debug!(%method, %url, "board service request");
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let response = self.request(Method::GET, segments).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let response = self
            .request(Method::POST, segments)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, method: Method, segments: &[&str]) -> Result<()> {
        self.request(method, segments).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl DataService for BoardClient {
    async fn current_viewer(&self) -> Result<Option<Viewer>> {
        let response = self.request(Method::GET, &["me"]).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let viewer = response.error_for_status()?.json().await?;
        Ok(Some(viewer))
    }

    async fn list_main_feed_items(&self) -> Result<Vec<Item>> {
        self.get_json(&["posts"]).await
    }

    async fn list_community_items(&self, community_id: &str) -> Result<Vec<Item>> {
        self.get_json(&["universities", community_id, "posts"]).await
    }

    async fn list_personal_activity(&self, viewer_id: &str) -> Result<PersonalActivity> {
        self.get_json(&["users", viewer_id, "activity"]).await
    }

    async fn get_item(&self, item_id: &str) -> Result<Item> {
        self.get_json(&["posts", item_id]).await
    }

    async fn list_comments(&self, item_id: &str) -> Result<Vec<Comment>> {
        self.get_json(&["posts", item_id, "comments"]).await
    }

    async fn create_item(&self, community_id: &str, payload: &NewItem) -> Result<Item> {
        self.post_json(&["universities", community_id, "posts"], payload).await
    }

    async fn create_comment(&self, item_id: &str, payload: &NewComment) -> Result<Comment> {
        self.post_json(&["posts", item_id, "comments"], payload).await
    }

    async fn mark_item_read(&self, item_id: &str) -> Result<()> {
        self.send_empty(Method::POST, &["posts", item_id, "read"]).await
    }

    async fn list_read_receipts(&self, viewer_id: &str) -> Result<Vec<ReadReceipt>> {
        self.get_json(&["users", viewer_id, "reads"]).await
    }

    async fn list_communities(&self) -> Result<Vec<Community>> {
        self.get_json(&["universities"]).await
    }

    async fn subscribe(&self, community_id: &str) -> Result<()> {
        self.send_empty(Method::POST, &["universities", community_id, "subscription"]).await
    }

    async fn unsubscribe(&self, community_id: &str) -> Result<()> {
        self.send_empty(Method::DELETE, &["universities", community_id, "subscription"]).await
    }
}
