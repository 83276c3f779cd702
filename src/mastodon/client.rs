// Mastodon API client: authenticated REST calls and hashtag streaming.
//
// A thin reqwest wrapper with generic GET/POST helpers, in the same shape
// as the rest of the crate's HTTP clients. The access token is an existing
// user token; app registration and the OAuth dance are done elsewhere.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, Instrument};

use super::models::{Account, Context, Relationship, Status};
use super::rate_limiter::RateLimiter;
use super::streaming;
use crate::pipeline::traits::{Subscription, Upstream};

/// Buffer between a streaming listener and whoever consumes its events.
const STREAM_EVENT_BUFFER: usize = 10;

/// Authenticated client for a single Mastodon instance.
pub struct MastodonClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    rate_limiter: RateLimiter,
}

impl MastodonClient {
    /// Create a client for `instance_url` (e.g. `https://mastodon.social`).
    pub fn new(instance_url: &str, access_token: &str, requests_per_second: f64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tagrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: instance_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            rate_limiter: RateLimiter::new(requests_per_second),
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// GET an API path (e.g. `/api/v1/statuses/1/context`) and deserialize the body.
    pub async fn api_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        self.rate_limiter.acquire().await;
        let url = format!("{}{}", self.base_url, path);

        debug!(path = path, "API GET request");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.bearer())
            .query(params)
            .send()
            .await
            .with_context(|| format!("API request failed: GET {path}"))?;

        decode_response(path, response).await
    }

    /// POST to an API path with no body and deserialize the response.
    pub async fn api_post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.rate_limiter.acquire().await;
        let url = format!("{}{}", self.base_url, path);

        debug!(path = path, "API POST request");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await
            .with_context(|| format!("API request failed: POST {path}"))?;

        decode_response(path, response).await
    }

    /// Look up the account that owns the access token.
    pub async fn verify_credentials(&self) -> Result<Account> {
        self.api_get("/api/v1/accounts/verify_credentials", &[])
            .await
            .context("Failed to verify account credentials")
    }

    /// Reblog (boost) a status as our account.
    pub async fn reblog(&self, status_id: &str) -> Result<Status> {
        self.api_post(&format!("/api/v1/statuses/{status_id}/reblog"))
            .await
            .with_context(|| format!("Failed to reblog status {status_id}"))
    }
}

async fn decode_response<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API {path} returned {status}: {body}");
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to deserialize {path} response"))
}

#[async_trait]
impl Upstream for MastodonClient {
    async fn subscribe(&self, tag: &str, stop: watch::Receiver<bool>) -> Result<Subscription> {
        let url = format!("{}/api/v1/streaming/hashtag", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.bearer())
            .header(ACCEPT, "text/event-stream")
            .query(&[("tag", tag)])
            .send()
            .await
            .with_context(|| format!("Failed to open stream for #{tag}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Streaming #{tag} returned {status}: {body}");
        }

        info!(tag = tag, "Stream opened");

        let (events_tx, events_rx) = mpsc::channel(STREAM_EVENT_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();
        let span = tracing::info_span!("listener", tag = tag);
        tokio::spawn(
            streaming::listen(tag.to_string(), response, events_tx, stop, done_tx).instrument(span),
        );

        Ok(Subscription::new(tag, events_rx, done_rx))
    }

    async fn status_context(&self, status_id: &str) -> Result<Context> {
        self.api_get(&format!("/api/v1/statuses/{status_id}/context"), &[])
            .await
            .with_context(|| format!("Failed to fetch context of status {status_id}"))
    }

    async fn relationship(&self, account_id: &str) -> Result<Relationship> {
        let relationships: Vec<Relationship> = self
            .api_get("/api/v1/accounts/relationships", &[("id[]", account_id)])
            .await
            .with_context(|| format!("Failed to fetch relationship with account {account_id}"))?;

        relationships
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Account {account_id} not known, got empty result"))
    }

    async fn current_account(&self) -> Result<Account> {
        self.verify_credentials().await
    }
}
