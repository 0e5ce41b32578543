//! Thin HTTP clients for the remote fleet API.
//!
//! All three clients share one `reqwest::Client` (built once at startup via
//! [`build_client`]) so connection pooling and the request timeout are
//! uniform across price, resource and statistic calls. `ResourceClient` and
//! `StatClient` append `?token=...`; `PriceClient` does not — the price list
//! is unauthenticated in the remote API.

#![forbid(unsafe_code)]

use autoscale_proto::{Price, PostResource, Resource, ResourceType, Stat};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url} returned status {status}")]
    Status {
        method: &'static str,
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode response body from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Builds the one shared client every `*Client` in this crate is constructed with.
pub fn build_client(request_timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(request_timeout_secs))
        .build()
        .expect("failed to build HTTP client")
}

// ─── PriceClient ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PriceClient {
    client: reqwest::Client,
    host: String,
}

impl PriceClient {
    pub fn new(client: reqwest::Client, host: impl Into<String>) -> Self {
        Self { client, host: host.into() }
    }

    pub async fn list(&self) -> ClientResult<Vec<Price>> {
        let url = format!("{}/api/price", self.host);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;

        let resp = check_status("GET", &url, resp)?;
        let prices: Vec<Price> = resp
            .json()
            .await
            .map_err(|source| ClientError::Decode { url: url.clone(), source })?;

        info!(count = prices.len(), "listed prices");
        Ok(prices)
    }

    /// `list`, grouped by [`ResourceType`] for per-type planning.
    pub async fn grouped(&self) -> ClientResult<HashMap<ResourceType, Vec<Price>>> {
        let prices = self.list().await?;
        let mut out: HashMap<ResourceType, Vec<Price>> = HashMap::new();
        for t in ResourceType::ALL {
            out.insert(t, Vec::new());
        }
        for price in prices {
            out.entry(price.kind).or_default().push(price);
        }
        Ok(out)
    }
}

// ─── ResourceClient ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceClient {
    client: reqwest::Client,
    host: String,
    token: String,
}

impl ResourceClient {
    pub fn new(client: reqwest::Client, host: impl Into<String>, token: impl Into<String>) -> Self {
        Self { client, host: host.into(), token: token.into() }
    }

    pub async fn list(&self) -> ClientResult<Vec<Resource>> {
        let url = format!("{}/api/resource", self.host);
        let resp = self
            .client
            .get(&url)
            .query(&[("token", &self.token)])
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;

        let resp = check_status("GET", &url, resp)?;
        let pods: Vec<Resource> = resp
            .json()
            .await
            .map_err(|source| ClientError::Decode { url: url.clone(), source })?;

        info!(count = pods.len(), "listed fleet");
        Ok(pods)
    }

    pub async fn create(&self, post: &PostResource) -> ClientResult<()> {
        let url = format!("{}/api/resource", self.host);
        let resp = self
            .client
            .post(&url)
            .query(&[("token", &self.token)])
            .json(post)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        check_status("POST", &url, resp)?;
        info!(cpu = post.cpu, ram = post.ram, kind = %post.kind, "created pod");
        Ok(())
    }

    pub async fn update(&self, id: &str, post: &PostResource) -> ClientResult<()> {
        let url = format!("{}/api/resource/{id}", self.host);
        let resp = self
            .client
            .put(&url)
            .query(&[("token", &self.token)])
            .json(post)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        check_status("PUT", &url, resp)?;
        info!(id, cpu = post.cpu, ram = post.ram, "resized pod");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> ClientResult<()> {
        let url = format!("{}/api/resource/{id}", self.host);
        let resp = self
            .client
            .delete(&url)
            .query(&[("token", &self.token)])
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        check_status("DELETE", &url, resp)?;
        info!(id, "deleted pod");
        Ok(())
    }
}

// ─── StatClient ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StatClient {
    client: reqwest::Client,
    host: String,
    token: String,
}

impl StatClient {
    pub fn new(client: reqwest::Client, host: impl Into<String>, token: impl Into<String>) -> Self {
        Self { client, host: host.into(), token: token.into() }
    }

    /// Any failure (transport, non-2xx, bad body) is swallowed into `Ok(None)`
    /// — a missing sample just skips this tick's stats update, it never fails
    /// the tick on its own.
    pub async fn get(&self) -> Option<Stat> {
        let url = format!("{}/api/statistic", self.host);
        let resp = match self.client.get(&url).query(&[("token", &self.token)]).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, url, "statistic fetch failed");
                return None;
            }
        };

        let resp = match resp.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, url, "statistic endpoint returned an error status");
                return None;
            }
        };

        match resp.json::<Stat>().await {
            Ok(stat) => {
                info!(requests = stat.requests, "fetched statistic sample");
                Some(stat)
            }
            Err(e) => {
                warn!(error = %e, url, "failed to decode statistic body");
                None
            }
        }
    }
}

fn check_status(method: &'static str, url: &str, resp: reqwest::Response) -> ClientResult<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status();
        warn!(method, url, %status, "remote API call failed");
        Err(ClientError::Status { method, url: url.to_string(), status })
    }
}
