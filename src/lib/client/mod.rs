//! HTTP client for the network's account and transaction endpoints.

mod types;

pub use types::*;

use crate::shard::Address;
use crate::SignedTransaction;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Proxy};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Hosts whose requests are routed through a forward proxy.
pub const DEFAULT_PROXIED_HOSTS: &str = r"^https?://wallet-api\.elrond\.com";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid proxy {proxy}: {source}")]
    Proxy {
        proxy: String,
        source: reqwest::Error,
    },

    #[error("unexpected response from {url} (HTTP {status}): {reason}")]
    Decode {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    /// The remote answered and refused the transaction, as opposed to the
    /// request not getting through.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Rejected(_))
    }
}

/// The two remote operations the broadcast engine depends on.
#[async_trait]
pub trait SubmissionClient: Send + Sync + 'static {
    async fn fetch_account(
        &self,
        host: &str,
        address: &Address,
        proxy: Option<&str>,
    ) -> Result<Account, ClientError>;

    /// Returns the transaction hash assigned by the remote.
    async fn submit_transaction(
        &self,
        host: &str,
        transaction: &SignedTransaction,
        proxy: Option<&str>,
    ) -> Result<String, ClientError>;

    /// Whether requests to `host` go through a proxy when one is supplied.
    fn routes_through_proxy(&self, _host: &str) -> bool {
        false
    }
}

pub struct HttpSubmissionClient {
    direct: Client,
    proxied: RwLock<HashMap<String, Client>>,
    proxied_hosts: Regex,
    timeout: Duration,
}

impl HttpSubmissionClient {
    pub fn new(timeout: Duration, proxied_hosts: Regex) -> Result<Self, reqwest::Error> {
        let direct = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            direct,
            proxied: RwLock::new(HashMap::new()),
            proxied_hosts,
            timeout,
        })
    }

    /// Picks the client for a request: a cached proxied client when the URL
    /// matches the proxied-host pattern and a proxy was chosen, else the direct one.
    async fn client_for(&self, url: &str, proxy: Option<&str>) -> Result<Client, ClientError> {
        let proxy = match proxy {
            Some(proxy) if self.proxied_hosts.is_match(url) => proxy,
            _ => return Ok(self.direct.clone()),
        };

        if let Some(client) = self.proxied.read().await.get(proxy) {
            return Ok(client.clone());
        }

        let proxy_error = |source| ClientError::Proxy {
            proxy: proxy.to_string(),
            source,
        };
        // certificate checks are off for the proxied hop only
        let client = Client::builder()
            .timeout(self.timeout)
            .proxy(Proxy::all(proxy).map_err(proxy_error)?)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(proxy_error)?;

        debug!(proxy, url, "created proxied HTTP client");
        self.proxied
            .write()
            .await
            .insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ClientError::Decode {
        url: url.to_string(),
        status,
        reason: e.to_string(),
    })
}

#[async_trait]
impl SubmissionClient for HttpSubmissionClient {
    async fn fetch_account(
        &self,
        host: &str,
        address: &Address,
        proxy: Option<&str>,
    ) -> Result<Account, ClientError> {
        let url = format!("{}/address/{}", host.trim_end_matches('/'), address);
        let response = self
            .client_for(&url, proxy)
            .await?
            .get(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .send()
            .await?;

        let body: AccountResponse = decode(&url, response).await?;
        Ok(body.account)
    }

    async fn submit_transaction(
        &self,
        host: &str,
        transaction: &SignedTransaction,
        proxy: Option<&str>,
    ) -> Result<String, ClientError> {
        let url = format!("{}/transaction/send", host.trim_end_matches('/'));
        let request = SendTransactionRequest::from(transaction);

        let response = self
            .client_for(&url, proxy)
            .await?
            .post(&url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body: SendTransactionResponse = decode(&url, response).await?;

        if body.tx_hash.is_empty() {
            let reason = if body.error.is_empty() {
                format!("no transaction hash returned (HTTP {})", status.as_u16())
            } else {
                body.error
            };
            return Err(ClientError::Rejected(reason));
        }

        Ok(body.tx_hash)
    }

    fn routes_through_proxy(&self, host: &str) -> bool {
        self.proxied_hosts.is_match(host)
    }
}
