//! HTTP client for the Duffy pool API.
//!
//! All endpoints are plain `GET` requests authenticated by a `key` query
//! parameter. Allocation failures come back as free text rather than JSON,
//! which is how exhaustion is told apart from a malformed response.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::PoolConfig;

use super::{HostLease, InventoryEntry, Pool, PoolError, PoolFuture, PoolRequest, SessionToken};

const NODE_GET: &str = "/Node/get";
const NODE_DONE: &str = "/Node/done";
const INVENTORY: &str = "/Inventory";

/// Pool client backed by the Duffy REST API.
#[derive(Clone, Debug)]
pub struct DuffyPool {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct NodeGetResponse {
    hosts: Vec<String>,
    ssid: String,
}

impl DuffyPool {
    /// Creates a client from configuration, resolving the API key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::config::ConfigError`] when the key cannot be resolved.
    pub fn new(config: &PoolConfig) -> Result<Self, crate::config::ConfigError> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::with_api_key(&config.api_url, api_key))
    }

    /// Creates a client for `base_url` using an explicit key.
    #[must_use]
    pub fn with_api_key(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    async fn call(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, PoolError> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!(%url, ?params, "pool API request");

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|err| PoolError::Transport {
                endpoint: endpoint.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| PoolError::Transport {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(PoolError::Status {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn acquire_host(&self, request: &PoolRequest) -> Result<HostLease, PoolError> {
        let body = self
            .call(
                NODE_GET,
                &[
                    ("ver", request.version.as_str()),
                    ("arch", request.arch.as_str()),
                ],
            )
            .await?;
        let lease = parse_node_get(&body)?;
        info!(
            hostname = %lease.hostname,
            token = %lease.token,
            "host provisioning successful"
        );
        Ok(lease)
    }

    async fn release_host(&self, token: &SessionToken) -> Result<(), PoolError> {
        self.call(NODE_DONE, &[("ssid", token.as_str())]).await?;
        info!(%token, "host marked as done");
        Ok(())
    }

    async fn inventory(&self) -> Result<Vec<InventoryEntry>, PoolError> {
        let body = self.call(INVENTORY, &[]).await?;
        parse_inventory(&body)
    }
}

impl Pool for DuffyPool {
    type Error = PoolError;

    fn acquire<'a>(
        &'a self,
        request: &'a PoolRequest,
    ) -> PoolFuture<'a, HostLease, Self::Error> {
        Box::pin(self.acquire_host(request))
    }

    fn release<'a>(&'a self, token: &'a SessionToken) -> PoolFuture<'a, (), Self::Error> {
        Box::pin(self.release_host(token))
    }

    fn list_active(&self) -> PoolFuture<'_, Vec<InventoryEntry>, Self::Error> {
        Box::pin(self.inventory())
    }
}

pub(super) fn parse_node_get(body: &str) -> Result<HostLease, PoolError> {
    if !body.trim_start().starts_with('{') {
        return Err(PoolError::Exhausted {
            message: body.trim().to_owned(),
        });
    }

    let response: NodeGetResponse =
        serde_json::from_str(body).map_err(|err| PoolError::Parse {
            endpoint: NODE_GET.to_owned(),
            message: err.to_string(),
        })?;

    let Some(hostname) = response.hosts.into_iter().next() else {
        return Err(PoolError::Exhausted {
            message: String::from("allocation returned no hosts"),
        });
    };

    Ok(HostLease {
        hostname,
        token: SessionToken::new(response.ssid),
    })
}

pub(super) fn parse_inventory(body: &str) -> Result<Vec<InventoryEntry>, PoolError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|err| PoolError::Parse {
        endpoint: INVENTORY.to_owned(),
        message: err.to_string(),
    })?;

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let token = row
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| PoolError::Parse {
                    endpoint: INVENTORY.to_owned(),
                    message: format!("entry {index} has no session token at position 1"),
                })?;
            Ok(InventoryEntry {
                hostname: row.first().map(render_column).unwrap_or_default(),
                token: SessionToken::new(token),
            })
        })
        .collect()
}

// Only the token column is load-bearing; deployments differ on what the
// first column holds.
fn render_column(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
