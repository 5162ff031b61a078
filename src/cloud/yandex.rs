//! Yandex Cloud Compute address resolver
//!
//! Looks instances up by exact name within one folder. Asking for two results
//! is enough to tell "exactly one" from "ambiguous".

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::iam::TokenProvider;
use crate::controller::AuthorityResolver;
use crate::{Error, Result};

/// Default Compute API endpoint
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.api.cloud.yandex.net";

/// Page size for the name lookup; two is enough to detect duplicates
const LOOKUP_PAGE_SIZE: &str = "2";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListInstancesResponse {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    id: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    primary_v4_address: Option<PrimaryAddress>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrimaryAddress {
    address: String,
    one_to_one_nat: Option<OneToOneNat>,
}

#[derive(Debug, Default, Deserialize)]
struct OneToOneNat {
    #[serde(default)]
    address: String,
}

/// Resolver backed by the Yandex Cloud Compute API
pub struct YandexResolver {
    folder_id: String,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    http: reqwest::Client,
}

impl YandexResolver {
    /// Create a resolver for instances in `folder_id`
    pub fn new(
        folder_id: impl Into<String>,
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            folder_id: folder_id.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
            http: reqwest::Client::new(),
        }
    }

    async fn list_by_name(&self, instance_name: &str) -> Result<ListInstancesResponse> {
        let token = self.tokens.token().await?;
        let filter = format!("name = \"{}\"", instance_name);

        self.http
            .get(format!("{}/compute/v1/instances", self.endpoint))
            .bearer_auth(token)
            .query(&[
                ("folderId", self.folder_id.as_str()),
                ("pageSize", LOOKUP_PAGE_SIZE),
                ("filter", filter.as_str()),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::transport(format!("instance lookup failed: {}", e)))?
            .json::<ListInstancesResponse>()
            .await
            .map_err(|e| Error::transport(format!("invalid instance list response: {}", e)))
    }
}

/// Whether a name can be embedded in a filter expression as a quoted literal
fn is_filter_safe(instance_name: &str) -> bool {
    !instance_name.contains(['"', '\\'])
}

/// Primary IPv4 addresses and their one-to-one NAT addresses
fn instance_addresses(instance: &Instance) -> HashSet<IpAddr> {
    let mut addresses = HashSet::new();
    for iface in &instance.network_interfaces {
        let Some(primary) = &iface.primary_v4_address else {
            continue;
        };
        let nat = primary
            .one_to_one_nat
            .as_ref()
            .map(|nat| nat.address.as_str())
            .filter(|a| !a.is_empty());

        for raw in std::iter::once(primary.address.as_str()).chain(nat) {
            match raw.parse::<IpAddr>() {
                Ok(ip) => {
                    addresses.insert(ip.to_canonical());
                }
                Err(_) => warn!(instance_id = %instance.id, address = %raw, "Ignoring unparsable instance address"),
            }
        }
    }
    addresses
}

#[async_trait]
impl AuthorityResolver for YandexResolver {
    async fn resolve_addresses(&self, instance_name: &str) -> Result<HashSet<IpAddr>> {
        if !is_filter_safe(instance_name) {
            return Err(Error::not_found(instance_name));
        }

        let response = self.list_by_name(instance_name).await?;
        match response.instances.as_slice() {
            [] => Err(Error::not_found(instance_name)),
            [instance] => {
                let addresses = instance_addresses(instance);
                debug!(
                    instance = %instance_name,
                    instance_id = %instance.id,
                    addresses = ?addresses,
                    "Resolved instance addresses"
                );
                Ok(addresses)
            }
            many => Err(Error::ambiguous(instance_name, many.len())),
        }
    }
}
