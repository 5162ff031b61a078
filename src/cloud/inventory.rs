//! Static address inventory
//!
//! Fixed name → addresses map loaded from configuration. Useful for local
//! clusters where nodes are not cloud instances.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use async_trait::async_trait;

use crate::controller::AuthorityResolver;
use crate::{Error, Result};

/// Resolver over a fixed inventory
#[derive(Clone, Debug, Default)]
pub struct StaticInventory {
    instances: BTreeMap<String, HashSet<IpAddr>>,
}

impl StaticInventory {
    /// Create an inventory from instance name → addresses
    pub fn new(instances: BTreeMap<String, Vec<IpAddr>>) -> Self {
        Self {
            instances: instances
                .into_iter()
                .map(|(name, ips)| (name, ips.into_iter().map(|ip| ip.to_canonical()).collect()))
                .collect(),
        }
    }

    /// Number of instances in the inventory
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the inventory has no instances
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl AuthorityResolver for StaticInventory {
    async fn resolve_addresses(&self, instance_name: &str) -> Result<HashSet<IpAddr>> {
        self.instances
            .get(instance_name)
            .cloned()
            .ok_or_else(|| Error::not_found(instance_name))
    }
}
