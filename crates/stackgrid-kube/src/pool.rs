//! One cluster client per zone.

use std::collections::HashMap;
use std::sync::Arc;

use stackgrid_core::{RegionsConfig, DEFAULT_ZONE, MULTI_ZONE};
use tracing::info;

use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use crate::kube_client::KubeCluster;

/// Maps zone identifiers to cluster clients. Built once at startup.
#[derive(Clone)]
pub struct RegionClientPool {
    default_zone: String,
    clients: HashMap<String, Arc<dyn ClusterClient>>,
}

impl RegionClientPool {
    pub fn new(default_zone: impl Into<String>, clients: HashMap<String, Arc<dyn ClusterClient>>) -> Self {
        Self {
            default_zone: default_zone.into(),
            clients,
        }
    }

    /// Connect to every configured zone.
    pub async fn connect(regions: &RegionsConfig) -> ClusterResult<Self> {
        let mut clients: HashMap<String, Arc<dyn ClusterClient>> = HashMap::new();
        for (zone, config) in &regions.zones {
            let client = KubeCluster::connect(config).await?;
            info!(%zone, context = ?config.context, "connected to zone cluster");
            clients.insert(zone.clone(), Arc::new(client));
        }
        Ok(Self::new(regions.default_zone.clone(), clients))
    }

    /// Map the `default` sentinel to the configured zone. `multi` is rejected.
    pub fn resolve_zone<'a>(&'a self, zone: &'a str) -> ClusterResult<&'a str> {
        match zone {
            DEFAULT_ZONE => Ok(&self.default_zone),
            MULTI_ZONE => Err(ClusterError::UnsupportedZone(zone.to_string())),
            other => Ok(other),
        }
    }

    pub fn client(&self, zone: &str) -> ClusterResult<Arc<dyn ClusterClient>> {
        let resolved = self.resolve_zone(zone)?;
        self.clients
            .get(resolved)
            .cloned()
            .ok_or_else(|| ClusterError::ZoneNotFound(resolved.to_string()))
    }

    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCluster;
    use stackgrid_core::{Classify, ErrorKind};

    fn pool() -> RegionClientPool {
        let mut clients: HashMap<String, Arc<dyn ClusterClient>> = HashMap::new();
        clients.insert("eu-west".into(), Arc::new(MemoryCluster::new()));
        clients.insert("us-east".into(), Arc::new(MemoryCluster::new()));
        RegionClientPool::new("eu-west", clients)
    }

    #[test]
    fn default_resolves_to_configured_zone() {
        let pool = pool();
        assert_eq!(pool.resolve_zone("default").unwrap(), "eu-west");
        assert!(pool.client("default").is_ok());
        assert!(pool.client("us-east").is_ok());
    }

    #[test]
    fn multi_is_bad_request() {
        let err = pool().client("multi").err().unwrap();
        assert!(matches!(err, ClusterError::UnsupportedZone(_)));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn unknown_zone_is_not_found() {
        let err = pool().client("ap-south").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
