use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{client::StormClient, rest::RestStormClient};

/// Endpoint coordinates a cluster reconciler resolves once Nimbus/UI
/// become reachable.
#[derive(Debug, Clone)]
pub struct StormEndpoint {
    pub ui_base_url: String,
}

/// Holds at most one active client per managed cluster, keyed by
/// `namespace/name`. Process-wide singleton: the operator watches many
/// clusters concurrently, so this is a map rather than a single
/// `Option<Arc<dyn StormClient>>>`.
#[derive(Default)]
pub struct ClientManager {
    clients: RwLock<HashMap<String, Arc<dyn StormClient>>>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces (or installs) the client for a cluster with one resolved
    /// against `endpoint`. Called when a cluster reconciler observes Nimbus
    /// becoming ready.
    pub async fn update_client(&self, namespace: &str, name: &str, endpoint: StormEndpoint) {
        let client: Arc<dyn StormClient> = Arc::new(RestStormClient::new(endpoint.ui_base_url));
        self.clients
            .write()
            .await
            .insert(key(namespace, name), client);
    }

    pub async fn get_client(&self, namespace: &str, name: &str) -> Option<Arc<dyn StormClient>> {
        self.clients.read().await.get(&key(namespace, name)).cloned()
    }

    pub async fn has_client(&self, namespace: &str, name: &str) -> bool {
        self.clients.read().await.contains_key(&key(namespace, name))
    }

    /// Removes and closes the client for a cluster. Called during a
    /// cluster's deletion handling.
    pub async fn remove_client(&self, namespace: &str, name: &str) {
        let removed = self.clients.write().await.remove(&key(namespace, name));
        if let Some(client) = removed {
            let _ = client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_cluster_has_no_client() {
        let mgr = ClientManager::new();
        assert!(!mgr.has_client("ns", "c1").await);
        assert!(mgr.get_client("ns", "c1").await.is_none());
    }

    #[tokio::test]
    async fn update_then_remove_round_trips() {
        let mgr = ClientManager::new();
        mgr.update_client(
            "ns",
            "c1",
            StormEndpoint {
                ui_base_url: "http://c1-ui.ns.svc.cluster.local:8080".to_string(),
            },
        )
        .await;
        assert!(mgr.has_client("ns", "c1").await);
        mgr.remove_client("ns", "c1").await;
        assert!(!mgr.has_client("ns", "c1").await);
    }
}
