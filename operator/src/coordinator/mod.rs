//! Cross-resource health reconciliation for one namespace, run periodically
//! from the Cluster reconciler once a cluster has been Running and stable.
//! Inspects every Topology and WorkerPool and nudges anything whose recorded
//! status appears to have drifted from what Storm (or the Deployment
//! subresource) actually reports. Failures here are logged, never propagated
//! to the caller.

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    client::Client,
};
use serde_json::json;
use std::sync::Arc;
use stormop_types::{Topology, TopologyPhase, WorkerPool};

use crate::storm::{ClientManager, client::TopologyStatus as StormTopologyStatus};
use crate::util::{Error, MANAGER_NAME};

pub async fn reconcile_namespace(
    client: Client,
    namespace: &str,
    storm_clients: Arc<ClientManager>,
) -> Result<(), Error> {
    let topology_api: Api<Topology> = Api::namespaced(client.clone(), namespace);
    let topologies = topology_api.list(&Default::default()).await?;

    for topology in &topologies.items {
        if let Err(e) = check_topology(&client, namespace, topology, &storm_clients).await {
            eprintln!(
                "coordinator: failed checking topology '{namespace}/{}': {e}",
                topology.name_any()
            );
        }
    }

    let pool_api: Api<WorkerPool> = Api::namespaced(client.clone(), namespace);
    let pools = pool_api.list(&Default::default()).await?;
    for pool in &pools.items {
        if let Err(e) = check_workerpool(&client, namespace, pool).await {
            eprintln!(
                "coordinator: failed checking workerpool '{namespace}/{}': {e}",
                pool.name_any()
            );
        }
    }

    Ok(())
}

/// Touches a resource with a no-op annotation patch, which bumps its
/// resourceVersion and causes the owning controller's watch to re-enqueue it.
async fn nudge<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>
        + kube::Resource<Scope = kube::core::NamespaceResourceScope>,
{
    let patch = json!({
        "metadata": {
            "annotations": {
                "storm.stormop.io/coordinator-touched": chrono::Utc::now().to_rfc3339(),
            }
        }
    });
    api.patch(name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn check_topology(
    client: &Client,
    namespace: &str,
    topology: &Topology,
    storm_clients: &ClientManager,
) -> Result<(), Error> {
    let Some(status) = &topology.status else {
        return Ok(());
    };
    if status.phase != TopologyPhase::Running {
        return Ok(());
    }
    let Some(storm) = storm_clients
        .get_client(namespace, &topology.spec.cluster_name)
        .await
    else {
        return Ok(());
    };

    let drifted = match storm.get_topology(&topology.spec.name).await {
        Ok(detail) => !matches!(detail.status, StormTopologyStatus::Active),
        Err(e) if e.is_absence() => true,
        Err(_) => false,
    };

    if drifted {
        let api: Api<Topology> = Api::namespaced(client.clone(), namespace);
        nudge(&api, &topology.name_any()).await?;
    }
    Ok(())
}

async fn check_workerpool(client: &Client, namespace: &str, pool: &WorkerPool) -> Result<(), Error> {
    let Some(status) = &pool.status else {
        return Ok(());
    };
    if status.desired_replicas != pool.spec.replicas {
        let api: Api<WorkerPool> = Api::namespaced(client.clone(), namespace);
        nudge(&api, &pool.name_any()).await?;
    }
    Ok(())
}
