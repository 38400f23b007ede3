use kube::{Client, Resource};
use std::sync::Arc;

use crate::jar::JarCache;
use crate::storm::ClientManager;
use crate::util::{Error, messages, patch::patch_status};
use stormop_types::{Topology, TopologyPhase, TopologyState};

pub async fn resolve_jar(
    client: Client,
    topology: &Topology,
    cache: Arc<JarCache>,
) -> Result<String, Error> {
    let namespace = topology.meta().namespace.clone().unwrap_or_default();
    let name = topology.spec.name.clone();
    let owner_ref = topology
        .controller_owner_ref(&())
        .expect("topology has name/uid");
    crate::jar::source::resolve(
        client,
        &namespace,
        &name,
        &topology.spec.jar_source,
        cache,
        owner_ref,
    )
    .await
}

pub async fn set_state(
    client: Client,
    topology: &Topology,
    phase: TopologyPhase,
    internal_state: TopologyState,
    message: impl Into<String>,
) -> Result<(), Error> {
    let message = message.into();
    patch_status(client, topology, |status: &mut stormop_types::TopologyStatus| {
        status.phase = phase;
        status.internal_state = internal_state;
        status.message = Some(message);
        let ready = phase == TopologyPhase::Running;
        stormop_types::set_condition(
            &mut status.conditions,
            stormop_types::condition_types::READY,
            ready,
            if ready { "TopologyRunning" } else { "TopologyNotRunning" },
            format!("Topology is in phase {phase}"),
            None,
        );
    })
    .await?;
    Ok(())
}

pub async fn mark_failed(client: Client, topology: &Topology, message: impl Into<String>) -> Result<(), Error> {
    let message = message.into();
    patch_status(client, topology, |status: &mut stormop_types::TopologyStatus| {
        status.phase = TopologyPhase::Failed;
        status.internal_state = TopologyState::Failed;
        status.last_error = Some(message.clone());
        status.message = Some(message);
    })
    .await?;
    Ok(())
}

pub async fn record_submission(
    client: Client,
    topology: &Topology,
    version: &str,
    topology_id: Option<String>,
) -> Result<(), Error> {
    let version = version.to_string();
    patch_status(client, topology, |status: &mut stormop_types::TopologyStatus| {
        status.phase = TopologyPhase::Running;
        status.internal_state = TopologyState::Running;
        status.deployed_version = Some(version);
        status.topology_id = topology_id;
        status.message = Some(messages::AWAITING_DEPENDENCY.to_string());
        status.last_error = None;
    })
    .await?;
    Ok(())
}

pub async fn refresh_health(
    client: Client,
    topology: &Topology,
    storm_clients: &ClientManager,
    cluster_namespace: &str,
    cluster_name: &str,
) -> Result<(), Error> {
    let Some(storm) = storm_clients.get_client(cluster_namespace, cluster_name).await else {
        return Ok(());
    };
    let Ok(detail) = storm.get_topology(&topology.spec.name).await else {
        return Ok(());
    };
    patch_status(client, topology, |status: &mut stormop_types::TopologyStatus| {
        status.workers = detail.workers;
        status.executors = detail.executors;
        status.tasks = detail.tasks;
        status.uptime_secs = detail.uptime_secs;
    })
    .await?;
    Ok(())
}
