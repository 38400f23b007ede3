use futures::stream::StreamExt;
use kube::{
    Api, Resource, ResourceExt,
    client::Client,
    runtime::{
        Controller,
        controller::Action,
        finalizer::{Event as FinalizerEvent, finalizer},
    },
};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use owo_colors::OwoColorize;
use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};
use std::time::Duration as StdDuration;
use stormop_types::{Cluster, ClusterPhase, CLUSTER_FINALIZER};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::kernel::StateMachine;
use crate::storm::ClientManager;
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

pub async fn run(client: Client, storm_clients: Arc<ClientManager>) -> Result<(), Error> {
    println!("{}", "Starting Cluster controller...".green());
    let context = Arc::new(ContextData::new(client.clone(), storm_clients));

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("storm-operator-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "storm-operator-clusters-lock".to_string(),
            lease_ttl: StdDuration::from_secs(15),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        stormop_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(StdDuration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("cluster leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if lease.acquired_lease {
            if controller_task.is_none() {
                println!("acquired leadership; starting cluster controller");
                let crd_api: Api<Cluster> = Api::all(client.clone());
                let owns_client = client.clone();
                let context = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 Cluster controller started.".green());
                    Controller::new(crd_api, Default::default())
                        .owns(
                            Api::<k8s_openapi::api::core::v1::ConfigMap>::all(owns_client.clone()),
                            Default::default(),
                        )
                        .owns(
                            Api::<k8s_openapi::api::apps::v1::StatefulSet>::all(owns_client.clone()),
                            Default::default(),
                        )
                        .owns(
                            Api::<k8s_openapi::api::apps::v1::Deployment>::all(owns_client.clone()),
                            Default::default(),
                        )
                        .owns(
                            Api::<k8s_openapi::api::core::v1::Service>::all(owns_client),
                            Default::default(),
                        )
                        .run(reconcile, on_error, context)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost cluster controller leadership; stopping controller");
            task.abort();
        }
    }
}

pub struct ContextData {
    pub client: Client,
    pub storm_clients: Arc<ClientManager>,
    stable_since: std::sync::Mutex<Option<std::time::Instant>>,
    coordinator_inflight: AtomicBool,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    pub fn new(client: Client, storm_clients: Arc<ClientManager>) -> Self {
        Self {
            client,
            storm_clients,
            stable_since: std::sync::Mutex::new(None),
            coordinator_inflight: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: ControllerMetrics::new("cluster"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ClusterEvent {
    Create,
    CreateComplete,
    CreateFailed,
    Unhealthy,
    Update,
    UpdateComplete,
    UpdateFailed,
    Recover,
    Terminate,
}

fn machine_for(phase: ClusterPhase) -> StateMachine<ClusterPhase, ClusterEvent> {
    use ClusterEvent::*;
    use ClusterPhase::*;
    let mut m = StateMachine::new(phase);
    m.add_transition(Unknown, Create, Pending)
        .add_transition(Pending, Create, Creating)
        .add_transition(Creating, CreateComplete, Running)
        .add_transition(Creating, CreateFailed, Failed)
        .add_transition(Running, Update, Updating)
        .add_transition(Running, Unhealthy, Failed)
        .add_transition(Running, Terminate, Terminating)
        .add_transition(Updating, UpdateComplete, Running)
        .add_transition(Updating, UpdateFailed, Failed)
        .add_transition(Failed, Recover, Pending)
        .add_transition(Failed, Terminate, Terminating);
    m
}

/// Cluster is healthy when nimbus ready meets replica count and supervisor
/// ready meets at least half (rounded up); missing replica counts default
/// to 1.
fn is_healthy(cluster: &Cluster) -> bool {
    let status = match &cluster.status {
        Some(s) => s,
        None => return false,
    };
    let nimbus_replicas = cluster.spec.nimbus.replicas.max(1);
    let supervisor_replicas = cluster.spec.supervisor.replicas.max(1);
    let supervisor_needed = (supervisor_replicas + 1) / 2;
    status.nimbus_ready >= nimbus_replicas && status.supervisor_ready >= supervisor_needed
}

/// Detects a spec change warranting redeploy: image or replica counts
/// differing from what was last recorded as reconciled generation.
fn spec_changed(cluster: &Cluster) -> bool {
    let status = match &cluster.status {
        Some(s) => s,
        None => return false,
    };
    match (status.observed_generation, cluster.meta().generation) {
        (Some(observed), Some(current)) => observed != current,
        _ => false,
    }
}

async fn reconcile(cluster: Arc<Cluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let api: Api<Cluster> = Api::namespaced(
        client.clone(),
        cluster.namespace().as_deref().unwrap_or("default"),
    );

    finalizer(&api, CLUSTER_FINALIZER, cluster, |event| async {
        match event {
            FinalizerEvent::Apply(cluster) => apply(cluster, context.clone()).await,
            FinalizerEvent::Cleanup(cluster) => cleanup(cluster, context.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

async fn apply(cluster: Arc<Cluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::UserInput("Cluster must be namespaced".to_string()))?;

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    let phase = cluster
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(ClusterPhase::Unknown);
    let mut machine = machine_for(phase);

    let event = determine_event(&client, &cluster).await?;
    let Some(event) = event else {
        maybe_run_coordinator(&cluster, &context).await;
        return Ok(Action::requeue(requeue_for(phase)));
    };

    println!(
        "🔧 {}{}{}{}{:?}",
        namespace.color(FG2),
        "/".color(FG1),
        name.color(FG2),
        " EVENT: ".color(FG1),
        event,
    );

    let new_phase = machine.process_event(event).map_err(|e| {
        Error::IllegalTransition(format!("cluster '{namespace}/{name}': {e}"))
    })?;

    match new_phase {
        ClusterPhase::Creating | ClusterPhase::Updating => {
            actions::reconcile_children(client.clone(), &cluster).await?;
            actions::set_phase(client.clone(), &cluster, new_phase, "reconciling children").await?;
            *context.stable_since.lock().unwrap() = None;
            Ok(Action::requeue(requeue_for(new_phase)))
        }
        ClusterPhase::Running => {
            refresh_status(client.clone(), &cluster, &context).await?;
            actions::set_phase(client.clone(), &cluster, new_phase, "cluster is running").await?;
            *context.stable_since.lock().unwrap() = Some(std::time::Instant::now());
            Ok(Action::requeue(requeue_for(new_phase)))
        }
        ClusterPhase::Pending => {
            actions::set_phase(client.clone(), &cluster, new_phase, "awaiting reconciliation").await?;
            Ok(Action::requeue(requeue_for(new_phase)))
        }
        ClusterPhase::Failed => {
            actions::set_phase(client.clone(), &cluster, new_phase, "cluster is unhealthy").await?;
            Ok(Action::requeue(requeue_for(new_phase)))
        }
        ClusterPhase::Terminating | ClusterPhase::Unknown => {
            Ok(Action::requeue(requeue_for(new_phase)))
        }
    }
}

async fn cleanup(cluster: Arc<Cluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    actions::terminating(client.clone(), &cluster).await?;
    context.storm_clients.remove_client(&namespace, &name).await;
    Ok(Action::await_change())
}

/// Event derivation is a pure function of spec, status, and live children,
/// independent of how many times it's called for the same inputs.
async fn determine_event(client: &Client, cluster: &Cluster) -> Result<Option<ClusterEvent>, Error> {
    let phase = cluster
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(ClusterPhase::Unknown);

    match phase {
        ClusterPhase::Unknown | ClusterPhase::Pending => Ok(Some(ClusterEvent::Create)),
        ClusterPhase::Creating | ClusterPhase::Updating => {
            if actions::children_exist(client.clone(), cluster).await? {
                Ok(Some(if phase == ClusterPhase::Creating {
                    ClusterEvent::CreateComplete
                } else {
                    ClusterEvent::UpdateComplete
                }))
            } else {
                Ok(None)
            }
        }
        ClusterPhase::Running => {
            if !is_healthy(cluster) {
                Ok(Some(ClusterEvent::Unhealthy))
            } else if spec_changed(cluster) {
                Ok(Some(ClusterEvent::Update))
            } else {
                Ok(None)
            }
        }
        ClusterPhase::Failed => Ok(Some(ClusterEvent::Recover)),
        ClusterPhase::Terminating => Ok(None),
    }
}

fn requeue_for(phase: ClusterPhase) -> StdDuration {
    match phase {
        ClusterPhase::Running => StdDuration::from_secs(60),
        ClusterPhase::Failed => StdDuration::from_secs(300),
        ClusterPhase::Creating | ClusterPhase::Updating => StdDuration::from_secs(5),
        ClusterPhase::Terminating => PROBE_INTERVAL,
        _ => StdDuration::from_secs(10),
    }
}

async fn refresh_status(client: Client, cluster: &Cluster, context: &ContextData) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let storm_client = context.storm_clients.get_client(&namespace, &name).await;

    let (used_slots, topology_count) = if let Some(storm) = storm_client {
        match storm.get_cluster_info().await {
            Ok(info) => (info.slots_used, info.topologies),
            Err(_) => (0, 0),
        }
    } else {
        (0, 0)
    };

    let total_slots = cluster.spec.supervisor.replicas.max(0) * cluster.spec.slots_per_supervisor.max(0);

    crate::util::patch::patch_status(client, cluster, |status: &mut stormop_types::ClusterStatus| {
        status.total_slots = total_slots;
        status.used_slots = used_slots;
        status.free_slots = (total_slots - used_slots).max(0);
        status.topology_count = topology_count;
        status.endpoints = stormop_types::ClusterEndpoints {
            nimbus: Some(format!(
                "{}.{namespace}.svc.cluster.local:6627",
                super::names::nimbus_service_name(cluster)
            )),
            ui: cluster.spec.ui.as_ref().map(|_| {
                format!(
                    "{}.{namespace}.svc.cluster.local:8080",
                    super::names::ui_service_name(cluster)
                )
            }),
            rest_api: cluster.spec.ui.as_ref().map(|_| {
                format!(
                    "http://{}.{namespace}.svc.cluster.local:8080",
                    super::names::ui_service_name(cluster)
                )
            }),
        };
    })
    .await?;
    Ok(())
}

async fn maybe_run_coordinator(cluster: &Cluster, context: &Arc<ContextData>) {
    let stable_since = *context.stable_since.lock().unwrap();
    let Some(stable_since) = stable_since else {
        return;
    };
    if stable_since.elapsed() < StdDuration::from_secs(30) {
        return;
    }
    if context.coordinator_inflight.swap(true, Ordering::SeqCst) {
        return;
    }
    let namespace = cluster.namespace().unwrap_or_default();
    let client = context.client.clone();
    let storm_clients = context.storm_clients.clone();
    let context = context.clone();
    tokio::spawn(async move {
        if let Err(e) =
            crate::coordinator::reconcile_namespace(client, &namespace, storm_clients).await
        {
            eprintln!("resource coordinator error in namespace '{namespace}': {e}");
        }
        context.coordinator_inflight.store(false, Ordering::SeqCst);
    });
}

fn on_error(cluster: Arc<Cluster>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "Cluster reconciliation error for '{}': {:?}",
            cluster.name_any(),
            error
        )
        .red()
    );
    Action::requeue(StdDuration::from_secs(5))
}
