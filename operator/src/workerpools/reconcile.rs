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
use std::sync::Arc;
use std::time::Duration as StdDuration;
use stormop_types::{ClusterPhase, Topology, TopologyPhase, WorkerPool, WorkerPoolPhase, WORKERPOOL_FINALIZER};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::kernel::StateMachine;
use crate::util::{
    Error,
    colors::{FG1, FG2},
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

pub async fn run(client: Client) -> Result<(), Error> {
    println!("{}", "Starting WorkerPool controller...".green());
    let context = Arc::new(ContextData {
        client: client.clone(),
        #[cfg(feature = "metrics")]
        metrics: ControllerMetrics::new("workerpool"),
    });

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("storm-operator-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "storm-operator-workerpools-lock".to_string(),
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
                eprintln!("workerpool leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if lease.acquired_lease {
            if controller_task.is_none() {
                println!("acquired leadership; starting workerpool controller");
                let pool_api: Api<WorkerPool> = Api::all(client.clone());
                let owns_client = client.clone();
                let context = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 WorkerPool controller started.".green());
                    // Cross-resource drift (cluster/topology readiness) is
                    // picked up on the per-phase requeue cadence rather than
                    // an explicit watch mapper; a pool in Pending requeues
                    // every 10s until its dependencies are Running.
                    Controller::new(pool_api, Default::default())
                        .owns(
                            Api::<k8s_openapi::api::apps::v1::Deployment>::all(owns_client.clone()),
                            Default::default(),
                        )
                        .owns(
                            Api::<k8s_openapi::api::core::v1::Service>::all(owns_client.clone()),
                            Default::default(),
                        )
                        .owns(
                            Api::<k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler>::all(
                                owns_client,
                            ),
                            Default::default(),
                        )
                        .run(reconcile, on_error, context)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            println!("lost leadership; stopping workerpool controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WorkerPoolEvent {
    Create,
    CreateComplete,
    ScaleUp,
    ScaleDown,
    ScalingComplete,
    HealthCheckFailed,
    Recover,
}

fn machine_for(phase: WorkerPoolPhase) -> StateMachine<WorkerPoolPhase, WorkerPoolEvent> {
    use WorkerPoolEvent::*;
    use WorkerPoolPhase::*;
    let mut m = StateMachine::new(phase);
    m.add_transition(Unknown, Create, Pending)
        .add_transition(Pending, Create, Creating)
        .add_transition(Creating, CreateComplete, Ready)
        .add_transition(Ready, ScaleUp, Scaling)
        .add_transition(Ready, ScaleDown, Scaling)
        .add_transition(Ready, HealthCheckFailed, Failed)
        .add_transition(Scaling, ScalingComplete, Ready)
        .add_transition(Failed, Recover, Pending);
    m
}

async fn reconcile(pool: Arc<WorkerPool>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let api: Api<WorkerPool> = Api::namespaced(
        client.clone(),
        pool.namespace().as_deref().unwrap_or("default"),
    );

    finalizer(&api, WORKERPOOL_FINALIZER, pool, |event| async {
        match event {
            FinalizerEvent::Apply(pool) => apply(pool, context.clone()).await,
            FinalizerEvent::Cleanup(pool) => cleanup(pool, context.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

async fn dependencies_ready(client: &Client, pool: &WorkerPool) -> Result<bool, Error> {
    let namespace = pool.namespace().unwrap_or_default();
    let topology_api: Api<Topology> = Api::namespaced(client.clone(), &namespace);
    let Some(topology) = topology_api.get_opt(&pool.spec.topology_name).await? else {
        return Ok(false);
    };
    if topology.status.as_ref().map(|s| s.phase) != Some(TopologyPhase::Running) {
        return Ok(false);
    }
    let cluster_api: Api<stormop_types::Cluster> = Api::namespaced(client.clone(), &namespace);
    let Some(cluster) = cluster_api.get_opt(&topology.spec.cluster_name).await? else {
        return Ok(false);
    };
    Ok(cluster.status.as_ref().map(|s| s.phase) == Some(ClusterPhase::Running))
}

async fn apply(pool: Arc<WorkerPool>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = pool.name_any();
    let namespace = pool
        .namespace()
        .ok_or_else(|| Error::UserInput("WorkerPool must be namespaced".to_string()))?;

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    let phase = pool.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let event = determine_event(&client, &pool, phase).await?;
    let Some(event) = event else {
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

    let mut machine = machine_for(phase);
    let new_phase = machine
        .process_event(event)
        .map_err(|e| Error::IllegalTransition(format!("workerpool '{namespace}/{name}': {e}")))?;

    match new_phase {
        WorkerPoolPhase::Creating | WorkerPoolPhase::Scaling => {
            actions::set_phase(client.clone(), &pool, new_phase, "reconciling children").await?;
            let Some(cm_name) = actions::resolve_cluster_configmap_name(client.clone(), &pool).await? else {
                return Ok(Action::requeue(StdDuration::from_secs(10)));
            };
            actions::reconcile_children(client.clone(), &pool, &cm_name).await?;
            actions::refresh_counts(client.clone(), &pool).await?;
            Ok(Action::requeue(StdDuration::from_secs(5)))
        }
        WorkerPoolPhase::Ready => {
            actions::refresh_counts(client.clone(), &pool).await?;
            actions::set_phase(client.clone(), &pool, new_phase, "worker pool is ready").await?;
            Ok(Action::requeue(StdDuration::from_secs(30)))
        }
        WorkerPoolPhase::Pending | WorkerPoolPhase::Unknown => {
            actions::set_phase(client.clone(), &pool, new_phase, "waiting for dependencies").await?;
            Ok(Action::requeue(StdDuration::from_secs(10)))
        }
        WorkerPoolPhase::Failed => {
            actions::set_phase(client.clone(), &pool, new_phase, "deployment not healthy").await?;
            Ok(Action::requeue(StdDuration::from_secs(30)))
        }
        WorkerPoolPhase::Deleted => Ok(Action::requeue(StdDuration::from_secs(10))),
    }
}

async fn determine_event(
    client: &Client,
    pool: &WorkerPool,
    phase: WorkerPoolPhase,
) -> Result<Option<WorkerPoolEvent>, Error> {
    match phase {
        WorkerPoolPhase::Unknown => Ok(Some(WorkerPoolEvent::Create)),
        WorkerPoolPhase::Pending => {
            if dependencies_ready(client, pool).await? {
                Ok(Some(WorkerPoolEvent::Create))
            } else {
                Ok(None)
            }
        }
        WorkerPoolPhase::Creating => {
            if actions::children_exist(client.clone(), pool).await? {
                Ok(Some(WorkerPoolEvent::CreateComplete))
            } else {
                Ok(None)
            }
        }
        WorkerPoolPhase::Ready => {
            let status = pool.status.as_ref();
            let desired = pool.spec.replicas;
            let observed = status.map(|s| s.desired_replicas).unwrap_or(0);
            if desired != observed {
                return Ok(Some(if desired > observed {
                    WorkerPoolEvent::ScaleUp
                } else {
                    WorkerPoolEvent::ScaleDown
                }));
            }
            let dep_status = actions::deployment_status(client.clone(), pool).await?;
            if let Some(dep_status) = dep_status {
                let ready = dep_status.ready_replicas.unwrap_or(0);
                if ready < desired {
                    return Ok(Some(WorkerPoolEvent::HealthCheckFailed));
                }
            }
            Ok(None)
        }
        WorkerPoolPhase::Scaling => {
            let dep_status = actions::deployment_status(client.clone(), pool).await?;
            let ready = dep_status.and_then(|s| s.ready_replicas).unwrap_or(0);
            if ready == pool.spec.replicas {
                Ok(Some(WorkerPoolEvent::ScalingComplete))
            } else {
                Ok(None)
            }
        }
        WorkerPoolPhase::Failed => Ok(Some(WorkerPoolEvent::Recover)),
        WorkerPoolPhase::Deleted => Ok(None),
    }
}

fn requeue_for(phase: WorkerPoolPhase) -> StdDuration {
    match phase {
        WorkerPoolPhase::Ready => StdDuration::from_secs(30),
        WorkerPoolPhase::Failed => StdDuration::from_secs(60),
        WorkerPoolPhase::Creating | WorkerPoolPhase::Scaling => StdDuration::from_secs(5),
        _ => StdDuration::from_secs(10),
    }
}

async fn cleanup(pool: Arc<WorkerPool>, context: Arc<ContextData>) -> Result<Action, Error> {
    actions::set_phase(context.client.clone(), &pool, WorkerPoolPhase::Deleted, "deleting").await?;
    Ok(Action::await_change())
}

fn on_error(pool: Arc<WorkerPool>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("WorkerPool reconciliation error for '{}': {:?}", pool.name_any(), error).red()
    );
    Action::requeue(StdDuration::from_secs(5))
}
