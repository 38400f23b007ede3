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
use stormop_types::{Cluster, Topology, TopologyPhase, TopologyState, TOPOLOGY_FINALIZER};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::jar::JarCache;
use crate::kernel::StateMachine;
use crate::storm::ClientManager;
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

pub async fn run(
    client: Client,
    storm_clients: Arc<ClientManager>,
    jar_cache: Arc<JarCache>,
    storm_binary: String,
) -> Result<(), Error> {
    println!("{}", "Starting Topology controller...".green());
    let context = Arc::new(ContextData {
        client: client.clone(),
        storm_clients,
        jar_cache,
        storm_binary,
        #[cfg(feature = "metrics")]
        metrics: ControllerMetrics::new("topology"),
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
            lease_name: "storm-operator-topologies-lock".to_string(),
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
                eprintln!("topology leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if lease.acquired_lease {
            if controller_task.is_none() {
                println!("acquired leadership; starting topology controller");
                let topology_api: Api<Topology> = Api::all(client.clone());
                let owns_client = client.clone();
                let context = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 Topology controller started.".green());
                    // Cross-resource drift (cluster endpoint changes, cluster
                    // deletion) surfaces on the Running-state 60s poll rather
                    // than an explicit watch.
                    Controller::new(topology_api, Default::default())
                        .owns(
                            Api::<k8s_openapi::api::batch::v1::Job>::all(owns_client),
                            Default::default(),
                        )
                        .run(reconcile, on_error, context)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            println!("lost leadership; stopping topology controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    storm_clients: Arc<ClientManager>,
    jar_cache: Arc<JarCache>,
    storm_binary: String,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TopologyEvent {
    Validate,
    ValidationSuccess,
    ValidationFailed,
    DownloadComplete,
    SubmitSuccess,
    Suspend,
    Resume,
    TopologyUpdate,
    Error,
}

fn machine_for(state: TopologyState) -> StateMachine<TopologyState, TopologyEvent> {
    use TopologyEvent::*;
    use TopologyState::*;
    let mut m = StateMachine::new(state);
    m.add_transition(Unknown, Validate, Validating)
        .add_transition(Pending, Validate, Validating)
        .add_transition(Validating, ValidationSuccess, Downloading)
        .add_transition(Validating, ValidationFailed, Failed)
        .add_transition(Downloading, DownloadComplete, Submitting)
        .add_transition(Submitting, SubmitSuccess, Running)
        .add_transition(Running, Suspend, Suspended)
        .add_transition(Running, TopologyUpdate, Updating)
        .add_transition(Running, Error, Failed)
        .add_transition(Suspended, Resume, Running)
        .add_transition(Updating, SubmitSuccess, Running)
        .add_transition(Updating, Error, Failed);
    m
}

fn to_phase(state: TopologyState) -> TopologyPhase {
    match state {
        TopologyState::Unknown => TopologyPhase::Unknown,
        TopologyState::Pending => TopologyPhase::Pending,
        TopologyState::Validating => TopologyPhase::Validating,
        TopologyState::Downloading => TopologyPhase::Downloading,
        TopologyState::Submitting => TopologyPhase::Submitting,
        TopologyState::Running => TopologyPhase::Running,
        TopologyState::Suspended => TopologyPhase::Suspended,
        TopologyState::Updating => TopologyPhase::Updating,
        TopologyState::Killing => TopologyPhase::Killing,
        TopologyState::Killed => TopologyPhase::Killed,
        TopologyState::Failed => TopologyPhase::Failed,
    }
}

async fn reconcile(topology: Arc<Topology>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let api: Api<Topology> = Api::namespaced(
        client.clone(),
        topology.namespace().as_deref().unwrap_or("default"),
    );

    finalizer(&api, TOPOLOGY_FINALIZER, topology, |event| async {
        match event {
            FinalizerEvent::Apply(topology) => apply(topology, context.clone()).await,
            FinalizerEvent::Cleanup(topology) => cleanup(topology, context.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

async fn cluster_for(client: &Client, topology: &Topology) -> Result<Cluster, Error> {
    let namespace = topology.namespace().unwrap_or_default();
    let api: Api<Cluster> = Api::namespaced(client.clone(), &namespace);
    Ok(api.get(&topology.spec.cluster_name).await?)
}

async fn apply(topology: Arc<Topology>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = topology.name_any();
    let namespace = topology
        .namespace()
        .ok_or_else(|| Error::UserInput("Topology must be namespaced".to_string()))?;

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    let internal_state = topology
        .status
        .as_ref()
        .map(|s| s.internal_state)
        .unwrap_or(TopologyState::Unknown);

    let event = determine_event(&topology, &context).await?;
    let Some(event) = event else {
        return Ok(Action::requeue(requeue_for(internal_state)));
    };

    println!(
        "🔧 {}{}{}{}{:?}",
        namespace.color(FG2),
        "/".color(FG1),
        name.color(FG2),
        " EVENT: ".color(FG1),
        event,
    );

    let mut machine = machine_for(internal_state);
    let new_state = machine
        .process_event(event)
        .map_err(|e| Error::IllegalTransition(format!("topology '{namespace}/{name}': {e}")))?;

    match new_state {
        TopologyState::Downloading => {
            actions::set_state(client.clone(), &topology, to_phase(new_state), new_state, "resolving JAR").await?;
            match actions::resolve_jar(client.clone(), &topology, context.jar_cache.clone()).await {
                Ok(_) => Ok(Action::requeue(StdDuration::from_secs(2))),
                Err(e) => {
                    actions::mark_failed(client.clone(), &topology, format!("JAR acquisition failed: {e}")).await?;
                    Ok(Action::requeue(StdDuration::from_secs(30)))
                }
            }
        }
        TopologyState::Submitting => {
            submit_new_version(client.clone(), &topology, &context).await
        }
        TopologyState::Updating => {
            rolling_replace(client.clone(), &topology, &context).await
        }
        TopologyState::Suspended => {
            suspend(client.clone(), &topology, &context).await?;
            actions::set_state(client.clone(), &topology, to_phase(new_state), new_state, "suspended").await?;
            Ok(Action::requeue(StdDuration::from_secs(30)))
        }
        TopologyState::Running => {
            if internal_state == TopologyState::Suspended {
                resume(client.clone(), &topology, &context).await?;
            }
            refresh_and_mark_running(client.clone(), &topology, &context).await?;
            Ok(Action::requeue(StdDuration::from_secs(60)))
        }
        TopologyState::Failed => {
            actions::mark_failed(client.clone(), &topology, "validation failed").await?;
            Ok(Action::requeue(StdDuration::from_secs(30)))
        }
        TopologyState::Validating | TopologyState::Pending | TopologyState::Unknown => {
            actions::set_state(client.clone(), &topology, to_phase(new_state), new_state, "validating").await?;
            Ok(Action::requeue(StdDuration::from_secs(5)))
        }
        TopologyState::Killing | TopologyState::Killed => {
            Ok(Action::requeue(StdDuration::from_secs(5)))
        }
    }
}

async fn determine_event(
    topology: &Topology,
    context: &ContextData,
) -> Result<Option<TopologyEvent>, Error> {
    let internal_state = topology
        .status
        .as_ref()
        .map(|s| s.internal_state)
        .unwrap_or(TopologyState::Unknown);

    match internal_state {
        TopologyState::Unknown | TopologyState::Pending => Ok(Some(TopologyEvent::Validate)),
        TopologyState::Validating => Ok(Some(if validate(topology) {
            TopologyEvent::ValidationSuccess
        } else {
            TopologyEvent::ValidationFailed
        })),
        TopologyState::Downloading => Ok(Some(TopologyEvent::DownloadComplete)),
        TopologyState::Submitting => Ok(Some(TopologyEvent::SubmitSuccess)),
        TopologyState::Running => {
            if topology.spec.suspend {
                return Ok(Some(TopologyEvent::Suspend));
            }
            let status = topology.status.as_ref();
            let deployed = status.and_then(|s| s.deployed_version.clone());
            if deployed.as_deref() != Some(topology.spec.version().as_str()) {
                return Ok(Some(TopologyEvent::TopologyUpdate));
            }
            let cluster = cluster_for(&context.client, topology).await?;
            let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
            if let Some(storm) = context
                .storm_clients
                .get_client(&cluster_namespace, &topology.spec.cluster_name)
                .await
            {
                match storm.get_topology(&topology.spec.name).await {
                    Ok(_) => Ok(None),
                    Err(e) if e.is_absence() => Ok(Some(TopologyEvent::Error)),
                    Err(_) => Ok(None),
                }
            } else {
                Ok(None)
            }
        }
        TopologyState::Suspended => {
            if !topology.spec.suspend {
                Ok(Some(TopologyEvent::Resume))
            } else {
                Ok(None)
            }
        }
        TopologyState::Updating | TopologyState::Failed | TopologyState::Killing | TopologyState::Killed => {
            Ok(None)
        }
    }
}

fn validate(topology: &Topology) -> bool {
    !topology.spec.name.is_empty()
        && !topology.spec.main_class.is_empty()
        && topology.spec.jar_source.variant_count() == 1
}

async fn do_submit(
    client: Client,
    topology: &Topology,
    context: &ContextData,
    jar_path: &str,
) -> Result<(), Error> {
    let cluster = cluster_for(&context.client, topology).await?;
    let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let nimbus_seeds = crate::clusters::names::nimbus_seeds(&cluster, &cluster_namespace);

    shell_out_or_rpc_submit(context, topology, jar_path, &nimbus_seeds).await?;

    #[cfg(feature = "metrics")]
    crate::util::metrics::TOPOLOGY_SUBMISSIONS
        .with_label_values(&[&topology.spec.name, &cluster_namespace, "success"])
        .inc();

    actions::record_submission(client, topology, &topology.spec.version(), None).await
}

async fn shell_out_or_rpc_submit(
    context: &ContextData,
    topology: &Topology,
    jar_path: &str,
    nimbus_seeds: &[String],
) -> Result<(), Error> {
    super::submit::shell_submit(
        &context.storm_binary,
        jar_path,
        &topology.spec.main_class,
        &topology.spec.name,
        &topology.spec.args,
        &topology.spec.config,
        nimbus_seeds,
    )
    .await
}

async fn submit_new_version(
    client: Client,
    topology: &Topology,
    context: &ContextData,
) -> Result<Action, Error> {
    actions::set_state(
        client.clone(),
        topology,
        TopologyPhase::Submitting,
        TopologyState::Submitting,
        "submitting to Nimbus",
    )
    .await?;
    let jar_path = actions::resolve_jar(client.clone(), topology, context.jar_cache.clone()).await?;
    match do_submit(client.clone(), topology, context, &jar_path).await {
        Ok(()) => Ok(Action::requeue(StdDuration::from_secs(5))),
        Err(e) => {
            let cluster = cluster_for(&context.client, topology).await.ok();
            if let Some(cluster) = cluster {
                #[cfg(feature = "metrics")]
                crate::util::metrics::TOPOLOGY_SUBMISSIONS
                    .with_label_values(&[
                        &topology.spec.name,
                        &cluster.meta().namespace.clone().unwrap_or_default(),
                        "failure",
                    ])
                    .inc();
            }
            actions::mark_failed(client, topology, format!("submission failed: {e}")).await?;
            Ok(Action::requeue(StdDuration::from_secs(30)))
        }
    }
}

/// Version-driven rolling replace: kill, poll until Storm no longer lists
/// the name (up to 2 minutes at 5 s intervals), then resubmit.
async fn rolling_replace(client: Client, topology: &Topology, context: &ContextData) -> Result<Action, Error> {
    let cluster = cluster_for(&context.client, topology).await?;
    let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let Some(storm) = context
        .storm_clients
        .get_client(&cluster_namespace, &topology.spec.cluster_name)
        .await
    else {
        return Ok(Action::requeue(StdDuration::from_secs(10)));
    };

    actions::set_state(
        client.clone(),
        topology,
        TopologyPhase::Updating,
        TopologyState::Killing,
        "killing previous version",
    )
    .await?;

    match storm.kill_topology(&topology.spec.name, 30).await {
        Ok(()) | Err(_) => {}
    }

    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(120);
    loop {
        match storm.get_topology(&topology.spec.name).await {
            Err(e) if e.is_absence() => break,
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            actions::mark_failed(
                client.clone(),
                topology,
                "timed out waiting for Storm to release the topology name during rolling replace",
            )
            .await?;
            return Ok(Action::requeue(StdDuration::from_secs(30)));
        }
        tokio::time::sleep(StdDuration::from_secs(5)).await;
    }

    actions::set_state(
        client.clone(),
        topology,
        TopologyPhase::Submitting,
        TopologyState::Submitting,
        "resubmitting after kill",
    )
    .await?;

    let jar_path = actions::resolve_jar(client.clone(), topology, context.jar_cache.clone()).await?;
    do_submit(client.clone(), topology, context, &jar_path).await?;
    Ok(Action::requeue(StdDuration::from_secs(5)))
}

async fn suspend(client: Client, topology: &Topology, context: &ContextData) -> Result<(), Error> {
    let cluster = cluster_for(&context.client, topology).await?;
    let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
    if let Some(storm) = context
        .storm_clients
        .get_client(&cluster_namespace, &topology.spec.cluster_name)
        .await
    {
        let _ = storm.deactivate_topology(&topology.spec.name).await;
    }
    let _ = client;
    Ok(())
}

async fn resume(client: Client, topology: &Topology, context: &ContextData) -> Result<(), Error> {
    let cluster = cluster_for(&context.client, topology).await?;
    let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
    if let Some(storm) = context
        .storm_clients
        .get_client(&cluster_namespace, &topology.spec.cluster_name)
        .await
    {
        let _ = storm.activate_topology(&topology.spec.name).await;
    }
    let _ = client;
    Ok(())
}

async fn refresh_and_mark_running(client: Client, topology: &Topology, context: &ContextData) -> Result<(), Error> {
    let cluster = cluster_for(&context.client, topology).await?;
    let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
    actions::refresh_health(
        client.clone(),
        topology,
        &context.storm_clients,
        &cluster_namespace,
        &topology.spec.cluster_name,
    )
    .await?;
    actions::set_state(
        client,
        topology,
        TopologyPhase::Running,
        TopologyState::Running,
        "topology is running",
    )
    .await
}

async fn cleanup(topology: Arc<Topology>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let cluster = cluster_for(&context.client, &topology).await.ok();
    if let Some(cluster) = cluster {
        let cluster_namespace = cluster.meta().namespace.clone().unwrap_or_default();
        if let Some(storm) = context
            .storm_clients
            .get_client(&cluster_namespace, &topology.spec.cluster_name)
            .await
        {
            match storm.kill_topology(&topology.spec.name, 30).await {
                Ok(()) => {}
                Err(e) if e.is_absence() => {}
                Err(e) => {
                    eprintln!("failed to kill topology '{}' during deletion: {e}", topology.spec.name);
                    return Ok(Action::requeue(StdDuration::from_secs(10)));
                }
            }
            #[cfg(feature = "metrics")]
            crate::util::metrics::TOPOLOGY_DELETIONS
                .with_label_values(&[&topology.spec.name, &cluster_namespace])
                .inc();
        }
    }
    actions::set_state(
        client,
        &topology,
        TopologyPhase::Killed,
        TopologyState::Killed,
        "topology killed, finalizing deletion",
    )
    .await?;
    Ok(Action::await_change())
}

fn requeue_for(state: TopologyState) -> StdDuration {
    match state {
        TopologyState::Running => StdDuration::from_secs(60),
        TopologyState::Failed => StdDuration::from_secs(300),
        TopologyState::Killing | TopologyState::Killed => PROBE_INTERVAL,
        _ => StdDuration::from_secs(5),
    }
}

fn on_error(topology: Arc<Topology>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "Topology reconciliation error for '{}': {:?}",
            topology.name_any(),
            error
        )
        .red()
    );
    Action::requeue(StdDuration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormop_types::{JarSourceSpec, UrlJarSource};

    fn topology_with(name: &str, main_class: &str, jar_source: JarSourceSpec) -> Topology {
        let mut t = Topology::default();
        t.spec.name = name.to_string();
        t.spec.main_class = main_class.to_string();
        t.spec.jar_source = jar_source;
        t
    }

    fn url_source(url: &str) -> JarSourceSpec {
        JarSourceSpec {
            url: Some(UrlJarSource { url: url.to_string() }),
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_well_formed_topology() {
        let t = topology_with("t1", "com.example.Main", url_source("https://example/foo.jar"));
        assert!(validate(&t));
    }

    #[test]
    fn validate_rejects_missing_name() {
        let t = topology_with("", "com.example.Main", url_source("https://example/foo.jar"));
        assert!(!validate(&t));
    }

    #[test]
    fn validate_rejects_no_jar_source() {
        let t = topology_with("t1", "com.example.Main", JarSourceSpec::default());
        assert!(!validate(&t));
    }

    #[test]
    fn validate_rejects_multiple_jar_sources() {
        let mut source = url_source("https://example/foo.jar");
        source.config_map = Some(stormop_types::ConfigMapJarSource {
            name: "jars".to_string(),
            key: "topology.jar".to_string(),
        });
        let t = topology_with("t1", "com.example.Main", source);
        assert!(!validate(&t));
    }

    #[test]
    fn machine_walks_pending_through_running_on_fresh_submit() {
        let mut m = machine_for(TopologyState::Pending);
        assert_eq!(m.process_event(TopologyEvent::Validate).unwrap(), TopologyState::Validating);
        let mut m = machine_for(TopologyState::Validating);
        assert_eq!(
            m.process_event(TopologyEvent::ValidationSuccess).unwrap(),
            TopologyState::Downloading
        );
        let mut m = machine_for(TopologyState::Downloading);
        assert_eq!(
            m.process_event(TopologyEvent::DownloadComplete).unwrap(),
            TopologyState::Submitting
        );
        let mut m = machine_for(TopologyState::Submitting);
        assert_eq!(
            m.process_event(TopologyEvent::SubmitSuccess).unwrap(),
            TopologyState::Running
        );
    }

    #[test]
    fn machine_handles_version_driven_update_cycle() {
        let mut m = machine_for(TopologyState::Running);
        assert_eq!(
            m.process_event(TopologyEvent::TopologyUpdate).unwrap(),
            TopologyState::Updating
        );
        let mut m = machine_for(TopologyState::Updating);
        assert_eq!(
            m.process_event(TopologyEvent::SubmitSuccess).unwrap(),
            TopologyState::Running
        );
    }

    #[test]
    fn machine_handles_suspend_and_resume() {
        let mut m = machine_for(TopologyState::Running);
        assert_eq!(m.process_event(TopologyEvent::Suspend).unwrap(), TopologyState::Suspended);
        let mut m = machine_for(TopologyState::Suspended);
        assert_eq!(m.process_event(TopologyEvent::Resume).unwrap(), TopologyState::Running);
    }

    #[test]
    fn machine_rejects_illegal_transition() {
        let mut m = machine_for(TopologyState::Killed);
        assert!(m.process_event(TopologyEvent::Validate).is_err());
    }

    #[test]
    fn to_phase_maps_every_state() {
        for state in [
            TopologyState::Unknown,
            TopologyState::Pending,
            TopologyState::Validating,
            TopologyState::Downloading,
            TopologyState::Submitting,
            TopologyState::Running,
            TopologyState::Suspended,
            TopologyState::Updating,
            TopologyState::Killing,
            TopologyState::Killed,
            TopologyState::Failed,
        ] {
            // Every state must map to a phase of the same name.
            let phase = to_phase(state);
            assert_eq!(format!("{state:?}"), format!("{phase:?}"));
        }
    }
}
