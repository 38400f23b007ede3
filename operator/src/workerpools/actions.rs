use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, RollingUpdateDeployment};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HPAScalingPolicy, HPAScalingRules, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerBehavior, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Service, ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{
    Api, Client, Resource,
    api::{ObjectMeta, Patch, PatchParams},
};
use std::collections::BTreeMap;

use crate::util::{Error, MANAGER_NAME, patch::patch_status};
use stormop_types::{
    ContainerOverride, PodTemplateOverride, Topology, WorkerPool, WorkerPoolPhase,
    workerpool_selector_label,
};

fn labels(pool: &WorkerPool) -> BTreeMap<String, String> {
    let (k, v) = workerpool_selector_label(&pool.meta().name.clone().unwrap_or_default());
    BTreeMap::from([
        (k, v),
        (
            "storm.stormop.io/topology".to_string(),
            pool.spec.topology_name.clone(),
        ),
    ])
}

fn owner_refs(pool: &WorkerPool) -> Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference> {
    vec![pool.controller_owner_ref(&()).expect("workerpool has name/uid")]
}

async fn apply<K>(api: &Api<K>, name: &str, desired: &K) -> Result<(), Error>
where
    K: Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>
        + kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    api.patch(name, &PatchParams::apply(MANAGER_NAME).force(), &Patch::Apply(desired))
        .await?;
    Ok(())
}

pub fn deployment_name(pool: &WorkerPool) -> String {
    pool.meta().name.clone().unwrap_or_default()
}

pub fn service_name(pool: &WorkerPool) -> String {
    format!("{}-headless", deployment_name(pool))
}

pub fn hpa_name(pool: &WorkerPool) -> String {
    format!("{}-hpa", deployment_name(pool))
}

fn worker_ports(pool: &WorkerPool) -> Vec<i32> {
    let start = pool.spec.worker_ports.start;
    let count = pool.spec.worker_ports.count.max(1);
    (0..count).map(|i| start + i).collect()
}

/// Per-container overrides apply only to containers matching by name and
/// only mutate resources (replace), environment (append), volume mounts
/// (append). Pod-level fields (affinity, tolerations, nodeSelector, extra
/// containers, volumes) replace the defaults wholesale.
fn apply_container_override(container: &mut Container, overrides: &[ContainerOverride]) {
    let Some(o) = overrides.iter().find(|o| o.name == container.name) else {
        return;
    };
    if let Some(resources) = &o.resources {
        container.resources = Some(resources.clone());
    }
    if !o.env.is_empty() {
        container.env.get_or_insert_with(Vec::new).extend(o.env.iter().cloned());
    }
    if !o.volume_mounts.is_empty() {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(o.volume_mounts.iter().cloned());
    }
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("1".to_string())),
            ("memory".to_string(), Quantity("2Gi".to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("2".to_string())),
            ("memory".to_string(), Quantity("4Gi".to_string())),
        ])),
        ..Default::default()
    }
}

/// `replicas` is the count to request on the built Deployment. Callers must
/// pass the live Deployment's current replica count when autoscaling is
/// enabled, rather than `pool.spec.replicas`, so the forcing server-side
/// apply doesn't fight the HPA's own writes to that field.
pub fn desired_deployment(pool: &WorkerPool, cluster_configmap_name: &str, replicas: i32) -> Deployment {
    let name = deployment_name(pool);
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(pool);
    let ports = worker_ports(pool);

    let first_port = ports.first().copied().unwrap_or(6700);
    let childopts = pool.spec.jvm_options.join(" ");

    let mut worker_container = Container {
        name: "worker".to_string(),
        image: pool.spec.image.clone(),
        command: Some(vec!["storm".to_string(), "supervisor".to_string()]),
        ports: Some(
            ports
                .iter()
                .enumerate()
                .map(|(i, p)| ContainerPort {
                    name: Some(format!("slot-{i}")),
                    container_port: *p,
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(vec![
            EnvVar {
                name: "STORM_TOPOLOGY_NAME".to_string(),
                value: Some(pool.spec.topology_name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "POD_NAME".to_string(),
                value_from: Some(k8s_openapi::api::core::v1::EnvVarSource {
                    field_ref: Some(k8s_openapi::api::core::v1::ObjectFieldSelector {
                        field_path: "metadata.name".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "POD_NAMESPACE".to_string(),
                value_from: Some(k8s_openapi::api::core::v1::EnvVarSource {
                    field_ref: Some(k8s_openapi::api::core::v1::ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "STORM_WORKER_CHILDOPTS".to_string(),
                value: Some(childopts),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "conf".to_string(),
                mount_path: "/conf".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(first_port),
                ..Default::default()
            }),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(first_port),
                ..Default::default()
            }),
            ..Default::default()
        }),
        resources: Some(default_resources()),
        ..Default::default()
    };
    apply_container_override(&mut worker_container, &pool.spec.pod_template.containers);

    let mut containers = vec![worker_container];
    containers.extend(pool.spec.pod_template.extra_containers.iter().cloned());

    let mut volumes = vec![
        Volume {
            name: "conf".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: cluster_configmap_name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "data".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        },
    ];
    volumes.extend(pool.spec.pod_template.volumes.iter().cloned());

    let PodTemplateOverride {
        affinity,
        tolerations,
        node_selector,
        ..
    } = pool.spec.pod_template.clone();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(lbls.clone()),
            owner_references: Some(owner_refs(pool)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(lbls.clone()),
                ..Default::default()
            },
            strategy: Some(k8s_openapi::api::apps::v1::DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::String("25%".to_string())),
                    max_surge: Some(IntOrString::String("25%".to_string())),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(lbls),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    volumes: Some(volumes),
                    affinity,
                    tolerations: if tolerations.is_empty() { None } else { Some(tolerations) },
                    node_selector: if node_selector.is_empty() { None } else { Some(node_selector) },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn desired_service(pool: &WorkerPool) -> Service {
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(pool);
    let ports = worker_ports(pool);
    Service {
        metadata: ObjectMeta {
            name: Some(service_name(pool)),
            namespace: Some(namespace),
            labels: Some(lbls.clone()),
            owner_references: Some(owner_refs(pool)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(lbls),
            ports: Some(
                ports
                    .iter()
                    .enumerate()
                    .map(|(i, p)| ServicePort {
                        name: Some(format!("slot-{i}")),
                        port: *p,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn desired_hpa(pool: &WorkerPool) -> Option<HorizontalPodAutoscaler> {
    let autoscaling = &pool.spec.autoscaling;
    if !autoscaling.enabled {
        return None;
    }
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(pool);

    let mut metrics = Vec::new();
    if let Some(target) = autoscaling.target_cpu_utilization_percentage {
        metrics.push(MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(target),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }
    if let Some(target) = autoscaling.target_memory_utilization_percentage {
        metrics.push(MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "memory".to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(target),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }
    for custom in &autoscaling.custom_metrics {
        let target = MetricTarget {
            type_: "AverageValue".to_string(),
            average_value: Some(Quantity(custom.target_value.to_string())),
            ..Default::default()
        };
        let identifier = k8s_openapi::api::autoscaling::v2::MetricIdentifier {
            name: custom.name.clone(),
            ..Default::default()
        };
        if custom.kind == "external" {
            metrics.push(MetricSpec {
                type_: "External".to_string(),
                external: Some(k8s_openapi::api::autoscaling::v2::ExternalMetricSource {
                    metric: identifier,
                    target,
                }),
                ..Default::default()
            });
        } else {
            metrics.push(MetricSpec {
                type_: "Pods".to_string(),
                pods: Some(k8s_openapi::api::autoscaling::v2::PodsMetricSource {
                    metric: identifier,
                    target,
                }),
                ..Default::default()
            });
        }
    }

    Some(HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(hpa_name(pool)),
            namespace: Some(namespace),
            labels: Some(lbls),
            owner_references: Some(owner_refs(pool)),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: deployment_name(pool),
            },
            min_replicas: Some(autoscaling.min_replicas.max(1)),
            max_replicas: autoscaling.max_replicas.max(autoscaling.min_replicas.max(1)),
            metrics: Some(metrics),
            behavior: Some(HorizontalPodAutoscalerBehavior {
                scale_up: Some(HPAScalingRules {
                    stabilization_window_seconds: Some(60),
                    select_policy: Some("Max".to_string()),
                    policies: Some(vec![
                        HPAScalingPolicy {
                            type_: "Percent".to_string(),
                            value: 100,
                            period_seconds: 60,
                        },
                        HPAScalingPolicy {
                            type_: "Pods".to_string(),
                            value: 4,
                            period_seconds: 60,
                        },
                    ]),
                }),
                scale_down: Some(HPAScalingRules {
                    stabilization_window_seconds: Some(300),
                    select_policy: Some("Max".to_string()),
                    policies: Some(vec![HPAScalingPolicy {
                        type_: "Percent".to_string(),
                        value: 10,
                        period_seconds: 60,
                    }]),
                }),
            }),
        }),
        status: None,
    })
}

/// The live Deployment's `spec.replicas`, i.e. the count the HPA last wrote
/// (or `None` if the Deployment doesn't exist yet).
pub async fn live_replicas(client: Client, pool: &WorkerPool) -> Result<Option<i32>, Error> {
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let api: Api<Deployment> = Api::namespaced(client, &namespace);
    Ok(api
        .get_opt(&deployment_name(pool))
        .await?
        .and_then(|d| d.spec)
        .and_then(|s| s.replicas))
}

async fn target_replicas(client: Client, pool: &WorkerPool) -> Result<i32, Error> {
    if pool.spec.autoscaling.enabled {
        Ok(live_replicas(client, pool).await?.unwrap_or(pool.spec.replicas))
    } else {
        Ok(pool.spec.replicas)
    }
}

pub async fn reconcile_children(
    client: Client,
    pool: &WorkerPool,
    cluster_configmap_name: &str,
) -> Result<(), Error> {
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let replicas = target_replicas(client.clone(), pool).await?;

    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    apply(
        &deploy_api,
        &deployment_name(pool),
        &desired_deployment(pool, cluster_configmap_name, replicas),
    )
    .await?;

    let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    apply(&svc_api, &service_name(pool), &desired_service(pool)).await?;

    let hpa_api: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), &namespace);
    match desired_hpa(pool) {
        Some(hpa) => {
            apply(&hpa_api, &hpa_name(pool), &hpa).await?;
        }
        None => {
            // Autoscaling disabled: the autoscaler must not exist.
            let _ = hpa_api.delete(&hpa_name(pool), &Default::default()).await;
        }
    }
    Ok(())
}

pub async fn children_exist(client: Client, pool: &WorkerPool) -> Result<bool, Error> {
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    if deploy_api.get_opt(&deployment_name(pool)).await?.is_none() {
        return Ok(false);
    }
    if svc_api.get_opt(&service_name(pool)).await?.is_none() {
        return Ok(false);
    }
    Ok(true)
}

pub async fn deployment_status(client: Client, pool: &WorkerPool) -> Result<Option<k8s_openapi::api::apps::v1::DeploymentStatus>, Error> {
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let api: Api<Deployment> = Api::namespaced(client, &namespace);
    Ok(api.get_opt(&deployment_name(pool)).await?.and_then(|d| d.status))
}

pub async fn resolve_cluster_configmap_name(client: Client, pool: &WorkerPool) -> Result<Option<String>, Error> {
    let namespace = pool.meta().namespace.clone().unwrap_or_default();
    let topology_api: Api<Topology> = Api::namespaced(client.clone(), &namespace);
    let Some(topology) = topology_api.get_opt(&pool.spec.topology_name).await? else {
        return Ok(None);
    };
    let cluster_api: Api<stormop_types::Cluster> = Api::namespaced(client, &namespace);
    let Some(cluster) = cluster_api.get_opt(&topology.spec.cluster_name).await? else {
        return Ok(None);
    };
    Ok(Some(crate::clusters::names::configmap_name(&cluster)))
}

pub async fn set_phase(
    client: Client,
    pool: &WorkerPool,
    phase: WorkerPoolPhase,
    message: impl Into<String>,
) -> Result<(), Error> {
    let message = message.into();
    let dep_name = deployment_name(pool);
    patch_status(client, pool, |status: &mut stormop_types::WorkerPoolStatus| {
        status.phase = phase;
        status.message = Some(message);
        status.deployment_name = Some(dep_name);
        let ready = phase == WorkerPoolPhase::Ready;
        stormop_types::set_condition(
            &mut status.conditions,
            stormop_types::condition_types::READY,
            ready,
            if ready { "WorkerPoolReady" } else { "WorkerPoolNotReady" },
            format!("WorkerPool is in phase {phase}"),
            None,
        );
    })
    .await?;
    Ok(())
}

pub async fn refresh_counts(client: Client, pool: &WorkerPool) -> Result<(), Error> {
    let status = deployment_status(client.clone(), pool).await?;
    let desired = target_replicas(client.clone(), pool).await?;
    patch_status(client, pool, |s: &mut stormop_types::WorkerPoolStatus| {
        s.desired_replicas = desired;
        if let Some(status) = &status {
            s.ready_replicas = status.ready_replicas.unwrap_or(0);
            s.available_replicas = status.available_replicas.unwrap_or(0);
            s.unavailable_replicas = status.unavailable_replicas.unwrap_or(0);
            s.updated_replicas = status.updated_replicas.unwrap_or(0);
        }
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str, replicas: i32) -> WorkerPool {
        let mut p = WorkerPool::default();
        p.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some("11111111-1111-1111-1111-111111111111".to_string()),
            ..Default::default()
        };
        p.spec.topology_name = "t1".to_string();
        p.spec.replicas = replicas;
        p.spec.image = "apache/storm:2.6.0".to_string();
        p
    }

    #[test]
    fn desired_deployment_requests_spec_replicas_and_one_port_per_slot() {
        let mut w = pool("w1", 3);
        w.spec.worker_ports = stormop_types::WorkerPortRange { start: 6700, count: 2 };
        let dep = desired_deployment(&w, "c1-conf", w.spec.replicas);
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].ports.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn container_override_replaces_resources_and_appends_env() {
        let mut w = pool("w1", 1);
        w.spec.pod_template.containers.push(ContainerOverride {
            name: "worker".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity("4".to_string()),
                )])),
                ..Default::default()
            }),
            env: vec![EnvVar {
                name: "EXTRA".to_string(),
                value: Some("1".to_string()),
                ..Default::default()
            }],
            volume_mounts: vec![],
        });
        let dep = desired_deployment(&w, "c1-conf", w.spec.replicas);
        let pod = dep.spec.unwrap().template.spec.unwrap();
        let worker = &pod.containers[0];
        let requests = worker.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("4".to_string())));
        assert!(worker.env.as_ref().unwrap().iter().any(|e| e.name == "EXTRA"));
        assert!(worker.env.as_ref().unwrap().iter().any(|e| e.name == "STORM_TOPOLOGY_NAME"));
    }

    #[test]
    fn desired_hpa_is_none_when_autoscaling_disabled() {
        let w = pool("w1", 3);
        assert!(desired_hpa(&w).is_none());
    }

    #[test]
    fn desired_hpa_targets_the_deployment_with_configured_bounds() {
        let mut w = pool("w1", 3);
        w.spec.autoscaling.enabled = true;
        w.spec.autoscaling.min_replicas = 2;
        w.spec.autoscaling.max_replicas = 10;
        w.spec.autoscaling.target_cpu_utilization_percentage = Some(70);

        let hpa = desired_hpa(&w).expect("autoscaling enabled");
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.scale_target_ref.name, "w1");
        assert_eq!(spec.min_replicas, Some(2));
        assert_eq!(spec.max_replicas, 10);
        let metrics = spec.metrics.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].type_, "Resource");
        let target = metrics[0].resource.as_ref().unwrap().target.average_utilization;
        assert_eq!(target, Some(70));
    }

    #[test]
    fn scaling_a_ready_pool_does_not_touch_the_autoscaler() {
        // Scaling spec.replicas alone never recomputes the HPA: desired_hpa
        // only depends on pool.spec.autoscaling, which scaling leaves untouched.
        let mut before = pool("w1", 3);
        before.spec.autoscaling.enabled = true;
        let mut after = before.clone();
        after.spec.replicas = 6;
        assert_eq!(desired_hpa(&before), desired_hpa(&after));
    }
}
