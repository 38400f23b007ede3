use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    Api, Client, Resource,
    api::{ObjectMeta, Patch, PatchParams, PostParams},
};
use std::collections::BTreeMap;

use super::names;
use crate::util::{Error, MANAGER_NAME, messages, patch::patch_status};
use stormop_types::{Cluster, ClusterPhase, ManagementMode};

fn labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("storm.stormop.io/cluster".to_string(), cluster_name.to_string()),
        ("storm.stormop.io/component".to_string(), component.to_string()),
    ])
}

fn owner_refs(cluster: &Cluster) -> Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference> {
    vec![cluster.controller_owner_ref(&()).expect("cluster has name/uid")]
}

/// Create-or-update a Kubernetes object, skipping mutation entirely in
/// `reference` mode (where the object is assumed externally owned).
async fn apply<K>(api: &Api<K>, name: &str, desired: &K, cluster: &Cluster) -> Result<(), Error>
where
    K: Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>
        + kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    if cluster.spec.management_mode == ManagementMode::Reference {
        return Ok(());
    }
    api.patch(
        name,
        &PatchParams::apply(MANAGER_NAME).force(),
        &Patch::Apply(desired),
    )
    .await?;
    Ok(())
}

pub async fn reconcile_configmap(client: Client, cluster: &Cluster, cm: &k8s_openapi::api::core::v1::ConfigMap) -> Result<(), Error> {
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let api: Api<k8s_openapi::api::core::v1::ConfigMap> = Api::namespaced(client, &namespace);
    apply(&api, &names::configmap_name(cluster), cm, cluster).await
}

fn configmap_volume(cluster: &Cluster) -> Volume {
    Volume {
        name: "conf".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: names::configmap_name(cluster),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn conf_mount() -> VolumeMount {
    VolumeMount {
        name: "conf".to_string(),
        mount_path: "/conf".to_string(),
        ..Default::default()
    }
}

pub fn desired_nimbus_statefulset(cluster: &Cluster) -> StatefulSet {
    let name = names::nimbus_statefulset_name(cluster);
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(&cluster.meta().name.clone().unwrap_or_default(), "nimbus");

    let mut volume_claim_templates = None;
    let mut volume_mounts = vec![conf_mount()];
    let mut volumes = vec![configmap_volume(cluster)];
    if let Some(persistence) = &cluster.spec.nimbus_persistence {
        volume_mounts.push(VolumeMount {
            name: "data".to_string(),
            mount_path: "/storm/data".to_string(),
            ..Default::default()
        });
        volume_claim_templates = Some(vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: persistence.storage_class.clone(),
                resources: Some(k8s_openapi::api::core::v1::VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(persistence.size.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    } else {
        volumes.push(Volume {
            name: "data".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: "data".to_string(),
            mount_path: "/storm/data".to_string(),
            ..Default::default()
        });
    }

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(lbls.clone()),
            owner_references: Some(owner_refs(cluster)),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(cluster.spec.nimbus.replicas),
            service_name: names::nimbus_service_name(cluster),
            selector: LabelSelector {
                match_labels: Some(lbls.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(lbls),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "nimbus".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        command: Some(vec![
                            "storm".to_string(),
                            "nimbus".to_string(),
                        ]),
                        ports: Some(vec![ContainerPort {
                            name: Some("thrift".to_string()),
                            container_port: 6627,
                            ..Default::default()
                        }]),
                        volume_mounts: Some(volume_mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        status: None,
    }
}

pub fn desired_supervisor_deployment(cluster: &Cluster) -> Deployment {
    let name = names::supervisor_deployment_name(cluster);
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(&cluster.meta().name.clone().unwrap_or_default(), "supervisor");
    let ports: Vec<ContainerPort> = (0..cluster.spec.slots_per_supervisor.max(0))
        .map(|i| ContainerPort {
            name: Some(format!("slot-{i}")),
            container_port: 6700 + i,
            ..Default::default()
        })
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(lbls.clone()),
            owner_references: Some(owner_refs(cluster)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(cluster.spec.supervisor.replicas),
            selector: LabelSelector {
                match_labels: Some(lbls.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(lbls),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "supervisor".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        command: Some(vec!["storm".to_string(), "supervisor".to_string()]),
                        ports: Some(ports),
                        volume_mounts: Some(vec![conf_mount()]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![configmap_volume(cluster)]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn desired_ui_deployment(cluster: &Cluster) -> Option<Deployment> {
    let ui_spec = cluster.spec.ui.as_ref()?;
    let name = names::ui_deployment_name(cluster);
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(&cluster.meta().name.clone().unwrap_or_default(), "ui");

    Some(Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(lbls.clone()),
            owner_references: Some(owner_refs(cluster)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(ui_spec.replicas),
            selector: LabelSelector {
                match_labels: Some(lbls.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(lbls),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "ui".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        command: Some(vec!["storm".to_string(), "ui".to_string()]),
                        ports: Some(vec![ContainerPort {
                            name: Some("ui".to_string()),
                            container_port: 8080,
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![conf_mount()]),
                        resources: Some(ResourceRequirements {
                            requests: Some(BTreeMap::from([
                                ("cpu".to_string(), Quantity("250m".to_string())),
                                ("memory".to_string(), Quantity("512Mi".to_string())),
                            ])),
                            ..Default::default()
                        }),
                        env: Some(vec![EnvVar {
                            name: "STORM_LOG_DIR".to_string(),
                            value: Some("/storm/logs".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![configmap_volume(cluster)]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

pub fn desired_nimbus_service(cluster: &Cluster) -> Service {
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(&cluster.meta().name.clone().unwrap_or_default(), "nimbus");
    Service {
        metadata: ObjectMeta {
            name: Some(names::nimbus_service_name(cluster)),
            namespace: Some(namespace),
            owner_references: Some(owner_refs(cluster)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(lbls),
            ports: Some(vec![ServicePort {
                name: Some("thrift".to_string()),
                port: 6627,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn desired_ui_service(cluster: &Cluster) -> Option<Service> {
    cluster.spec.ui.as_ref()?;
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let lbls = labels(&cluster.meta().name.clone().unwrap_or_default(), "ui");
    Some(Service {
        metadata: ObjectMeta {
            name: Some(names::ui_service_name(cluster)),
            namespace: Some(namespace),
            owner_references: Some(owner_refs(cluster)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(lbls),
            ports: Some(vec![ServicePort {
                name: Some("ui".to_string()),
                port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    })
}

/// Full reconcile-the-children pass performed on entry to Creating/Updating:
/// ConfigMap, Nimbus stateful set, Supervisor deployment, (optionally) UI
/// deployment, headless Nimbus service, (optionally) UI service. Each is
/// create-or-update via server-side apply with an owner reference; skipped
/// entirely in `reference` mode.
pub async fn reconcile_children(client: Client, cluster: &Cluster) -> Result<(), Error> {
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let operator_namespace =
        std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());

    let cm = super::configmap::desired_configmap(client.clone(), cluster, &operator_namespace).await?;
    reconcile_configmap(client.clone(), cluster, &cm).await?;

    let sts_api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    apply(
        &sts_api,
        &names::nimbus_statefulset_name(cluster),
        &desired_nimbus_statefulset(cluster),
        cluster,
    )
    .await?;

    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    apply(
        &deploy_api,
        &names::supervisor_deployment_name(cluster),
        &desired_supervisor_deployment(cluster),
        cluster,
    )
    .await?;

    if let Some(ui_deployment) = desired_ui_deployment(cluster) {
        apply(&deploy_api, &names::ui_deployment_name(cluster), &ui_deployment, cluster).await?;
    }

    let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    apply(
        &svc_api,
        &names::nimbus_service_name(cluster),
        &desired_nimbus_service(cluster),
        cluster,
    )
    .await?;

    if let Some(ui_service) = desired_ui_service(cluster) {
        apply(&svc_api, &names::ui_service_name(cluster), &ui_service, cluster).await?;
    }

    Ok(())
}

/// All of the child objects a fully-created cluster is expected to have,
/// used both by the Creating→CreateComplete test and by the coordinator.
pub async fn children_exist(client: Client, cluster: &Cluster) -> Result<bool, Error> {
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let cm_api: Api<k8s_openapi::api::core::v1::ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let sts_api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);

    if cm_api.get_opt(&names::configmap_name(cluster)).await?.is_none() {
        return Ok(false);
    }
    if sts_api
        .get_opt(&names::nimbus_statefulset_name(cluster))
        .await?
        .is_none()
    {
        return Ok(false);
    }
    if deploy_api
        .get_opt(&names::supervisor_deployment_name(cluster))
        .await?
        .is_none()
    {
        return Ok(false);
    }
    if svc_api.get_opt(&names::nimbus_service_name(cluster)).await?.is_none() {
        return Ok(false);
    }
    if cluster.spec.ui.is_some() {
        if deploy_api.get_opt(&names::ui_deployment_name(cluster)).await?.is_none() {
            return Ok(false);
        }
        if svc_api.get_opt(&names::ui_service_name(cluster)).await?.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn set_phase(
    client: Client,
    cluster: &Cluster,
    phase: ClusterPhase,
    message: impl Into<String>,
) -> Result<(), Error> {
    let message = message.into();
    patch_status(client, cluster, |status: &mut stormop_types::ClusterStatus| {
        status.phase = phase;
        status.message = Some(message);
        let available = phase == ClusterPhase::Running;
        stormop_types::set_condition(
            &mut status.conditions,
            stormop_types::condition_types::AVAILABLE,
            available,
            if available { "ClusterRunning" } else { "ClusterNotRunning" },
            format!("Cluster is in phase {phase}"),
            None,
        );
    })
    .await?;
    Ok(())
}

pub async fn terminating(client: Client, cluster: &Cluster) -> Result<(), Error> {
    set_phase(client, cluster, ClusterPhase::Terminating, messages::TERMINATING).await
}
