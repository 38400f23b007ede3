use kube::Resource;
use stormop_types::{Cluster, ManagementMode};

pub fn configmap_name(cluster: &Cluster) -> String {
    resource_name(cluster, |r| r.config_map.clone(), "config")
}

pub fn nimbus_statefulset_name(cluster: &Cluster) -> String {
    resource_name(cluster, |r| r.nimbus_stateful_set.clone(), "nimbus")
}

pub fn supervisor_deployment_name(cluster: &Cluster) -> String {
    resource_name(cluster, |r| r.supervisor_deployment.clone(), "supervisor")
}

pub fn ui_deployment_name(cluster: &Cluster) -> String {
    resource_name(cluster, |r| r.ui_deployment.clone(), "ui")
}

pub fn nimbus_service_name(cluster: &Cluster) -> String {
    resource_name(cluster, |r| r.nimbus_service.clone(), "nimbus")
}

pub fn ui_service_name(cluster: &Cluster) -> String {
    resource_name(cluster, |r| r.ui_service.clone(), "ui")
}

fn resource_name(
    cluster: &Cluster,
    reference: impl Fn(&stormop_types::ReferenceResourceNames) -> Option<String>,
    suffix: &str,
) -> String {
    let name = cluster.meta().name.clone().unwrap_or_default();
    if cluster.spec.management_mode == ManagementMode::Reference {
        if let Some(names) = &cluster.spec.resource_names
            && let Some(explicit) = reference(names)
        {
            return explicit;
        }
    }
    format!("{name}-{suffix}")
}

/// Nimbus DNS seed names for `nimbus.seeds`, one per stateful-set replica,
/// using the actual stateful-set name (whichever mode resolved it).
pub fn nimbus_seeds(cluster: &Cluster, namespace: &str) -> Vec<String> {
    let sts_name = nimbus_statefulset_name(cluster);
    let svc_name = nimbus_service_name(cluster);
    let replicas = cluster.spec.nimbus.replicas.max(1);
    (0..replicas)
        .map(|i| format!("{sts_name}-{i}.{svc_name}.{namespace}.svc.cluster.local"))
        .collect()
}
